#![no_main]

use libfuzzer_sys::fuzz_target;
use pdp11_core::{disassemble_one, Cpu, CpuConfig, GeneralRegister, NullEventQueue};

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let words: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    let Ok(mut cpu) = Cpu::new(CpuConfig {
        memory_bytes: 0o100_000,
        ..CpuConfig::default()
    }) else {
        return;
    };
    if cpu.load_bootstrap(0o1000, &words, 0o1000).is_err() {
        return;
    }
    cpu.set_register(GeneralRegister::SP, 0o1000);

    let _ = disassemble_one(0o1000, &words);
    let _ = cpu.run(&mut NullEventQueue, 4_096);
    let _ = cpu.snapshot();
});
