//! Runs a clock-driven kernel loop to its halt and prints a fingerprint of
//! the final state, for comparing runs across hosts.

use pdp11_core::{
    Cpu, CpuConfig, CpuSnapshot, EventQueue, GeneralRegister, HostError, InterruptRequests,
    IrqLine, StepOutcome,
};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

const CLOCK_VECTOR: u16 = 0o100;
const HANDLER: u32 = 0o2000;

/// Line clock: one request every `period` instructions, forever.
struct LineClock {
    line: IrqLine,
    period: u32,
    countdown: u32,
}

impl EventQueue for LineClock {
    fn is_work_due(&self) -> bool {
        self.countdown == 0
    }

    fn process_due_work(&mut self, irq: &mut InterruptRequests) -> Result<(), HostError> {
        irq.raise(self.line);
        self.countdown = self.period;
        Ok(())
    }

    fn advance(&mut self) {
        self.countdown = self.countdown.saturating_sub(1);
    }

    fn has_scheduled_work(&self) -> bool {
        true
    }
}

fn hash_bytes(hash: &mut u64, bytes: &[u8]) {
    for byte in bytes {
        *hash ^= u64::from(*byte);
        *hash = hash.wrapping_mul(0x1000_0000_01B3);
    }
}

fn fingerprint(snapshot: &CpuSnapshot, outcome: &StepOutcome) -> String {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    hash_bytes(&mut hash, format!("{outcome:?}").as_bytes());
    hash_bytes(&mut hash, &snapshot.instructions.to_le_bytes());
    hash_bytes(&mut hash, &snapshot.psw.to_word().to_le_bytes());
    for reg in GeneralRegister::ALL {
        let value = snapshot.registers.get(
            reg,
            snapshot.psw.register_set,
            snapshot.psw.current_mode,
        );
        hash_bytes(&mut hash, &value.to_le_bytes());
    }
    for word in &snapshot.memory {
        hash_bytes(&mut hash, &word.to_le_bytes());
    }
    format!("{hash:016x}")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut cpu = Cpu::new(CpuConfig {
        memory_bytes: 0o100_000,
        ..CpuConfig::default()
    })?;
    // MOV #1000,SP / CLR R1 / WAIT / CMP R1,#5 / BNE .-6 / HALT
    cpu.load_bootstrap(
        0o1000,
        &[
            0o012_706, 0o1000, 0o005_001, 0o000_001, 0o020_127, 0o5, 0o001_374, 0o000_000,
        ],
        0o1000,
    )?;
    // INC R1 / RTI
    cpu.load_bootstrap(HANDLER, &[0o005_201, 0o000_002], 0o1000)?;
    cpu.write_physical(u32::from(CLOCK_VECTOR), 0o2000)?;
    cpu.write_physical(u32::from(CLOCK_VECTOR) + 2, 0o340)?;

    let line = IrqLine::new(6, 0)?;
    cpu.connect_interrupt(line, CLOCK_VECTOR, None)?;
    let mut clock = LineClock {
        line,
        period: 20,
        countdown: 20,
    };

    let outcome = cpu.run(&mut clock, 10_000);
    println!(
        "{outcome:?} after {} instructions: {}",
        cpu.instructions(),
        fingerprint(&cpu.snapshot(), &outcome)
    );
    Ok(())
}
