//! Memory management: relocation, aborts and the diagnostic registers.

use pdp11_core::iopage::{KERNEL_APR_BASE, MMR0_ADDR, MMR3_ADDR};
use pdp11_core::{
    Cpu, CpuConfig, GeneralRegister, HaltReason, Mode, NullEventQueue, PageAccess, Space,
    StepOutcome, TrapKind,
};
use proptest as _;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

const READ_WRITE_FULL: u16 = 0o077_406;
const READ_ONLY_FULL: u16 = 0o077_402;
const MMU_HANDLER: u16 = 0o3000;

fn kernel_pdr(page: u32) -> u32 {
    KERNEL_APR_BASE + page * 2
}

fn kernel_par(page: u32) -> u32 {
    KERNEL_APR_BASE + 0o40 + page * 2
}

/// Kernel I space mapped one to one with the I/O page in page 7, a halt
/// handler on the memory management vector and relocation enabled.
fn mapped_cpu(program: &[u16]) -> Cpu {
    let mut cpu = Cpu::new(CpuConfig::default()).expect("default config");
    cpu.load_bootstrap(0o1000, program, 0o1000)
        .expect("program fits");
    for page in 0..8_u16 {
        let par = if page == 7 { 0o177_600 } else { page * 0o200 };
        cpu.write_physical(kernel_par(u32::from(page)), par)
            .expect("par");
        cpu.write_physical(kernel_pdr(u32::from(page)), READ_WRITE_FULL)
            .expect("pdr");
    }
    cpu.write_physical(0o250, MMU_HANDLER).expect("vector");
    cpu.write_physical(0o252, 0o340).expect("vector");
    cpu.write_physical(u32::from(MMU_HANDLER), 0).expect("handler");
    cpu.set_register(GeneralRegister::SP, 0o1000);
    cpu
}

fn enable(cpu: &mut Cpu) {
    cpu.write_physical(MMR0_ADDR, 1).expect("mmr0");
}

#[test]
fn relocation_moves_a_page_elsewhere_in_physical_memory() {
    // MOV #123,@#20002 / HALT
    let mut cpu = mapped_cpu(&[0o012_737, 0o123, 0o20_002, 0o000_000]);
    cpu.write_physical(kernel_par(1), 0o4000).expect("par");
    enable(&mut cpu);
    assert_eq!(
        cpu.run(&mut NullEventQueue, 10),
        StepOutcome::Halted(HaltReason::Halt)
    );
    assert_eq!(cpu.pc(), 0o1010);
    assert_eq!(cpu.read_physical(0o400_002), Ok(0o123));
    assert_eq!(cpu.read_physical(0o20_002), Ok(0));
    let page = cpu.mmu().descriptor(Mode::Kernel, Space::Instruction, 1);
    assert!(page.written);
}

#[test]
fn page_length_violation_aborts_and_freezes_the_diagnostics() {
    // MOV @#20100,R0 / HALT
    let mut cpu = mapped_cpu(&[0o013_700, 0o20_100, 0o000_000]);
    cpu.write_physical(kernel_pdr(1), 0o000_006).expect("pdr");
    cpu.set_register(GeneralRegister::R0, 0o55);
    enable(&mut cpu);

    assert_eq!(cpu.step(&mut NullEventQueue), StepOutcome::Continue);
    assert!(cpu.pending_traps().contains(TrapKind::MemoryManagement));
    assert_eq!(cpu.pc(), 0o1000);
    assert_eq!(cpu.register(GeneralRegister::R0), 0o55);
    let mmr0 = cpu.mmu().mmr0();
    assert!(mmr0.page_length);
    assert!(!mmr0.non_resident && !mmr0.read_only);
    assert_eq!(mmr0.page, 1);
    assert_eq!(cpu.mmu().mmr2(), 0o1000);
    assert!(cpu.mmu().frozen());
    assert!(cpu.mmu().descriptor(Mode::Kernel, Space::Instruction, 1).accessed);

    assert_eq!(
        cpu.run(&mut NullEventQueue, 10),
        StepOutcome::Halted(HaltReason::Halt)
    );
    assert_eq!(cpu.pc(), MMU_HANDLER + 2);
    assert_eq!(cpu.mmu().mmr2(), 0o1000);
    assert_eq!(cpu.register(GeneralRegister::SP), 0o774);
    assert_eq!(cpu.read_physical(0o774), Ok(0o1000));
}

#[test]
fn blocks_inside_the_page_length_are_accessible() {
    // MOV @#20076,R0 / HALT
    let mut cpu = mapped_cpu(&[0o013_700, 0o20_076, 0o000_000]);
    cpu.write_physical(kernel_pdr(1), 0o000_006).expect("pdr");
    cpu.write_physical(0o20_076, 0o4242).expect("memory");
    enable(&mut cpu);
    cpu.run(&mut NullEventQueue, 10);
    assert_eq!(cpu.pc(), 0o1006);
    assert_eq!(cpu.register(GeneralRegister::R0), 0o4242);
}

#[test]
fn writes_to_read_only_pages_abort_before_reading() {
    // INC @#20000 / HALT
    let mut cpu = mapped_cpu(&[0o005_237, 0o20_000, 0o000_000]);
    cpu.write_physical(kernel_pdr(1), READ_ONLY_FULL).expect("pdr");
    cpu.write_physical(0o20_000, 7).expect("memory");
    enable(&mut cpu);
    cpu.step(&mut NullEventQueue);
    assert!(cpu.pending_traps().contains(TrapKind::MemoryManagement));
    assert!(cpu.mmu().mmr0().read_only);
    assert_eq!(cpu.pc(), 0o1000);
    assert_eq!(cpu.read_physical(0o20_000), Ok(7));
    assert_eq!(
        cpu.mmu().descriptor(Mode::Kernel, Space::Instruction, 1).access,
        PageAccess::ReadOnly
    );
}

#[test]
fn autoincrement_before_an_abort_is_recorded_in_mmr1() {
    // MOV (R2)+,R0 with R2 pointing into a non-resident page.
    let mut cpu = mapped_cpu(&[0o012_200, 0o000_000]);
    cpu.write_physical(kernel_pdr(2), 0).expect("pdr");
    cpu.set_register(GeneralRegister::R2, 0o40_000);
    enable(&mut cpu);
    cpu.step(&mut NullEventQueue);
    assert!(cpu.mmu().mmr0().non_resident);
    assert_eq!(cpu.register(GeneralRegister::R2), 0o40_002);
    assert_eq!(cpu.mmu().mmr1(), (2 << 3) | 2);
}

#[test]
fn clearing_mmr0_unfreezes_the_registers() {
    let mut cpu = mapped_cpu(&[0o013_700, 0o20_100, 0o000_000]);
    cpu.write_physical(kernel_pdr(1), 0o000_006).expect("pdr");
    enable(&mut cpu);
    cpu.step(&mut NullEventQueue);
    assert!(cpu.mmu().frozen());
    cpu.write_physical(MMR0_ADDR, 1).expect("mmr0");
    assert!(!cpu.mmu().frozen());
    assert!(cpu.mmu().enabled());
}

#[test]
fn kernel_data_space_separates_operands_from_instructions() {
    // MOV @#2000,R1 / HALT
    let mut cpu = mapped_cpu(&[0o013_701, 0o2000, 0o000_000]);
    for page in 0..8_u32 {
        let par = if page == 7 { 0o177_600 } else { 0o200 * page as u16 + 0o1000 };
        cpu.write_physical(kernel_par(page) + 0o20, par).expect("par");
        cpu.write_physical(kernel_pdr(page) + 0o20, READ_WRITE_FULL)
            .expect("pdr");
    }
    cpu.write_physical(0o2000, 0o111).expect("memory");
    cpu.write_physical(0o102_000, 0o222).expect("memory");
    // The vector table lives in kernel data space too.
    cpu.write_physical(0o100_250, MMU_HANDLER).expect("vector");
    cpu.write_physical(MMR3_ADDR, 0o4).expect("mmr3");
    enable(&mut cpu);
    cpu.run(&mut NullEventQueue, 10);
    assert_eq!(cpu.register(GeneralRegister::R1), 0o222);
}

#[rstest]
#[case(Space::Instruction, 0o1000, Ok(0o012_700))]
#[case(Space::Instruction, 0o1001, Err(()))]
#[case(Space::Instruction, 0o20_100, Err(()))]
fn console_reads_translate_without_side_effects(
    #[case] space: Space,
    #[case] va: u16,
    #[case] expected: Result<u16, ()>,
) {
    let mut cpu = mapped_cpu(&[0o012_700, 0o000_000]);
    cpu.write_physical(kernel_pdr(1), 0o000_006).expect("pdr");
    enable(&mut cpu);
    let result = cpu.console_read(va, space, Mode::Kernel).map_err(|_| ());
    assert_eq!(result, expected);
    assert!(!cpu.mmu().frozen());
    assert!(!cpu.mmu().descriptor(Mode::Kernel, space, 1).accessed);
}
