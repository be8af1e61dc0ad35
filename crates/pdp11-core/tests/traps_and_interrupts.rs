//! Trap and interrupt vectoring, stack limits and event queue integration.

use pdp11_core::iopage::{KERNEL_APR_BASE, MMR0_ADDR, PIRQ_ADDR};
use pdp11_core::{
    AccessKind, BusError, Cpu, CpuConfig, EventQueue, GeneralRegister, HaltReason, HostError,
    InterruptRequests, IoDevice, IrqLine, Mode, NullEventQueue, PhysAddr, ProcessorStatus,
    StepOutcome, TrapKind, TrapSet,
};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

const HANDLER: u16 = 0o3000;

fn boot(program: &[u16]) -> Cpu {
    boot_with(CpuConfig::default(), program)
}

fn boot_with(config: CpuConfig, program: &[u16]) -> Cpu {
    let mut cpu = Cpu::new(config).expect("valid config");
    cpu.load_bootstrap(0o1000, program, 0o1000)
        .expect("program fits");
    cpu.set_register(GeneralRegister::SP, 0o1000);
    cpu
}

/// Points `vector` at a kernel handler running at priority 7.
fn vector_to(cpu: &mut Cpu, vector: u16, handler: u16, code: &[u16]) {
    cpu.write_physical(u32::from(vector), handler)
        .expect("vector");
    cpu.write_physical(u32::from(vector) + 2, 0o340)
        .expect("vector");
    for (index, word) in (0_u32..).zip(code) {
        cpu.write_physical(u32::from(handler) + index * 2, *word)
            .expect("handler");
    }
}

fn line(level: u8, bit: u8) -> IrqLine {
    IrqLine::new(level, bit).expect("valid line")
}

#[test]
fn user_trap_round_trips_through_the_kernel() {
    // TRAP 5 / ... ; handler: RTI
    let mut cpu = boot(&[0o104_405, 0o000_240]);
    vector_to(&mut cpu, 0o34, HANDLER, &[0o000_002]);
    let mut psw = ProcessorStatus::default();
    psw.current_mode = Mode::User;
    cpu.set_psw(psw);
    cpu.set_register(GeneralRegister::SP, 0o700);
    cpu.registers_mut().set_stack_pointer(Mode::Kernel, 0o1000);

    cpu.step(&mut NullEventQueue);
    assert!(cpu.pending_traps().contains(TrapKind::Trap));
    cpu.step(&mut NullEventQueue);
    assert_eq!(cpu.pc(), HANDLER);
    assert_eq!(cpu.psw().current_mode, Mode::Kernel);
    assert_eq!(cpu.psw().previous_mode, Mode::User);
    assert_eq!(cpu.register(GeneralRegister::SP), 0o774);
    assert_eq!(cpu.read_physical(0o776), Ok(0o140_000));
    assert_eq!(cpu.read_physical(0o774), Ok(0o1002));
    assert_eq!(cpu.registers().stack_pointer(Mode::User), 0o700);

    cpu.step(&mut NullEventQueue);
    assert_eq!(cpu.pc(), 0o1002);
    assert_eq!(cpu.psw().current_mode, Mode::User);
    assert_eq!(cpu.register(GeneralRegister::SP), 0o700);
    assert_eq!(cpu.registers().stack_pointer(Mode::Kernel), 0o1000);
}

#[test]
fn user_rti_cannot_raise_privilege_or_priority() {
    let mut cpu = boot(&[0o000_002]);
    let mut psw = ProcessorStatus::default();
    psw.current_mode = Mode::User;
    cpu.set_psw(psw);
    cpu.set_register(GeneralRegister::SP, 0o700);
    cpu.write_physical(0o700, 0o2000).expect("stack");
    cpu.write_physical(0o702, 0o000_357).expect("stack");
    cpu.step(&mut NullEventQueue);
    assert_eq!(cpu.pc(), 0o2000);
    assert_eq!(cpu.psw().current_mode, Mode::User);
    assert_eq!(cpu.psw().ipl, 0);
    assert!(cpu.psw().trace);
    assert_eq!(cpu.psw().condition_codes(), 0o17);
    assert!(cpu.pending_traps().contains(TrapKind::Trace));
}

#[test]
fn interrupts_wait_until_the_priority_drops() {
    // NOP / SPL 4 / NOP
    let mut cpu = boot(&[0o000_240, 0o000_234, 0o000_240]);
    vector_to(&mut cpu, 0o100, HANDLER, &[0o000_000]);
    cpu.connect_interrupt(line(5, 0), 0o100, None)
        .expect("free line");
    let mut psw = ProcessorStatus::default();
    psw.ipl = 6;
    cpu.set_psw(psw);
    cpu.interrupts_mut().raise(line(5, 0));

    cpu.step(&mut NullEventQueue);
    assert_eq!(cpu.pc(), 0o1002);
    cpu.step(&mut NullEventQueue);
    assert_eq!(cpu.psw().ipl, 4);
    assert_eq!(cpu.pc(), 0o1004);

    cpu.step(&mut NullEventQueue);
    assert_eq!(cpu.pc(), HANDLER);
    assert_eq!(cpu.psw().ipl, 7);
    assert_eq!(cpu.read_physical(0o774), Ok(0o1004));
    assert_eq!(cpu.read_physical(0o776), Ok(0o200));
    assert!(!cpu.interrupts().is_pending(line(5, 0)));
}

#[test]
fn spl_is_ignored_outside_kernel_mode() {
    let mut cpu = boot(&[0o000_235]);
    let mut psw = ProcessorStatus::default();
    psw.current_mode = Mode::Supervisor;
    psw.ipl = 2;
    cpu.set_psw(psw);
    cpu.step(&mut NullEventQueue);
    assert_eq!(cpu.psw().ipl, 2);
    assert!(cpu.pending_traps().is_empty());
}

#[test]
fn programmed_interrupt_request_vectors_through_240() {
    let mut cpu = boot(&[0o000_240, 0o000_000]);
    vector_to(&mut cpu, 0o240, HANDLER, &[0o000_000]);
    cpu.write_physical(PIRQ_ADDR, 1 << 13).expect("pirq");
    cpu.step(&mut NullEventQueue);
    assert_eq!(cpu.pc(), HANDLER);
    assert_eq!(cpu.control().pirq & (1 << 13), 1 << 13);
    assert_eq!(
        cpu.run(&mut NullEventQueue, 10),
        StepOutcome::Halted(HaltReason::Halt)
    );
    assert_eq!(cpu.pc(), HANDLER + 2);
}

#[test]
fn trace_bit_traps_after_one_instruction() {
    let mut cpu = boot(&[0o000_240, 0o000_240]);
    vector_to(&mut cpu, 0o14, HANDLER, &[0o000_000]);
    let mut psw = ProcessorStatus::default();
    psw.trace = true;
    cpu.set_psw(psw);
    cpu.step(&mut NullEventQueue);
    assert_eq!(cpu.pc(), 0o1002);
    cpu.step(&mut NullEventQueue);
    assert_eq!(cpu.pc(), HANDLER);
    assert_eq!(cpu.read_physical(0o776), Ok(0o20));
    assert!(!cpu.psw().trace);
}

#[test]
fn yellow_zone_push_completes_and_posts_a_trap() {
    // JSR PC,@#2000
    let mut cpu = boot(&[0o004_737, 0o2000]);
    cpu.set_register(GeneralRegister::SP, 0o400);
    cpu.step(&mut NullEventQueue);
    assert_eq!(cpu.pc(), 0o2000);
    assert_eq!(cpu.read_physical(0o376), Ok(0o1004));
    assert!(cpu.pending_traps().contains(TrapKind::YellowStack));
    assert!(cpu.control().cpu_error.yellow_zone);
}

#[test]
fn mfpd_checks_the_red_zone_before_pushing() {
    // MFPD R0
    let mut cpu = boot(&[0o106_500]);
    cpu.set_register(GeneralRegister::R0, 0o7777);
    cpu.set_register(GeneralRegister::SP, 0o300);
    cpu.write_physical(0o276, 0o1234).expect("stack");
    cpu.step(&mut NullEventQueue);
    assert_eq!(cpu.read_physical(0o276), Ok(0o1234));
    assert!(cpu.pending_traps().contains(TrapKind::RedStack));
    assert!(cpu.control().cpu_error.red_zone);
    assert_eq!(cpu.register(GeneralRegister::SP), 0o4);
}

#[test]
fn red_zone_after_a_trap_switches_to_the_emergency_stack() {
    let mut cpu = boot(&[0o104_000]);
    vector_to(&mut cpu, 0o30, 0o2000, &[0o000_000]);
    vector_to(&mut cpu, 0o4, HANDLER, &[0o000_000]);
    cpu.set_register(GeneralRegister::SP, 0o200);

    cpu.step(&mut NullEventQueue);
    cpu.step(&mut NullEventQueue);
    assert_eq!(cpu.pc(), 0o2000);
    assert_eq!(cpu.register(GeneralRegister::SP), 0o4);
    assert!(cpu.pending_traps().contains(TrapKind::RedStack));
    assert!(cpu.control().cpu_error.red_zone);

    cpu.step(&mut NullEventQueue);
    assert_eq!(cpu.pc(), HANDLER);
    assert_eq!(cpu.register(GeneralRegister::SP), 0);
    assert_eq!(cpu.read_physical(0), Ok(0o2000));
    assert_eq!(
        cpu.run(&mut NullEventQueue, 10),
        StepOutcome::Halted(HaltReason::Halt)
    );
}

/// Kernel I space mapped one to one with page 0 protected by `pdr`.
fn protect_low_page(cpu: &mut Cpu, pdr: u16) {
    for page in 0..8_u16 {
        let par = if page == 7 { 0o177_600 } else { page * 0o200 };
        let offset = PhysAddr::from(page) * 2;
        cpu.write_physical(KERNEL_APR_BASE + 0o40 + offset, par)
            .expect("par");
        let access = if page == 0 { pdr } else { 0o077_406 };
        cpu.write_physical(KERNEL_APR_BASE + offset, access)
            .expect("pdr");
    }
    cpu.write_physical(MMR0_ADDR, 1).expect("mmr0");
}

#[test]
fn failed_push_while_taking_the_red_zone_trap_halts() {
    let mut cpu = boot(&[0o104_000]);
    vector_to(&mut cpu, 0o30, 0o2000, &[0o000_000]);
    protect_low_page(&mut cpu, 0o077_402);

    cpu.step(&mut NullEventQueue);
    assert_eq!(cpu.step(&mut NullEventQueue), StepOutcome::Continue);
    assert!(cpu.pending_traps().contains(TrapKind::RedStack));
    assert_eq!(cpu.registers().stack_pointer(Mode::Kernel), 0o4);
    assert_eq!(
        cpu.step(&mut NullEventQueue),
        StepOutcome::Halted(HaltReason::RedZone)
    );
}

#[test]
fn repeated_vector_aborts_halt() {
    let mut cpu = boot(&[0o000_240]);
    protect_low_page(&mut cpu, 0);
    assert_eq!(
        cpu.run(&mut NullEventQueue, 10),
        StepOutcome::Halted(HaltReason::VectorAbort)
    );
}

#[test]
fn configured_stop_traps_halt_after_vectoring() {
    let config = CpuConfig {
        stop_traps: TrapSet::EMPTY.with(TrapKind::Emt),
        ..CpuConfig::default()
    };
    let mut cpu = boot_with(config, &[0o104_000]);
    vector_to(&mut cpu, 0o30, HANDLER, &[0o000_000]);
    assert_eq!(
        cpu.run(&mut NullEventQueue, 10),
        StepOutcome::Halted(HaltReason::TrapStop(TrapKind::Emt))
    );
    assert_eq!(cpu.pc(), HANDLER);
}

#[test]
fn illegal_instruction_and_odd_jump_target_trap() {
    // JMP R0 / reserved word
    let mut cpu = boot(&[0o000_100, 0o000_007]);
    cpu.step(&mut NullEventQueue);
    assert!(cpu.pending_traps().contains(TrapKind::IllegalInstruction));

    // JMP @#1001
    let mut cpu = boot(&[0o000_137, 0o1001]);
    cpu.step(&mut NullEventQueue);
    assert_eq!(cpu.pc(), 0o1001);
    cpu.write_physical(0o4, HANDLER).expect("vector");
    cpu.step(&mut NullEventQueue);
    assert!(cpu.pending_traps().contains(TrapKind::OddAddress));
    assert!(cpu.control().cpu_error.odd_address);
}

/// Fires one interrupt on `line` after `countdown` instruction times.
struct OneShot {
    countdown: u32,
    line: IrqLine,
    fired: bool,
}

impl EventQueue for OneShot {
    fn is_work_due(&self) -> bool {
        !self.fired && self.countdown == 0
    }

    fn process_due_work(&mut self, irq: &mut InterruptRequests) -> Result<(), HostError> {
        irq.raise(self.line);
        self.fired = true;
        Ok(())
    }

    fn advance(&mut self) {
        self.countdown = self.countdown.saturating_sub(1);
    }

    fn has_scheduled_work(&self) -> bool {
        !self.fired
    }
}

#[test]
fn wait_resumes_when_a_scheduled_interrupt_arrives() {
    // WAIT / HALT ; handler: RTI
    let mut cpu = boot(&[0o000_001, 0o000_000]);
    vector_to(&mut cpu, 0o100, HANDLER, &[0o000_002]);
    cpu.connect_interrupt(line(5, 0), 0o100, None)
        .expect("free line");
    let mut queue = OneShot {
        countdown: 3,
        line: line(5, 0),
        fired: false,
    };
    assert_eq!(cpu.step(&mut queue), StepOutcome::Waiting);
    assert_eq!(cpu.step(&mut queue), StepOutcome::Waiting);
    assert_eq!(
        cpu.run(&mut queue, 100),
        StepOutcome::Halted(HaltReason::Halt)
    );
    assert!(queue.fired);
    assert_eq!(cpu.pc(), 0o1004);
}

struct Failing;

impl EventQueue for Failing {
    fn is_work_due(&self) -> bool {
        true
    }

    fn process_due_work(&mut self, _irq: &mut InterruptRequests) -> Result<(), HostError> {
        Err(HostError::EventQueue("disk offline".to_owned()))
    }

    fn has_scheduled_work(&self) -> bool {
        true
    }
}

#[test]
fn event_queue_failure_halts_the_engine() {
    let mut cpu = boot(&[0o000_240]);
    assert_eq!(
        cpu.step(&mut Failing),
        StepOutcome::Halted(HaltReason::Host(HostError::EventQueue(
            "disk offline".to_owned()
        )))
    );
    assert_eq!(cpu.instructions(), 0);
}

const CSR: PhysAddr = 0o17_776_500;

/// A device that requests an interrupt when its CSR is written and supplies
/// its own vector on acknowledge.
struct Doorbell {
    line: IrqLine,
    csr: u16,
}

impl IoDevice for Doorbell {
    fn name(&self) -> &str {
        "doorbell"
    }

    fn read(
        &mut self,
        _addr: PhysAddr,
        _kind: AccessKind,
        _irq: &mut InterruptRequests,
    ) -> Result<u16, BusError> {
        Ok(self.csr)
    }

    fn write(
        &mut self,
        _addr: PhysAddr,
        value: u16,
        _kind: AccessKind,
        irq: &mut InterruptRequests,
    ) -> Result<(), BusError> {
        self.csr = value;
        irq.raise(self.line);
        Ok(())
    }

    fn acknowledge(&mut self, _line: IrqLine) -> Option<u16> {
        Some(0o300)
    }
}

#[test]
fn device_write_raises_an_interrupt_with_its_own_vector() {
    // MOV #100,@#176500 / HALT
    let mut cpu = boot(&[0o012_737, 0o100, 0o176_500, 0o000_000]);
    vector_to(&mut cpu, 0o300, HANDLER, &[0o000_000]);
    let doorbell = Doorbell {
        line: line(4, 2),
        csr: 0,
    };
    let id = cpu
        .register_device(CSR, CSR + 1, Box::new(doorbell))
        .expect("free range");
    cpu.connect_interrupt(line(4, 2), 0o200, Some(id))
        .expect("free line");

    cpu.step(&mut NullEventQueue);
    assert_eq!(cpu.read_physical(CSR), Ok(0o100));
    assert!(cpu.interrupts().is_pending(line(4, 2)));
    cpu.step(&mut NullEventQueue);
    assert_eq!(cpu.pc(), HANDLER);
}
