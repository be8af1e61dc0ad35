//! The CPU context: one value owning the processor, memory and I/O page.

use std::fmt;

use tracing::{event, Level};

use crate::api::{CpuConfig, CpuSnapshot};
use crate::interrupt::{InterruptRequests, IrqLine};
use crate::iopage::CPU_REGISTER_RANGES;
use crate::memory::{
    is_iopage, AccessKind, DeviceId, IoDevice, IoPageRouter, PhysAddr, PhysicalMemory, Width,
};
use crate::mmu::{Access, Mmu, Space};
use crate::state::{
    ControlRegisters, GeneralRegister, Mode, ProcessorStatus, RegisterFile, RunState,
};
use crate::{BusError, ConfigError, ConsoleError, HostError, TrapKind, TrapSet};

/// A PDP-11/70 class processor with its memory and I/O page.
///
/// All architectural state lives here and is mutated only by [`Cpu::step`]
/// and the host-facing methods below. Devices are owned by the I/O page
/// router and never hold a reference back to the CPU.
pub struct Cpu {
    pub(crate) config: CpuConfig,
    pub(crate) psw: ProcessorStatus,
    pub(crate) registers: RegisterFile,
    pub(crate) control: ControlRegisters,
    pub(crate) mmu: Mmu,
    pub(crate) traps: TrapSet,
    pub(crate) interrupts: InterruptRequests,
    pub(crate) memory: PhysicalMemory,
    pub(crate) io: IoPageRouter,
    pub(crate) run_state: RunState,
    pub(crate) instructions: u64,
    /// Set after a vector read aborts; a second abort before a vector is
    /// taken successfully halts instead of looping.
    pub(crate) vector_fault: bool,
}

impl Cpu {
    /// Builds a CPU in the power-up state with zeroed memory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration is invalid.
    pub fn new(config: CpuConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let memory = PhysicalMemory::new(config.memory_bytes)?;
        let mut io = IoPageRouter::new();
        for (low, high, name) in CPU_REGISTER_RANGES {
            io.reserve(low, high, name)?;
        }
        event!(
            Level::INFO,
            memory_bytes = config.memory_bytes,
            "cpu created"
        );
        Ok(Self {
            config,
            psw: ProcessorStatus::default(),
            registers: RegisterFile::default(),
            control: ControlRegisters::default(),
            mmu: Mmu::new(),
            traps: TrapSet::EMPTY,
            interrupts: InterruptRequests::new(),
            memory,
            io,
            run_state: RunState::Running,
            instructions: 0,
            vector_fault: false,
        })
    }

    /// Power-up reset: every register, the MMU, pending traps and interrupt
    /// requests are cleared and devices see a bus reset. Memory is kept.
    pub fn reset(&mut self) {
        self.psw = ProcessorStatus::default();
        self.registers = RegisterFile::default();
        self.control = ControlRegisters::default();
        self.mmu = Mmu::new();
        self.traps = TrapSet::EMPTY;
        self.io.reset_all(&mut self.interrupts);
        self.interrupts.clear_all();
        self.run_state = RunState::Running;
        self.instructions = 0;
        self.vector_fault = false;
        event!(Level::INFO, "cpu reset");
    }

    /// Bus reset performed by the `RESET` instruction.
    pub(crate) fn bus_reset(&mut self) {
        self.io.reset_all(&mut self.interrupts);
        self.interrupts.clear_all();
        self.control.set_pirq(0);
        let mut mmr0 = self.mmu.mmr0();
        mmr0.enabled = false;
        mmr0.non_resident = false;
        mmr0.page_length = false;
        mmr0.read_only = false;
        self.mmu.set_mmr0(mmr0);
        self.mmu.write_mmr3(0);
        event!(Level::DEBUG, "bus reset");
    }

    /// Configuration the CPU was built with.
    #[must_use]
    pub const fn config(&self) -> &CpuConfig {
        &self.config
    }

    /// Current run state.
    #[must_use]
    pub const fn run_state(&self) -> &RunState {
        &self.run_state
    }

    /// Leaves the halted or waiting state and resumes at the current PC.
    pub fn resume(&mut self) {
        self.run_state = RunState::Running;
    }

    /// Instructions executed since the last reset.
    #[must_use]
    pub const fn instructions(&self) -> u64 {
        self.instructions
    }

    // Registers as seen by the running program.

    pub(crate) const fn reg(&self, reg: GeneralRegister) -> u16 {
        self.registers
            .get(reg, self.psw.register_set, self.psw.current_mode)
    }

    pub(crate) const fn set_reg(&mut self, reg: GeneralRegister, value: u16) {
        self.registers
            .set(reg, self.psw.register_set, self.psw.current_mode, value);
    }

    /// Reads `reg` through the current mode and register set.
    #[must_use]
    pub const fn register(&self, reg: GeneralRegister) -> u16 {
        self.reg(reg)
    }

    /// Writes `reg` through the current mode and register set.
    pub const fn set_register(&mut self, reg: GeneralRegister, value: u16) {
        self.set_reg(reg, value);
    }

    /// Program counter.
    #[must_use]
    pub const fn pc(&self) -> u16 {
        self.registers.pc()
    }

    /// Sets the program counter.
    pub const fn set_pc(&mut self, value: u16) {
        self.registers.set_pc(value);
    }

    /// The whole register file, every bank and stack pointer included.
    #[must_use]
    pub const fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    /// Mutable register file.
    pub const fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.registers
    }

    /// Processor status.
    #[must_use]
    pub const fn psw(&self) -> ProcessorStatus {
        self.psw
    }

    /// Replaces the processor status, trace bit included.
    pub const fn set_psw(&mut self, psw: ProcessorStatus) {
        self.psw = psw;
    }

    /// Stack limit, PIRQ and CPU error registers.
    #[must_use]
    pub const fn control(&self) -> &ControlRegisters {
        &self.control
    }

    /// Mutable control registers.
    pub const fn control_mut(&mut self) -> &mut ControlRegisters {
        &mut self.control
    }

    /// Memory management unit.
    #[must_use]
    pub const fn mmu(&self) -> &Mmu {
        &self.mmu
    }

    /// Mutable memory management unit.
    pub const fn mmu_mut(&mut self) -> &mut Mmu {
        &mut self.mmu
    }

    /// Pending synchronous traps.
    #[must_use]
    pub const fn pending_traps(&self) -> TrapSet {
        self.traps
    }

    /// Posts a trap request, e.g. a power fail from the host.
    pub const fn raise_trap(&mut self, kind: TrapKind) {
        self.traps.set(kind);
    }

    /// Interrupt request table.
    #[must_use]
    pub const fn interrupts(&self) -> &InterruptRequests {
        &self.interrupts
    }

    /// Mutable interrupt request table.
    pub const fn interrupts_mut(&mut self) -> &mut InterruptRequests {
        &mut self.interrupts
    }

    /// Main memory.
    #[must_use]
    pub const fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    /// Mutable main memory.
    pub const fn memory_mut(&mut self) -> &mut PhysicalMemory {
        &mut self.memory
    }

    /// I/O page device registry.
    #[must_use]
    pub const fn io(&self) -> &IoPageRouter {
        &self.io
    }

    /// Mutable I/O page device registry.
    pub const fn io_mut(&mut self) -> &mut IoPageRouter {
        &mut self.io
    }

    /// Registers `device` for the I/O page range `low..=high`.
    ///
    /// # Errors
    ///
    /// See [`IoPageRouter::register`].
    pub fn register_device(
        &mut self,
        low: PhysAddr,
        high: PhysAddr,
        device: Box<dyn IoDevice>,
    ) -> Result<DeviceId, ConfigError> {
        self.io.register(low, high, device)
    }

    /// Connects an interrupt line to a vector and optional owning device.
    ///
    /// # Errors
    ///
    /// See [`InterruptRequests::connect`].
    pub fn connect_interrupt(
        &mut self,
        line: IrqLine,
        vector: u16,
        owner: Option<DeviceId>,
    ) -> Result<(), ConfigError> {
        self.interrupts.connect(line, vector, owner)
    }

    // Physical bus.

    /// Reads the word containing `pa` from CPU registers, a device or memory.
    pub(crate) fn bus_read(&mut self, pa: PhysAddr, kind: AccessKind) -> Result<u16, BusError> {
        if is_iopage(pa) {
            if let Some(value) = self.read_cpu_register(pa & !1) {
                return Ok(value);
            }
            self.io.read_word(pa & !1, kind, &mut self.interrupts)
        } else {
            self.memory.read_word(pa)
        }
    }

    /// Writes a word, or the byte in the low half of `value`, at `pa`.
    pub(crate) fn bus_write(
        &mut self,
        pa: PhysAddr,
        value: u16,
        width: Width,
    ) -> Result<(), BusError> {
        if is_iopage(pa) {
            if self.write_cpu_register(pa, value, width) {
                return Ok(());
            }
            return match width {
                Width::Word => self
                    .io
                    .write(pa & !1, value, AccessKind::Word, &mut self.interrupts),
                Width::Byte => {
                    self.io
                        .write(pa, value & 0o377, AccessKind::Byte, &mut self.interrupts)
                }
            };
        }
        match width {
            Width::Word => self.memory.write_word(pa, value),
            #[allow(clippy::cast_possible_truncation)]
            Width::Byte => self.memory.write_byte(pa, value as u8),
        }
    }

    // Console access.

    /// Reads a word through the MMU without disturbing any state.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError`] for odd addresses, translation failures and
    /// non-existent physical addresses.
    pub fn console_read(&mut self, va: u16, space: Space, mode: Mode) -> Result<u16, ConsoleError> {
        let pa = self.console_translate(va, space, mode, Access::Read)?;
        Ok(self.bus_read(pa, AccessKind::Console)?)
    }

    /// Writes a word through the MMU without updating descriptor flags.
    ///
    /// # Errors
    ///
    /// See [`Self::console_read`].
    pub fn console_write(
        &mut self,
        va: u16,
        space: Space,
        mode: Mode,
        value: u16,
    ) -> Result<(), ConsoleError> {
        let pa = self.console_translate(va, space, mode, Access::Write)?;
        Ok(self.bus_write(pa, value, Width::Word)?)
    }

    /// Reads the word at physical address `pa`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::OddAddress`] or the bus failure.
    pub fn read_physical(&mut self, pa: PhysAddr) -> Result<u16, ConsoleError> {
        if pa & 1 != 0 {
            return Err(ConsoleError::OddAddress { addr: pa });
        }
        Ok(self.bus_read(pa, AccessKind::Console)?)
    }

    /// Writes the word at physical address `pa`.
    ///
    /// # Errors
    ///
    /// See [`Self::read_physical`].
    pub fn write_physical(&mut self, pa: PhysAddr, value: u16) -> Result<(), ConsoleError> {
        if pa & 1 != 0 {
            return Err(ConsoleError::OddAddress { addr: pa });
        }
        Ok(self.bus_write(pa, value, Width::Word)?)
    }

    fn console_translate(
        &self,
        va: u16,
        space: Space,
        mode: Mode,
        access: Access,
    ) -> Result<PhysAddr, ConsoleError> {
        if va & 1 != 0 {
            return Err(ConsoleError::OddAddress {
                addr: u32::from(va),
            });
        }
        Ok(self.mmu.translate_console(va, space, mode, access)?)
    }

    /// Deposits `words` at physical `origin` and points PC at `entry`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::AddressOutOfRange`] when any word falls outside
    /// main memory or `origin` is odd; memory is untouched in that case.
    pub fn load_bootstrap(
        &mut self,
        origin: PhysAddr,
        words: &[u16],
        entry: u16,
    ) -> Result<(), HostError> {
        if origin & 1 != 0 {
            return Err(HostError::AddressOutOfRange { addr: origin });
        }
        let byte_len = u32::try_from(words.len() * 2)
            .map_err(|_| HostError::AddressOutOfRange { addr: origin })?;
        let last = origin.saturating_add(byte_len.saturating_sub(1));
        if !words.is_empty() && !self.memory.contains(last) {
            return Err(HostError::AddressOutOfRange { addr: last });
        }
        let start = (origin / 2) as usize;
        self.memory.as_words_mut()[start..start + words.len()].copy_from_slice(words);
        self.registers.set_pc(entry);
        self.run_state = RunState::Running;
        event!(
            Level::INFO,
            words = words.len(),
            "bootstrap loaded at {origin:o}, entry {entry:o}"
        );
        Ok(())
    }

    /// Captures the architectural state and memory image.
    #[must_use]
    pub fn snapshot(&self) -> CpuSnapshot {
        CpuSnapshot {
            psw: self.psw,
            registers: self.registers.clone(),
            control: self.control,
            mmu: self.mmu.clone(),
            traps: self.traps,
            interrupts: self.interrupts.clone(),
            run_state: self.run_state.clone(),
            instructions: self.instructions,
            vector_fault: self.vector_fault,
            memory: self.memory.as_words().to_vec(),
        }
    }

    /// Restores a snapshot taken from a CPU with the same memory size.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MemorySize`] when the memory image does not
    /// match the configured size; nothing is restored in that case.
    pub fn restore(&mut self, snapshot: &CpuSnapshot) -> Result<(), ConfigError> {
        if snapshot.memory.len() != self.memory.as_words().len() {
            let bytes = u32::try_from(snapshot.memory.len() * 2).unwrap_or(u32::MAX);
            return Err(ConfigError::MemorySize { bytes });
        }
        self.psw = snapshot.psw;
        self.registers = snapshot.registers.clone();
        self.control = snapshot.control;
        self.mmu = snapshot.mmu.clone();
        self.traps = snapshot.traps;
        self.interrupts = snapshot.interrupts.clone();
        self.run_state = snapshot.run_state.clone();
        self.instructions = snapshot.instructions;
        self.vector_fault = snapshot.vector_fault;
        self.memory.as_words_mut().copy_from_slice(&snapshot.memory);
        Ok(())
    }
}

impl fmt::Debug for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cpu")
            .field("psw", &self.psw)
            .field("registers", &self.registers)
            .field("control", &self.control)
            .field("mmu", &self.mmu)
            .field("traps", &self.traps)
            .field("run_state", &self.run_state)
            .field("instructions", &self.instructions)
            .field("io", &self.io)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::Cpu;
    use crate::api::CpuConfig;
    use crate::memory::IOPAGE_BASE;
    use crate::mmu::{PageAccess, Space};
    use crate::state::{GeneralRegister, Mode, RunState};
    use crate::{ConsoleError, HostError, MmuFault, TrapKind};

    fn cpu() -> Cpu {
        Cpu::new(CpuConfig::default()).expect("default config")
    }

    #[test]
    fn load_bootstrap_deposits_words_and_sets_pc() {
        let mut cpu = cpu();
        cpu.load_bootstrap(0o2000, &[0o012_700, 0o177_406], 0o2000)
            .expect("in range");
        assert_eq!(cpu.read_physical(0o2000), Ok(0o012_700));
        assert_eq!(cpu.read_physical(0o2002), Ok(0o177_406));
        assert_eq!(cpu.pc(), 0o2000);
    }

    #[test]
    fn load_bootstrap_rejects_words_past_memory() {
        let mut cpu = cpu();
        let end = cpu.memory().size_bytes();
        assert_eq!(
            cpu.load_bootstrap(end - 2, &[1, 2], 0),
            Err(HostError::AddressOutOfRange { addr: end + 1 })
        );
        assert_eq!(cpu.read_physical(end - 2), Ok(0));
    }

    #[test]
    fn console_access_honours_translation_without_side_effects() {
        let mut cpu = cpu();
        cpu.mmu_mut().write_mmr0(1);
        assert_eq!(
            cpu.console_read(0o20_000, Space::Instruction, Mode::User),
            Err(ConsoleError::Translation(MmuFault::NonResident { page: 0o61 }))
        );
        assert!(!cpu.mmu().frozen());

        let page = cpu.mmu_mut().descriptor_mut(Mode::User, Space::Instruction, 1);
        page.par = 0o100;
        page.plf = 0o177;
        page.access = PageAccess::ReadWrite;
        cpu.console_write(0o20_010, Space::Instruction, Mode::User, 0o777)
            .expect("mapped");
        assert_eq!(cpu.read_physical(0o10_010), Ok(0o777));
        assert!(!cpu.mmu().descriptor(Mode::User, Space::Instruction, 1).written);
    }

    #[test]
    fn console_reports_odd_and_missing_addresses() {
        let mut cpu = cpu();
        assert_eq!(
            cpu.console_read(0o1001, Space::Data, Mode::Kernel),
            Err(ConsoleError::OddAddress { addr: 0o1001 })
        );
        assert!(matches!(
            cpu.read_physical(IOPAGE_BASE),
            Err(ConsoleError::Bus(_))
        ));
        assert!(cpu.pending_traps().is_empty());
    }

    #[test]
    fn psw_is_reachable_through_the_iopage() {
        let mut cpu = cpu();
        cpu.write_physical(0o17_777_776, 0o340).expect("psw");
        assert_eq!(cpu.psw().ipl, 7);
        assert_eq!(cpu.console_read(0o177_776, Space::Data, Mode::Kernel), Ok(0o340));
    }

    #[test]
    fn reset_clears_state_but_keeps_memory() {
        let mut cpu = cpu();
        cpu.write_physical(0o100, 0o1234).expect("memory");
        cpu.set_register(GeneralRegister::R3, 7);
        cpu.raise_trap(TrapKind::PowerFail);
        cpu.mmu_mut().write_mmr0(1);
        cpu.reset();
        assert_eq!(cpu.register(GeneralRegister::R3), 0);
        assert!(cpu.pending_traps().is_empty());
        assert!(!cpu.mmu().enabled());
        assert_eq!(cpu.run_state(), &RunState::Running);
        assert_eq!(cpu.read_physical(0o100), Ok(0o1234));
    }

    #[test]
    fn snapshot_restores_exactly() {
        let mut cpu = cpu();
        cpu.set_register(GeneralRegister::R5, 0o55);
        cpu.write_physical(0o400, 0o4242).expect("memory");
        let snapshot = cpu.snapshot();

        cpu.reset();
        cpu.write_physical(0o400, 0).expect("memory");
        cpu.restore(&snapshot).expect("same size");
        assert_eq!(cpu.snapshot(), snapshot);
        assert_eq!(cpu.register(GeneralRegister::R5), 0o55);
    }

    #[test]
    fn restore_rejects_a_foreign_memory_size() {
        let mut cpu = cpu();
        let mut snapshot = cpu.snapshot();
        snapshot.memory.truncate(16);
        assert!(cpu.restore(&snapshot).is_err());
    }
}
