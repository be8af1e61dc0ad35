//! Memory paths and effective-address evaluation.
//!
//! Every function here returns `Err(TrapKind)` to abort the current
//! instruction. Side effects that the hardware keeps on an abort (register
//! auto-modification, MMR0/MMR1 updates, CPU error bits) are applied before
//! the error is returned.

use tracing::{event, Level};

use crate::cpu::Cpu;
use crate::decoder::{AddressingMode, Operand};
use crate::memory::{is_iopage, validate_word_alignment, AccessKind, PhysAddr, Width};
use crate::mmu::{Access, Space};
use crate::state::{GeneralRegister, Mode, StackZone, EMERGENCY_STACK};
use crate::{BusError, TrapKind};

/// Where an operand lives once its effective address is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Register(GeneralRegister),
    Memory { va: u16, space: Space },
}

/// A read-modify-write destination, already relocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Register(GeneralRegister),
    Physical(PhysAddr),
}

/// Selects the byte of `word` addressed by the low bit of `addr`.
const fn select_byte(word: u16, addr: PhysAddr) -> u16 {
    if addr & 1 == 0 {
        word & 0o377
    } else {
        word >> 8
    }
}

impl Cpu {
    /// Space used for data references in the current mode.
    pub(crate) const fn data_space(&self) -> Space {
        self.mmu.data_space(self.psw.current_mode)
    }

    fn relocate(
        &mut self,
        va: u16,
        space: Space,
        mode: Mode,
        access: Access,
    ) -> Result<PhysAddr, TrapKind> {
        self.mmu.translate(va, space, mode, access).map_err(|fault| {
            event!(Level::DEBUG, "{fault} at {va:o}");
            TrapKind::MemoryManagement
        })
    }

    /// Latches the CPU error bit for a failed bus cycle.
    fn bus_fault(&mut self, error: BusError) -> TrapKind {
        let (BusError::NonExistent { addr } | BusError::Timeout { addr }) = error;
        if is_iopage(addr) {
            self.control.cpu_error.io_timeout = true;
        } else {
            self.control.cpu_error.non_existent_memory = true;
        }
        TrapKind::NonExistentMemory
    }

    fn check_alignment(&mut self, va: u16, width: Width) -> Result<(), TrapKind> {
        if matches!(width, Width::Word) {
            validate_word_alignment(va)
                .inspect_err(|_| self.control.cpu_error.odd_address = true)?;
        }
        Ok(())
    }

    /// Odd-address check and relocation of one reference.
    pub(crate) fn locate(
        &mut self,
        va: u16,
        space: Space,
        mode: Mode,
        width: Width,
        access: Access,
    ) -> Result<PhysAddr, TrapKind> {
        self.check_alignment(va, width)?;
        self.relocate(va, space, mode, access)
    }

    pub(crate) fn read_physical_operand(
        &mut self,
        pa: PhysAddr,
        width: Width,
    ) -> Result<u16, TrapKind> {
        let word = self
            .bus_read(pa, AccessKind::for_width(width))
            .map_err(|error| self.bus_fault(error))?;
        Ok(match width {
            Width::Word => word,
            Width::Byte => select_byte(word, pa),
        })
    }

    pub(crate) fn write_physical_operand(
        &mut self,
        pa: PhysAddr,
        width: Width,
        value: u16,
    ) -> Result<(), TrapKind> {
        self.bus_write(pa, value, width)
            .map_err(|error| self.bus_fault(error))
    }

    /// Program read through the MMU.
    pub(crate) fn read_virtual(
        &mut self,
        va: u16,
        space: Space,
        mode: Mode,
        width: Width,
    ) -> Result<u16, TrapKind> {
        let pa = self.locate(va, space, mode, width, Access::Read)?;
        self.read_physical_operand(pa, width)
    }

    /// Program write through the MMU.
    pub(crate) fn write_virtual(
        &mut self,
        va: u16,
        space: Space,
        mode: Mode,
        width: Width,
        value: u16,
    ) -> Result<(), TrapKind> {
        let pa = self.locate(va, space, mode, width, Access::Write)?;
        self.write_physical_operand(pa, width, value)
    }

    /// Reads a word from the instruction stream and advances PC.
    pub(crate) fn fetch_word(&mut self) -> Result<u16, TrapKind> {
        let pc = self.registers.pc();
        let word = self.read_virtual(pc, Space::Instruction, self.psw.current_mode, Width::Word)?;
        self.registers.set_pc(pc.wrapping_add(2));
        Ok(word)
    }

    /// Kernel stack limit check after SP moved down to `sp`.
    ///
    /// A yellow-zone reference posts a deferred trap; a red-zone reference
    /// switches to the emergency stack and aborts.
    pub(crate) fn check_stack(&mut self, sp: u16) -> Result<(), TrapKind> {
        if !matches!(self.psw.current_mode, Mode::Kernel) {
            return Ok(());
        }
        match self.control.stack_zone(sp) {
            StackZone::Clear => Ok(()),
            StackZone::Yellow => {
                self.traps.set(TrapKind::YellowStack);
                self.control.cpu_error.yellow_zone = true;
                Ok(())
            }
            StackZone::Red => {
                self.control.cpu_error.red_zone = true;
                self.registers
                    .set_stack_pointer(Mode::Kernel, EMERGENCY_STACK);
                event!(Level::WARN, "kernel stack at {sp:o} entered the red zone");
                Err(TrapKind::RedStack)
            }
        }
    }

    /// Adds `delta` to `reg` and records the change in MMR1 unless the
    /// register is PC.
    pub(crate) fn step_register(&mut self, reg: GeneralRegister, delta: i16) -> u16 {
        let old = self.reg(reg);
        #[allow(clippy::cast_sign_loss)]
        let new = old.wrapping_add(delta as u16);
        self.set_reg(reg, new);
        if reg != GeneralRegister::PC {
            #[allow(clippy::cast_possible_truncation)]
            let index = reg.index() as u8;
            self.mmu.record_register_change(index, delta);
        }
        new
    }

    /// Evaluates an operand specifier, applying its register side effects.
    pub(crate) fn resolve(&mut self, operand: Operand, width: Width) -> Result<Location, TrapKind> {
        let reg = operand.reg;
        let data = self.data_space();
        let space = if reg == GeneralRegister::PC {
            Space::Instruction
        } else {
            data
        };
        let step = width.step(reg);
        let mode = self.psw.current_mode;
        let location = match operand.mode {
            AddressingMode::Register => Location::Register(reg),
            AddressingMode::RegisterDeferred => Location::Memory {
                va: self.reg(reg),
                space,
            },
            AddressingMode::Autoincrement => {
                let va = self.reg(reg);
                self.step_register(reg, step);
                Location::Memory { va, space }
            }
            AddressingMode::AutoincrementDeferred => {
                let pointer = self.reg(reg);
                self.step_register(reg, 2);
                let va = self.read_virtual(pointer, space, mode, Width::Word)?;
                Location::Memory { va, space: data }
            }
            AddressingMode::Autodecrement => {
                let va = self.step_register(reg, -step);
                if reg == GeneralRegister::SP {
                    self.check_stack(va)?;
                }
                Location::Memory { va, space }
            }
            AddressingMode::AutodecrementDeferred => {
                let pointer = self.step_register(reg, -2);
                if reg == GeneralRegister::SP {
                    self.check_stack(pointer)?;
                }
                let va = self.read_virtual(pointer, space, mode, Width::Word)?;
                Location::Memory { va, space: data }
            }
            AddressingMode::Index => {
                let offset = self.fetch_word()?;
                Location::Memory {
                    va: self.reg(reg).wrapping_add(offset),
                    space: data,
                }
            }
            AddressingMode::IndexDeferred => {
                let offset = self.fetch_word()?;
                let pointer = self.reg(reg).wrapping_add(offset);
                let va = self.read_virtual(pointer, data, mode, Width::Word)?;
                Location::Memory { va, space: data }
            }
        };
        Ok(location)
    }

    pub(crate) fn read_location(&mut self, location: Location, width: Width) -> Result<u16, TrapKind> {
        match location {
            Location::Register(reg) => {
                let value = self.reg(reg);
                Ok(match width {
                    Width::Word => value,
                    Width::Byte => value & 0o377,
                })
            }
            Location::Memory { va, space } => {
                self.read_virtual(va, space, self.psw.current_mode, width)
            }
        }
    }

    pub(crate) fn write_location(
        &mut self,
        location: Location,
        width: Width,
        value: u16,
    ) -> Result<(), TrapKind> {
        match location {
            Location::Register(reg) => {
                self.write_register(reg, width, value);
                Ok(())
            }
            Location::Memory { va, space } => {
                self.write_virtual(va, space, self.psw.current_mode, width, value)
            }
        }
    }

    /// Register write of an operation result; byte results replace only the
    /// low byte.
    fn write_register(&mut self, reg: GeneralRegister, width: Width, value: u16) {
        let value = match width {
            Width::Word => value,
            Width::Byte => (self.reg(reg) & 0o177_400) | (value & 0o377),
        };
        self.set_reg(reg, value);
    }

    /// Evaluates and reads a source operand.
    pub(crate) fn read_operand(&mut self, operand: Operand, width: Width) -> Result<u16, TrapKind> {
        let location = self.resolve(operand, width)?;
        self.read_location(location, width)
    }

    /// Opens a read-modify-write destination: the write permission is
    /// checked before the read, as the hardware does.
    pub(crate) fn open_update(
        &mut self,
        location: Location,
        width: Width,
    ) -> Result<(Target, u16), TrapKind> {
        match location {
            Location::Register(reg) => {
                let value = self.read_location(location, width)?;
                Ok((Target::Register(reg), value))
            }
            Location::Memory { va, space } => {
                let pa = self.locate(va, space, self.psw.current_mode, width, Access::Write)?;
                let value = self.read_physical_operand(pa, width)?;
                Ok((Target::Physical(pa), value))
            }
        }
    }

    /// Completes a read-modify-write destination.
    pub(crate) fn commit_update(
        &mut self,
        target: Target,
        width: Width,
        value: u16,
    ) -> Result<(), TrapKind> {
        match target {
            Target::Register(reg) => {
                self.write_register(reg, width, value);
                Ok(())
            }
            Target::Physical(pa) => self.write_physical_operand(pa, width, value),
        }
    }

    /// Pushes `value` on the current stack, recording the SP change.
    pub(crate) fn push(&mut self, value: u16) -> Result<(), TrapKind> {
        let sp = self.step_register(GeneralRegister::SP, -2);
        let space = self.data_space();
        self.write_virtual(sp, space, self.psw.current_mode, Width::Word, value)?;
        self.check_stack(sp)
    }

    /// Pushes `value` with the stack limit checked before the write, so a
    /// red zone abort leaves memory untouched.
    pub(crate) fn push_after_limit_check(&mut self, value: u16) -> Result<(), TrapKind> {
        let sp = self.step_register(GeneralRegister::SP, -2);
        self.check_stack(sp)?;
        let space = self.data_space();
        self.write_virtual(sp, space, self.psw.current_mode, Width::Word, value)
    }

    /// Reads the word at SP + `offset` in the current data space.
    pub(crate) fn peek_stack(&mut self, offset: u16) -> Result<u16, TrapKind> {
        let va = self.reg(GeneralRegister::SP).wrapping_add(offset);
        let space = self.data_space();
        self.read_virtual(va, space, self.psw.current_mode, Width::Word)
    }

    /// Pops a word, recording the SP change.
    pub(crate) fn pop(&mut self) -> Result<u16, TrapKind> {
        let value = self.peek_stack(0)?;
        self.step_register(GeneralRegister::SP, 2);
        Ok(value)
    }

    /// Raises SP by `bytes` without touching MMR1.
    pub(crate) fn drop_stack(&mut self, bytes: u16) {
        let sp = self.reg(GeneralRegister::SP);
        self.set_reg(GeneralRegister::SP, sp.wrapping_add(bytes));
    }
}
