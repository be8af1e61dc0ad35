use super::psw::{Mode, RegisterSet};

/// Number of architecturally visible general-purpose registers (`R0..R7`).
pub const GENERAL_REGISTER_COUNT: usize = 8;
/// Number of registers duplicated per register set (`R0..R5`).
pub const BANKED_REGISTER_COUNT: usize = 6;
/// Number of mode-indexed stack pointers.
pub const STACK_POINTER_COUNT: usize = 4;

/// Architecturally visible general-purpose register identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum GeneralRegister {
    R0 = 0,
    R1 = 1,
    R2 = 2,
    R3 = 3,
    R4 = 4,
    R5 = 5,
    R6 = 6,
    R7 = 7,
}

impl GeneralRegister {
    /// Stack pointer alias for `R6`.
    pub const SP: Self = Self::R6;
    /// Program counter alias for `R7`.
    pub const PC: Self = Self::R7;

    /// Ordered list of all architectural general-purpose registers.
    pub const ALL: [Self; GENERAL_REGISTER_COUNT] = [
        Self::R0,
        Self::R1,
        Self::R2,
        Self::R3,
        Self::R4,
        Self::R5,
        Self::R6,
        Self::R7,
    ];

    /// Returns the array index for this register (`0..=7`).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Decodes a 3-bit register field; only the low three bits are used.
    #[must_use]
    pub const fn from_u3(bits: u8) -> Self {
        Self::ALL[(bits & 0o7) as usize]
    }
}

/// Both general register banks, the four stack pointers and the PC.
///
/// `R6` resolves to the stack pointer of the requested mode and `R0..R5`
/// to the requested bank at access time, so switching mode or register set
/// never copies registers around.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegisterFile {
    banks: [[u16; BANKED_REGISTER_COUNT]; 2],
    stack: [u16; STACK_POINTER_COUNT],
    pc: u16,
}

impl RegisterFile {
    /// Reads `reg` as seen with register set `set` in mode `mode`.
    #[must_use]
    pub const fn get(&self, reg: GeneralRegister, set: RegisterSet, mode: Mode) -> u16 {
        match reg {
            GeneralRegister::R6 => self.stack[mode.index()],
            GeneralRegister::R7 => self.pc,
            _ => self.banks[set.index()][reg.index()],
        }
    }

    /// Writes `reg` as seen with register set `set` in mode `mode`.
    pub const fn set(&mut self, reg: GeneralRegister, set: RegisterSet, mode: Mode, value: u16) {
        match reg {
            GeneralRegister::R6 => self.stack[mode.index()] = value,
            GeneralRegister::R7 => self.pc = value,
            _ => self.banks[set.index()][reg.index()] = value,
        }
    }

    /// Reads the stack pointer of `mode`.
    #[must_use]
    pub const fn stack_pointer(&self, mode: Mode) -> u16 {
        self.stack[mode.index()]
    }

    /// Writes the stack pointer of `mode`.
    pub const fn set_stack_pointer(&mut self, mode: Mode, value: u16) {
        self.stack[mode.index()] = value;
    }

    /// Reads the program counter.
    #[must_use]
    pub const fn pc(&self) -> u16 {
        self.pc
    }

    /// Writes the program counter.
    pub const fn set_pc(&mut self, value: u16) {
        self.pc = value;
    }
}
