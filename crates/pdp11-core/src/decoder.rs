//! Instruction decoder for the 11/70 base and EIS instruction sets.
//!
//! Decoding is a pure function of the instruction word. Extension words
//! (index offsets, immediates, absolute addresses) are fetched later by the
//! effective-address stage, so a decoded [`Instruction`] only carries the
//! operand specifiers.

#![allow(missing_docs)]

use crate::memory::Width;
use crate::mmu::Space;
use crate::state::GeneralRegister;
use crate::TrapKind;

/// The eight operand addressing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingMode {
    Register = 0,
    RegisterDeferred = 1,
    Autoincrement = 2,
    AutoincrementDeferred = 3,
    Autodecrement = 4,
    AutodecrementDeferred = 5,
    Index = 6,
    IndexDeferred = 7,
}

impl AddressingMode {
    pub const ALL: [Self; 8] = [
        Self::Register,
        Self::RegisterDeferred,
        Self::Autoincrement,
        Self::AutoincrementDeferred,
        Self::Autodecrement,
        Self::AutodecrementDeferred,
        Self::Index,
        Self::IndexDeferred,
    ];

    /// Converts a 3-bit mode field.
    #[must_use]
    pub const fn from_u3(value: u8) -> Self {
        Self::ALL[(value & 0o7) as usize]
    }

    /// Returns `true` for the deferred (odd-numbered) modes.
    #[must_use]
    pub const fn is_deferred(self) -> bool {
        (self as u8) & 1 != 0
    }
}

/// A six-bit operand specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand {
    pub mode: AddressingMode,
    pub reg: GeneralRegister,
}

impl Operand {
    /// Splits the low six bits of `bits` into mode and register.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let bits = (bits & 0o77) as u8;
        Self {
            mode: AddressingMode::from_u3(bits >> 3),
            reg: GeneralRegister::from_u3(bits),
        }
    }

    /// Packs the specifier back into six bits.
    #[must_use]
    pub const fn bits(self) -> u16 {
        ((self.mode as u16) << 3) | self.reg.index() as u16
    }

    /// Returns `true` when the specifier consumes an extension word.
    #[must_use]
    pub const fn has_extension_word(self) -> bool {
        match self.mode {
            AddressingMode::Index | AddressingMode::IndexDeferred => true,
            AddressingMode::Autoincrement | AddressingMode::AutoincrementDeferred => {
                matches!(self.reg, GeneralRegister::R7)
            }
            _ => false,
        }
    }
}

/// Single-operand arithmetic and shift group, available as word and byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SingleOp {
    Clr,
    Com,
    Inc,
    Dec,
    Neg,
    Adc,
    Sbc,
    Tst,
    Ror,
    Rol,
    Asr,
    Asl,
}

impl SingleOp {
    /// Returns `true` when the operation does not write its operand.
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::Tst)
    }

    /// Returns `true` when the operation never reads its operand.
    #[must_use]
    pub const fn is_write_only(self) -> bool {
        matches!(self, Self::Clr)
    }
}

/// Double-operand group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoubleOp {
    Mov,
    Cmp,
    Bit,
    Bic,
    Bis,
    /// Word only.
    Add,
    /// Word only.
    Sub,
}

impl DoubleOp {
    /// Returns `true` when the destination is only read.
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::Cmp | Self::Bit)
    }
}

/// Extended instruction set register-source group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EisOp {
    Mul,
    Div,
    Ash,
    Ashc,
}

/// Branch conditions in opcode order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchCondition {
    Always,
    Ne,
    Eq,
    Ge,
    Lt,
    Gt,
    Le,
    Pl,
    Mi,
    Hi,
    Los,
    Vc,
    Vs,
    Cc,
    Cs,
}

impl BranchCondition {
    /// Evaluates the condition against the condition codes.
    #[must_use]
    pub const fn holds(self, n: bool, z: bool, v: bool, c: bool) -> bool {
        match self {
            Self::Always => true,
            Self::Ne => !z,
            Self::Eq => z,
            Self::Ge => n == v,
            Self::Lt => n != v,
            Self::Gt => !z && n == v,
            Self::Le => z || n != v,
            Self::Pl => !n,
            Self::Mi => n,
            Self::Hi => !c && !z,
            Self::Los => c || z,
            Self::Vc => !v,
            Self::Vs => v,
            Self::Cc => !c,
            Self::Cs => c,
        }
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    Halt,
    Wait,
    Rti,
    Bpt,
    Iot,
    Reset,
    Rtt,
    Jmp {
        dst: Operand,
    },
    Rts {
        reg: GeneralRegister,
    },
    Spl {
        level: u8,
    },
    /// `CLx`/`SEx` family: `set` selects SEx, `mask` holds the NZVC bits.
    ConditionCodes {
        set: bool,
        mask: u16,
    },
    Swab {
        dst: Operand,
    },
    /// Conditional branch; the target is `PC + 2 * offset`.
    Branch {
        condition: BranchCondition,
        offset: i8,
    },
    Jsr {
        reg: GeneralRegister,
        dst: Operand,
    },
    Single {
        op: SingleOp,
        width: Width,
        dst: Operand,
    },
    Mark {
        count: u8,
    },
    /// `MFPI`/`MFPD`.
    MoveFromPrevious {
        space: Space,
        src: Operand,
    },
    /// `MTPI`/`MTPD`.
    MoveToPrevious {
        space: Space,
        dst: Operand,
    },
    Sxt {
        dst: Operand,
    },
    Double {
        op: DoubleOp,
        width: Width,
        src: Operand,
        dst: Operand,
    },
    Eis {
        op: EisOp,
        reg: GeneralRegister,
        src: Operand,
    },
    Xor {
        reg: GeneralRegister,
        dst: Operand,
    },
    /// Subtract one and branch back `2 * offset` bytes if non-zero.
    Sob {
        reg: GeneralRegister,
        offset: u8,
    },
    Emt {
        code: u8,
    },
    Trap {
        code: u8,
    },
}

/// Instruction decoder.
pub struct Decoder;

const fn dst(word: u16) -> Operand {
    Operand::from_bits(word)
}

const fn src(word: u16) -> Operand {
    Operand::from_bits(word >> 6)
}

const fn reg(word: u16) -> GeneralRegister {
    #[allow(clippy::cast_possible_truncation)]
    let bits = (word >> 6) as u8;
    GeneralRegister::from_u3(bits)
}

const fn low_byte(word: u16) -> u8 {
    #[allow(clippy::cast_possible_truncation)]
    let byte = word as u8;
    byte
}

const fn branch(condition: BranchCondition, word: u16) -> Instruction {
    #[allow(clippy::cast_possible_wrap)]
    let offset = low_byte(word) as i8;
    Instruction::Branch { condition, offset }
}

const SINGLE_OPS: [SingleOp; 8] = [
    SingleOp::Clr,
    SingleOp::Com,
    SingleOp::Inc,
    SingleOp::Dec,
    SingleOp::Neg,
    SingleOp::Adc,
    SingleOp::Sbc,
    SingleOp::Tst,
];

const SHIFT_OPS: [SingleOp; 4] = [SingleOp::Ror, SingleOp::Rol, SingleOp::Asr, SingleOp::Asl];

const BYTE_BRANCHES: [BranchCondition; 8] = [
    BranchCondition::Pl,
    BranchCondition::Mi,
    BranchCondition::Hi,
    BranchCondition::Los,
    BranchCondition::Vc,
    BranchCondition::Vs,
    BranchCondition::Cc,
    BranchCondition::Cs,
];

const WORD_BRANCHES: [BranchCondition; 7] = [
    BranchCondition::Always,
    BranchCondition::Ne,
    BranchCondition::Eq,
    BranchCondition::Ge,
    BranchCondition::Lt,
    BranchCondition::Gt,
    BranchCondition::Le,
];

const DOUBLE_OPS: [DoubleOp; 5] = [
    DoubleOp::Mov,
    DoubleOp::Cmp,
    DoubleOp::Bit,
    DoubleOp::Bic,
    DoubleOp::Bis,
];

impl Decoder {
    /// Decodes one instruction word.
    ///
    /// # Errors
    ///
    /// Returns [`TrapKind::IllegalInstruction`] for reserved encodings and
    /// for the floating point, commercial and other optional instructions
    /// this core does not implement.
    pub const fn decode(word: u16) -> Result<Instruction, TrapKind> {
        let byte_group = word & 0o100_000 != 0;
        let width = if byte_group { Width::Byte } else { Width::Word };
        let top = (word >> 12) & 0o7;

        match top {
            1..=5 => {
                let op = DOUBLE_OPS[top as usize - 1];
                return Ok(Instruction::Double {
                    op,
                    width,
                    src: src(word),
                    dst: dst(word),
                });
            }
            6 => {
                let op = if byte_group { DoubleOp::Sub } else { DoubleOp::Add };
                return Ok(Instruction::Double {
                    op,
                    width: Width::Word,
                    src: src(word),
                    dst: dst(word),
                });
            }
            7 if !byte_group => return Self::decode_eis(word),
            7 => return Err(TrapKind::IllegalInstruction),
            _ => {}
        }

        if byte_group {
            Self::decode_byte_group(word, width)
        } else {
            Self::decode_word_group(word)
        }
    }

    const fn decode_eis(word: u16) -> Result<Instruction, TrapKind> {
        let reg = reg(word);
        match (word >> 9) & 0o7 {
            0 => Ok(Instruction::Eis {
                op: EisOp::Mul,
                reg,
                src: dst(word),
            }),
            1 => Ok(Instruction::Eis {
                op: EisOp::Div,
                reg,
                src: dst(word),
            }),
            2 => Ok(Instruction::Eis {
                op: EisOp::Ash,
                reg,
                src: dst(word),
            }),
            3 => Ok(Instruction::Eis {
                op: EisOp::Ashc,
                reg,
                src: dst(word),
            }),
            4 => Ok(Instruction::Xor { reg, dst: dst(word) }),
            7 => {
                #[allow(clippy::cast_possible_truncation)]
                let offset = (word & 0o77) as u8;
                Ok(Instruction::Sob { reg, offset })
            }
            _ => Err(TrapKind::IllegalInstruction),
        }
    }

    const fn decode_word_group(word: u16) -> Result<Instruction, TrapKind> {
        let group = (word >> 6) & 0o777;
        match group {
            0o000 => match word {
                0 => Ok(Instruction::Halt),
                1 => Ok(Instruction::Wait),
                2 => Ok(Instruction::Rti),
                3 => Ok(Instruction::Bpt),
                4 => Ok(Instruction::Iot),
                5 => Ok(Instruction::Reset),
                6 => Ok(Instruction::Rtt),
                _ => Err(TrapKind::IllegalInstruction),
            },
            0o001 => Ok(Instruction::Jmp { dst: dst(word) }),
            0o002 => match (word >> 3) & 0o7 {
                0 => Ok(Instruction::Rts {
                    reg: GeneralRegister::from_u3(low_byte(word)),
                }),
                3 => Ok(Instruction::Spl {
                    level: low_byte(word) & 0o7,
                }),
                4..=7 => Ok(Instruction::ConditionCodes {
                    set: word & 0o20 != 0,
                    mask: word & 0o17,
                }),
                _ => Err(TrapKind::IllegalInstruction),
            },
            0o003 => Ok(Instruction::Swab { dst: dst(word) }),
            0o004..=0o037 => Ok(branch(WORD_BRANCHES[(group >> 2) as usize - 1], word)),
            0o040..=0o047 => Ok(Instruction::Jsr {
                reg: reg(word),
                dst: dst(word),
            }),
            0o050..=0o057 => Ok(Instruction::Single {
                op: SINGLE_OPS[(group & 0o7) as usize],
                width: Width::Word,
                dst: dst(word),
            }),
            0o060..=0o063 => Ok(Instruction::Single {
                op: SHIFT_OPS[(group & 0o3) as usize],
                width: Width::Word,
                dst: dst(word),
            }),
            0o064 => Ok(Instruction::Mark {
                count: low_byte(word) & 0o77,
            }),
            0o065 => Ok(Instruction::MoveFromPrevious {
                space: Space::Instruction,
                src: dst(word),
            }),
            0o066 => Ok(Instruction::MoveToPrevious {
                space: Space::Instruction,
                dst: dst(word),
            }),
            0o067 => Ok(Instruction::Sxt { dst: dst(word) }),
            _ => Err(TrapKind::IllegalInstruction),
        }
    }

    const fn decode_byte_group(word: u16, width: Width) -> Result<Instruction, TrapKind> {
        let group = (word >> 6) & 0o777;
        match group {
            0o000..=0o037 => Ok(branch(BYTE_BRANCHES[(group >> 2) as usize], word)),
            0o040..=0o043 => Ok(Instruction::Emt {
                code: low_byte(word),
            }),
            0o044..=0o047 => Ok(Instruction::Trap {
                code: low_byte(word),
            }),
            0o050..=0o057 => Ok(Instruction::Single {
                op: SINGLE_OPS[(group & 0o7) as usize],
                width,
                dst: dst(word),
            }),
            0o060..=0o063 => Ok(Instruction::Single {
                op: SHIFT_OPS[(group & 0o3) as usize],
                width,
                dst: dst(word),
            }),
            0o065 => Ok(Instruction::MoveFromPrevious {
                space: Space::Data,
                src: dst(word),
            }),
            0o066 => Ok(Instruction::MoveToPrevious {
                space: Space::Data,
                dst: dst(word),
            }),
            _ => Err(TrapKind::IllegalInstruction),
        }
    }
}
