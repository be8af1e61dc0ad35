//! Access kinds and alignment policy shared by memory and the I/O page.

use crate::state::GeneralRegister;
use crate::TrapKind;

/// Operand width of a memory reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    /// 16-bit reference; the address must be even.
    Word,
    /// 8-bit reference at any address.
    Byte,
}

impl Width {
    /// Autoincrement/autodecrement step of `reg`. `SP` and `PC` always
    /// step by two so they stay word aligned.
    #[must_use]
    pub const fn step(self, reg: GeneralRegister) -> i16 {
        match self {
            Self::Byte if reg.index() < 6 => 1,
            _ => 2,
        }
    }
}

/// How an I/O page device is being accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    /// Program word reference.
    Word,
    /// Program byte reference; the address's low bit selects the byte.
    Byte,
    /// Debugger/console word reference; devices should not apply read side
    /// effects such as clearing status bits.
    Console,
}

impl AccessKind {
    /// Returns `true` for byte references.
    #[must_use]
    pub const fn is_byte(self) -> bool {
        matches!(self, Self::Byte)
    }

    /// Maps an operand width to the program access kind.
    #[must_use]
    pub const fn for_width(width: Width) -> Self {
        match width {
            Width::Word => Self::Word,
            Width::Byte => Self::Byte,
        }
    }
}

/// Validates alignment for 16-bit virtual references.
///
/// # Errors
///
/// Returns [`TrapKind::OddAddress`] when `addr` is odd.
pub const fn validate_word_alignment(addr: u16) -> Result<(), TrapKind> {
    if addr & 1 == 0 {
        Ok(())
    } else {
        Err(TrapKind::OddAddress)
    }
}

#[cfg(test)]
mod tests {
    use super::{validate_word_alignment, AccessKind, Width};
    use crate::state::GeneralRegister;
    use crate::TrapKind;

    #[test]
    fn word_alignment_outcome_is_deterministic_for_all_addresses() {
        for addr in 0_u16..=u16::MAX {
            if addr & 1 == 0 {
                assert_eq!(validate_word_alignment(addr), Ok(()));
            } else {
                assert_eq!(validate_word_alignment(addr), Err(TrapKind::OddAddress));
            }
        }
    }

    #[test]
    fn width_steps_and_access_kinds_agree() {
        assert_eq!(Width::Word.step(GeneralRegister::R3), 2);
        assert_eq!(Width::Byte.step(GeneralRegister::R5), 1);
        assert_eq!(Width::Byte.step(GeneralRegister::SP), 2);
        assert_eq!(Width::Byte.step(GeneralRegister::PC), 2);
        assert!(AccessKind::for_width(Width::Byte).is_byte());
        assert!(!AccessKind::for_width(Width::Word).is_byte());
        assert!(!AccessKind::Console.is_byte());
    }
}
