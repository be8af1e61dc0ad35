//! CPU control registers outside the PSW: stack limit, programmed interrupt
//! requests and the CPU error register.

/// Writable bits of the stack limit register.
pub const STACK_LIMIT_MASK: u16 = 0o177_400;
/// Offset above the stack limit below which a yellow-zone trap is raised.
pub const STACK_YELLOW_OFFSET: u16 = 0o400;
/// Offset above the stack limit below which the red zone begins.
pub const STACK_RED_OFFSET: u16 = 0o340;
/// Kernel stack pointer loaded when the red zone is entered.
pub const EMERGENCY_STACK: u16 = 0o4;
/// Writable request bits of the PIRQ register (levels 1-7 in bits 9-15).
pub const PIRQ_REQUEST_MASK: u16 = 0o177_000;
/// Vector of every programmed interrupt request.
pub const PIRQ_VECTOR: u16 = 0o240;

/// Position of a kernel stack address relative to the stack limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackZone {
    /// At or above the yellow boundary.
    Clear,
    /// Between the red and yellow boundaries; a deferred trap is due.
    Yellow,
    /// Below the red boundary; the reference aborts.
    Red,
}

/// CPU error register, decomposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(clippy::struct_excessive_bools)]
pub struct CpuErrorFlags {
    /// `HALT` attempted outside kernel mode.
    pub illegal_halt: bool,
    /// Odd address reference.
    pub odd_address: bool,
    /// Reference to non-existent main memory.
    pub non_existent_memory: bool,
    /// I/O page reference timed out.
    pub io_timeout: bool,
    /// Yellow zone stack violation.
    pub yellow_zone: bool,
    /// Red zone stack violation.
    pub red_zone: bool,
}

impl CpuErrorFlags {
    const ILLEGAL_HALT: u16 = 0o200;
    const ODD_ADDRESS: u16 = 0o100;
    const NON_EXISTENT: u16 = 0o40;
    const IO_TIMEOUT: u16 = 0o20;
    const YELLOW: u16 = 0o10;
    const RED: u16 = 0o4;

    /// Packs the flags into the register word.
    #[must_use]
    pub const fn to_word(self) -> u16 {
        let mut word = 0;
        if self.illegal_halt {
            word |= Self::ILLEGAL_HALT;
        }
        if self.odd_address {
            word |= Self::ODD_ADDRESS;
        }
        if self.non_existent_memory {
            word |= Self::NON_EXISTENT;
        }
        if self.io_timeout {
            word |= Self::IO_TIMEOUT;
        }
        if self.yellow_zone {
            word |= Self::YELLOW;
        }
        if self.red_zone {
            word |= Self::RED;
        }
        word
    }

    /// Unpacks a register word.
    #[must_use]
    pub const fn from_word(word: u16) -> Self {
        Self {
            illegal_halt: word & Self::ILLEGAL_HALT != 0,
            odd_address: word & Self::ODD_ADDRESS != 0,
            non_existent_memory: word & Self::NON_EXISTENT != 0,
            io_timeout: word & Self::IO_TIMEOUT != 0,
            yellow_zone: word & Self::YELLOW != 0,
            red_zone: word & Self::RED != 0,
        }
    }
}

/// Control registers owned by the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ControlRegisters {
    /// Kernel stack limit, high byte only.
    pub stack_limit: u16,
    /// Programmed interrupt request bits (9-15) plus the derived priority
    /// fields in bits 7:5 and 3:1.
    pub pirq: u16,
    /// CPU error register.
    pub cpu_error: CpuErrorFlags,
}

impl ControlRegisters {
    /// Loads the PIRQ request bits and recomputes the priority fields.
    pub const fn set_pirq(&mut self, value: u16) {
        let requests = value & PIRQ_REQUEST_MASK;
        let level = Self::pirq_level(requests);
        self.pirq = requests | ((level as u16) << 5) | ((level as u16) << 1);
    }

    /// Returns the highest requested programmed interrupt level, or `0`.
    #[must_use]
    pub const fn pirq_level(requests: u16) -> u8 {
        let requests = requests & PIRQ_REQUEST_MASK;
        if requests == 0 {
            0
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let level = (15 - requests.leading_zeros()) as u8 - 8;
            level
        }
    }

    /// Sets the stack limit; only the high byte is kept.
    pub const fn set_stack_limit(&mut self, value: u16) {
        self.stack_limit = value & STACK_LIMIT_MASK;
    }

    /// Lowest kernel stack address that does not raise a yellow-zone trap.
    ///
    /// Computed without wrapping: a limit of `0o177400` puts every stack
    /// address in the yellow zone.
    #[must_use]
    pub const fn yellow_boundary(&self) -> u32 {
        self.stack_limit as u32 + STACK_YELLOW_OFFSET as u32
    }

    /// Lowest kernel stack address outside the red zone.
    #[must_use]
    pub const fn red_boundary(&self) -> u32 {
        self.stack_limit as u32 + STACK_RED_OFFSET as u32
    }

    /// Classifies a kernel stack address against the limit.
    #[must_use]
    pub const fn stack_zone(&self, sp: u16) -> StackZone {
        let sp = sp as u32;
        if sp >= self.yellow_boundary() {
            StackZone::Clear
        } else if sp >= self.red_boundary() {
            StackZone::Yellow
        } else {
            StackZone::Red
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ControlRegisters, CpuErrorFlags, StackZone};

    #[test]
    fn pirq_priority_fields_track_highest_request() {
        let mut control = ControlRegisters::default();

        control.set_pirq(0o001_000);
        assert_eq!(control.pirq, 0o001_042);

        control.set_pirq(0o101_000);
        assert_eq!(control.pirq, 0o101_356);

        control.set_pirq(0o377);
        assert_eq!(control.pirq, 0);
    }

    #[test]
    fn stack_limit_keeps_only_high_byte() {
        let mut control = ControlRegisters::default();
        control.set_stack_limit(0o1377);
        assert_eq!(control.stack_limit, 0o1000);
        assert_eq!(control.yellow_boundary(), 0o1400);
        assert_eq!(control.red_boundary(), 0o1340);
        assert_eq!(control.stack_zone(0o1400), StackZone::Clear);
        assert_eq!(control.stack_zone(0o1376), StackZone::Yellow);
        assert_eq!(control.stack_zone(0o1340), StackZone::Yellow);
        assert_eq!(control.stack_zone(0o1336), StackZone::Red);

        control.set_stack_limit(0o177_400);
        assert_eq!(control.stack_zone(0o177_776), StackZone::Yellow);
    }

    #[test]
    fn cpu_error_word_roundtrip() {
        for word in [0, 0o4, 0o10, 0o20, 0o40, 0o100, 0o200, 0o374] {
            assert_eq!(CpuErrorFlags::from_word(word).to_word(), word);
        }
    }
}
