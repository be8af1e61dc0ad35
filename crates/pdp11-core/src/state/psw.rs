//! Processor status word model.

/// PSW current-mode field shift.
pub const PSW_CM_SHIFT: u16 = 14;
/// PSW previous-mode field shift.
pub const PSW_PM_SHIFT: u16 = 12;
/// PSW register-set select bit.
pub const PSW_RS: u16 = 0o4000;
/// PSW interrupt priority level field shift.
pub const PSW_IPL_SHIFT: u16 = 5;
/// PSW trace-trap bit.
pub const PSW_T: u16 = 0o20;
/// Negative condition code.
pub const PSW_N: u16 = 0o10;
/// Zero condition code.
pub const PSW_Z: u16 = 0o4;
/// Overflow condition code.
pub const PSW_V: u16 = 0o2;
/// Carry condition code.
pub const PSW_C: u16 = 0o1;
/// Mask of the four condition codes.
pub const PSW_CC: u16 = PSW_N | PSW_Z | PSW_V | PSW_C;
/// Bits implemented by the 11/70 PSW.
pub const PSW_IMPLEMENTED: u16 = 0o174_377;

/// Processor mode selected by the PSW mode fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum Mode {
    /// Kernel mode; the only mode allowed to run privileged instructions.
    #[default]
    Kernel = 0,
    /// Supervisor mode.
    Supervisor = 1,
    /// Reserved mode encoding; every translation in it aborts.
    Unused = 2,
    /// User mode.
    User = 3,
}

impl Mode {
    /// Every mode in encoding order.
    pub const ALL: [Self; 4] = [Self::Kernel, Self::Supervisor, Self::Unused, Self::User];

    /// Decodes the low two bits of `bits`.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        match bits & 0o3 {
            0 => Self::Kernel,
            1 => Self::Supervisor,
            2 => Self::Unused,
            _ => Self::User,
        }
    }

    /// Returns the two-bit encoding.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self as u16
    }

    /// Returns the mode as a table index.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// General register bank selected by the PSW register-set bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RegisterSet {
    /// Register set 0.
    #[default]
    Primary,
    /// Register set 1.
    Alternate,
}

impl RegisterSet {
    /// Returns the bank index.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Alternate => 1,
        }
    }
}

/// Decomposed processor status word.
///
/// The packed word only exists at the boundaries that need it: trap pushes,
/// the memory-mapped PSW register, and introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(clippy::struct_excessive_bools)]
pub struct ProcessorStatus {
    /// Current processor mode.
    pub current_mode: Mode,
    /// Mode in effect before the last trap or interrupt.
    pub previous_mode: Mode,
    /// Active general register bank.
    pub register_set: RegisterSet,
    /// Interrupt priority level, `0..=7`.
    pub ipl: u8,
    /// Trace-trap enable.
    pub trace: bool,
    /// Negative.
    pub n: bool,
    /// Zero.
    pub z: bool,
    /// Overflow.
    pub v: bool,
    /// Carry.
    pub c: bool,
}

impl ProcessorStatus {
    /// Unpacks an architectural PSW word; unimplemented bits are ignored.
    #[must_use]
    pub const fn from_word(word: u16) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let ipl = ((word >> PSW_IPL_SHIFT) & 0o7) as u8;
        Self {
            current_mode: Mode::from_bits(word >> PSW_CM_SHIFT),
            previous_mode: Mode::from_bits(word >> PSW_PM_SHIFT),
            register_set: if word & PSW_RS == 0 {
                RegisterSet::Primary
            } else {
                RegisterSet::Alternate
            },
            ipl,
            trace: word & PSW_T != 0,
            n: word & PSW_N != 0,
            z: word & PSW_Z != 0,
            v: word & PSW_V != 0,
            c: word & PSW_C != 0,
        }
    }

    /// Packs the fields into the architectural PSW word.
    #[must_use]
    pub const fn to_word(self) -> u16 {
        let mut word = (self.current_mode.bits() << PSW_CM_SHIFT)
            | (self.previous_mode.bits() << PSW_PM_SHIFT)
            | ((self.ipl as u16 & 0o7) << PSW_IPL_SHIFT);
        if matches!(self.register_set, RegisterSet::Alternate) {
            word |= PSW_RS;
        }
        if self.trace {
            word |= PSW_T;
        }
        word | self.condition_codes()
    }

    /// Returns the condition codes as the low four PSW bits.
    #[must_use]
    pub const fn condition_codes(self) -> u16 {
        let mut cc = 0;
        if self.n {
            cc |= PSW_N;
        }
        if self.z {
            cc |= PSW_Z;
        }
        if self.v {
            cc |= PSW_V;
        }
        if self.c {
            cc |= PSW_C;
        }
        cc
    }

    /// Loads the condition codes from the low four bits of `cc`.
    pub const fn set_condition_codes(&mut self, cc: u16) {
        self.n = cc & PSW_N != 0;
        self.z = cc & PSW_Z != 0;
        self.v = cc & PSW_V != 0;
        self.c = cc & PSW_C != 0;
    }

    /// Sets N and Z from a 16-bit result and clears V.
    pub const fn set_nz_word(&mut self, result: u16) {
        self.n = result & 0o100_000 != 0;
        self.z = result == 0;
        self.v = false;
    }

    /// Applies a PSW popped by `RTI`/`RTT` outside kernel mode.
    ///
    /// Mode and register-set bits can only be ORed in and the IPL is
    /// preserved; trace and condition codes load normally.
    pub const fn restore_protected(&mut self, word: u16) {
        let incoming = Self::from_word(word);
        self.current_mode = Mode::from_bits(self.current_mode.bits() | incoming.current_mode.bits());
        self.previous_mode =
            Mode::from_bits(self.previous_mode.bits() | incoming.previous_mode.bits());
        if matches!(incoming.register_set, RegisterSet::Alternate) {
            self.register_set = RegisterSet::Alternate;
        }
        self.trace = incoming.trace;
        self.n = incoming.n;
        self.z = incoming.z;
        self.v = incoming.v;
        self.c = incoming.c;
    }
}
