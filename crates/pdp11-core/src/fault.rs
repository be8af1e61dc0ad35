use thiserror::Error;

use crate::PhysAddr;

/// Synchronous trap conditions, declared in descending priority order.
///
/// The discriminant is the bit position inside a [`TrapSet`]; a lower value
/// always wins arbitration against a higher one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum TrapKind {
    /// Kernel stack pushed below the red zone, or a kernel context push failed.
    #[error("red zone stack violation")]
    RedStack = 0,
    /// Word access at an odd address.
    #[error("odd address")]
    OddAddress = 1,
    /// Memory management abort (non-resident, page length or read-only).
    #[error("memory management abort")]
    MemoryManagement = 2,
    /// Physical address not backed by memory or a responding device.
    #[error("non-existent memory")]
    NonExistentMemory = 3,
    /// Memory parity error.
    #[error("memory parity error")]
    Parity = 4,
    /// Privileged operation attempted outside kernel mode.
    #[error("privilege violation")]
    Privilege = 5,
    /// Reserved or unimplemented instruction.
    #[error("illegal instruction")]
    IllegalInstruction = 6,
    /// `BPT` instruction.
    #[error("breakpoint")]
    Breakpoint = 7,
    /// `IOT` instruction.
    #[error("iot")]
    Iot = 8,
    /// `EMT` instruction.
    #[error("emulator trap")]
    Emt = 9,
    /// `TRAP` instruction.
    #[error("trap instruction")]
    Trap = 10,
    /// Trace bit set at instruction fetch.
    #[error("trace")]
    Trace = 11,
    /// Kernel stack pushed into the yellow zone.
    #[error("yellow zone stack violation")]
    YellowStack = 12,
    /// Power failure.
    #[error("power fail")]
    PowerFail = 13,
    /// Floating point exception.
    #[error("floating point exception")]
    FloatingPoint = 14,
}

impl TrapKind {
    /// Every trap kind, highest priority first.
    pub const ALL: [Self; 15] = [
        Self::RedStack,
        Self::OddAddress,
        Self::MemoryManagement,
        Self::NonExistentMemory,
        Self::Parity,
        Self::Privilege,
        Self::IllegalInstruction,
        Self::Breakpoint,
        Self::Iot,
        Self::Emt,
        Self::Trap,
        Self::Trace,
        Self::YellowStack,
        Self::PowerFail,
        Self::FloatingPoint,
    ];

    /// Returns the priority bit position of this trap (`0` is highest).
    #[must_use]
    pub const fn bit(self) -> u8 {
        self as u8
    }

    /// Returns the trap for a priority bit position.
    #[must_use]
    pub const fn from_bit(bit: u8) -> Option<Self> {
        if (bit as usize) < Self::ALL.len() {
            Some(Self::ALL[bit as usize])
        } else {
            None
        }
    }

    /// Returns the kernel data-space vector address of this trap.
    #[must_use]
    pub const fn vector(self) -> u16 {
        match self {
            Self::RedStack
            | Self::OddAddress
            | Self::NonExistentMemory
            | Self::Privilege
            | Self::YellowStack => 0o4,
            Self::MemoryManagement => 0o250,
            Self::Parity => 0o114,
            Self::IllegalInstruction => 0o10,
            Self::Breakpoint | Self::Trace => 0o14,
            Self::Iot => 0o20,
            Self::Emt => 0o30,
            Self::Trap => 0o34,
            Self::PowerFail => 0o24,
            Self::FloatingPoint => 0o244,
        }
    }

    /// Returns the pending traps resolved when this trap is taken.
    ///
    /// The set always contains the trap itself.
    #[must_use]
    pub const fn clears(self) -> TrapSet {
        let own = TrapSet::EMPTY.with(self);
        match self {
            Self::RedStack => own
                .with(Self::Parity)
                .with(Self::YellowStack)
                .with(Self::Trace)
                .with(Self::OddAddress)
                .with(Self::NonExistentMemory),
            Self::OddAddress | Self::MemoryManagement | Self::NonExistentMemory => own
                .with(Self::Parity)
                .with(Self::YellowStack)
                .with(Self::Trace),
            Self::Parity
            | Self::Privilege
            | Self::IllegalInstruction
            | Self::Breakpoint
            | Self::Iot
            | Self::Emt
            | Self::Trap => own.with(Self::Trace),
            Self::Trace | Self::YellowStack | Self::PowerFail | Self::FloatingPoint => own,
        }
    }

    /// Returns `true` for the stack-limit traps, which never re-trigger a
    /// stack check when they are vectored.
    #[must_use]
    pub const fn is_stack_trap(self) -> bool {
        matches!(self, Self::RedStack | Self::YellowStack)
    }
}

/// Bitfield of pending synchronous traps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TrapSet(u16);

impl TrapSet {
    /// No trap pending.
    pub const EMPTY: Self = Self(0);

    const MASK: u16 = (1 << TrapKind::ALL.len()) - 1;

    /// Builds a set from raw bits; bits above the defined traps are dropped.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits & Self::MASK)
    }

    /// Returns the raw bitfield.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Returns a copy of this set with `kind` added.
    #[must_use]
    pub const fn with(self, kind: TrapKind) -> Self {
        Self(self.0 | (1 << kind.bit()))
    }

    /// Marks `kind` pending.
    pub const fn set(&mut self, kind: TrapKind) {
        self.0 |= 1 << kind.bit();
    }

    /// Clears `kind`.
    pub const fn clear(&mut self, kind: TrapKind) {
        self.0 &= !(1 << kind.bit());
    }

    /// Returns `true` when `kind` is pending.
    #[must_use]
    pub const fn contains(self, kind: TrapKind) -> bool {
        self.0 & (1 << kind.bit()) != 0
    }

    /// Returns `true` when no trap is pending.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns the highest-priority pending trap without clearing anything.
    #[must_use]
    pub const fn highest(self) -> Option<TrapKind> {
        if self.0 == 0 {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        let bit = self.0.trailing_zeros() as u8;
        TrapKind::from_bit(bit)
    }

    /// Takes `kind`, clearing every trap it resolves.
    pub const fn take(&mut self, kind: TrapKind) {
        self.0 &= !kind.clears().0;
    }

    /// Iterates pending traps in priority order.
    pub fn iter(self) -> impl Iterator<Item = TrapKind> {
        TrapKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }
}

impl FromIterator<TrapKind> for TrapSet {
    fn from_iter<I: IntoIterator<Item = TrapKind>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

/// Reasons the address translator refuses a reference.
///
/// `page` is the descriptor index `mode << 4 | space << 3 | page`, the value
/// latched into the MMR0 page field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MmuFault {
    /// The page access control marks it non-resident.
    #[error("page {page:#o} is not resident")]
    NonResident {
        /// Descriptor index of the faulting page.
        page: u8,
    },
    /// The block number lies outside the page length.
    #[error("page length violation on page {page:#o}")]
    PageLength {
        /// Descriptor index of the faulting page.
        page: u8,
    },
    /// Write to a read-only page.
    #[error("write to read-only page {page:#o}")]
    ReadOnly {
        /// Descriptor index of the faulting page.
        page: u8,
    },
}

impl MmuFault {
    /// Returns the descriptor index latched for diagnostics.
    #[must_use]
    pub const fn page(self) -> u8 {
        match self {
            Self::NonResident { page } | Self::PageLength { page } | Self::ReadOnly { page } => {
                page
            }
        }
    }
}

/// Failures on the physical bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum BusError {
    /// No memory or enabled device decodes the address.
    #[error("non-existent memory at {addr:#o}")]
    NonExistent {
        /// Physical address of the reference.
        addr: PhysAddr,
    },
    /// A device decoded the address but failed to complete the cycle.
    #[error("device timeout at {addr:#o}")]
    Timeout {
        /// Physical address of the reference.
        addr: PhysAddr,
    },
}

/// Failures of debugger-style console memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ConsoleError {
    /// The virtual address does not translate under the requested mode.
    #[error("address translation failed: {0}")]
    Translation(#[from] MmuFault),
    /// Word access at an odd address.
    #[error("odd address {addr:#o}")]
    OddAddress {
        /// Offending address.
        addr: u32,
    },
    /// Nothing responds at the physical address.
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Invalid configuration supplied by the host or a device collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ConfigError {
    /// Memory size is zero, not a multiple of 8 KiB, or overlaps the I/O page.
    #[error("unsupported memory size of {bytes} bytes")]
    MemorySize {
        /// Requested size in bytes.
        bytes: u32,
    },
    /// Device range is inverted, odd, or outside the I/O page.
    #[error("malformed I/O range {low:#o}..={high:#o}")]
    MalformedRange {
        /// Inclusive low bound.
        low: PhysAddr,
        /// Inclusive high bound.
        high: PhysAddr,
    },
    /// Device range collides with an already registered range.
    #[error("I/O range {low:#o}..={high:#o} overlaps {existing}")]
    OverlappingRange {
        /// Inclusive low bound.
        low: PhysAddr,
        /// Inclusive high bound.
        high: PhysAddr,
        /// Name of the owner of the colliding range.
        existing: String,
    },
    /// Interrupt level outside the device levels 4-7.
    #[error("interrupt level {level} is not a device level")]
    InterruptLevel {
        /// Requested level.
        level: u8,
    },
    /// Interrupt request bit outside the level's request word.
    #[error("interrupt request bit {bit} out of range")]
    InterruptBit {
        /// Requested bit.
        bit: u8,
    },
    /// Interrupt line already connected.
    #[error("interrupt line {level}/{bit} already connected")]
    DuplicateInterrupt {
        /// Level of the line.
        level: u8,
        /// Bit of the line.
        bit: u8,
    },
}

/// Host-level failures that stop emulation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum HostError {
    /// An event-queue collaborator failed while processing due work.
    #[error("event processing failed: {0}")]
    EventQueue(String),
    /// A host-side deposit fell outside configured memory.
    #[error("physical address {addr:#o} is outside configured memory")]
    AddressOutOfRange {
        /// Offending address.
        addr: PhysAddr,
    },
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
