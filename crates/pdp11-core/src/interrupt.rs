//! Device interrupt request table.
//!
//! Each of the device priority levels 4-7 carries a 32-bit request word.
//! Within a level a lower bit number wins arbitration.

use std::collections::BTreeMap;

use crate::memory::DeviceId;
use crate::ConfigError;

/// Lowest priority level a device may request on.
pub const MIN_DEVICE_LEVEL: u8 = 4;
/// Highest interrupt priority level.
pub const MAX_LEVEL: u8 = 7;
/// Request bits per level.
pub const LINES_PER_LEVEL: u8 = 32;

/// One interrupt request line: a level and a bit within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct IrqLine {
    level: u8,
    bit: u8,
}

impl IrqLine {
    /// Builds a line.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InterruptLevel`] outside levels 4-7 and
    /// [`ConfigError::InterruptBit`] for bits past 31.
    pub const fn new(level: u8, bit: u8) -> Result<Self, ConfigError> {
        if level < MIN_DEVICE_LEVEL || level > MAX_LEVEL {
            return Err(ConfigError::InterruptLevel { level });
        }
        if bit >= LINES_PER_LEVEL {
            return Err(ConfigError::InterruptBit { bit });
        }
        Ok(Self { level, bit })
    }

    /// Priority level.
    #[must_use]
    pub const fn level(self) -> u8 {
        self.level
    }

    /// Bit within the level's request word.
    #[must_use]
    pub const fn bit(self) -> u8 {
        self.bit
    }

    const fn mask(self) -> u32 {
        1 << self.bit
    }
}

/// Static configuration of a connected line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct IrqBinding {
    /// Vector used when the owning device does not supply one.
    pub vector: u16,
    /// Device asked to acknowledge the interrupt, if any.
    pub owner: Option<DeviceId>,
}

/// Pending device interrupt requests plus the line bindings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct InterruptRequests {
    pending: [u32; MAX_LEVEL as usize + 1],
    bindings: BTreeMap<IrqLine, IrqBinding>,
}

impl InterruptRequests {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects `line` to `vector`, optionally owned by a device.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateInterrupt`] if the line is already
    /// connected.
    pub fn connect(
        &mut self,
        line: IrqLine,
        vector: u16,
        owner: Option<DeviceId>,
    ) -> Result<(), ConfigError> {
        if self.bindings.contains_key(&line) {
            return Err(ConfigError::DuplicateInterrupt {
                level: line.level,
                bit: line.bit,
            });
        }
        self.bindings.insert(line, IrqBinding { vector, owner });
        Ok(())
    }

    /// Returns the binding of `line`.
    #[must_use]
    pub fn binding(&self, line: IrqLine) -> Option<IrqBinding> {
        self.bindings.get(&line).copied()
    }

    /// Requests an interrupt on `line`.
    pub fn raise(&mut self, line: IrqLine) {
        self.pending[usize::from(line.level)] |= line.mask();
    }

    /// Withdraws a request on `line`.
    pub fn clear(&mut self, line: IrqLine) {
        self.pending[usize::from(line.level)] &= !line.mask();
    }

    /// Returns `true` when `line` is requesting.
    #[must_use]
    pub fn is_pending(&self, line: IrqLine) -> bool {
        self.pending[usize::from(line.level)] & line.mask() != 0
    }

    /// Returns `true` when any line is requesting.
    #[must_use]
    pub fn any_pending(&self) -> bool {
        self.pending.iter().any(|word| *word != 0)
    }

    /// Highest-priority request strictly above `ipl`.
    #[must_use]
    pub fn highest_above(&self, ipl: u8) -> Option<IrqLine> {
        (MIN_DEVICE_LEVEL.max(ipl.saturating_add(1))..=MAX_LEVEL)
            .rev()
            .find_map(|level| {
                let word = self.pending[usize::from(level)];
                if word == 0 {
                    return None;
                }
                #[allow(clippy::cast_possible_truncation)]
                let bit = word.trailing_zeros() as u8;
                Some(IrqLine { level, bit })
            })
    }

    /// Clears `line` as the CPU takes it and returns its binding.
    ///
    /// Unconnected lines report no binding, which vectors as a passive
    /// release.
    pub fn acknowledge(&mut self, line: IrqLine) -> Option<IrqBinding> {
        self.clear(line);
        self.binding(line)
    }

    /// Drops every pending request; bindings are kept.
    pub fn clear_all(&mut self) {
        self.pending = [0; MAX_LEVEL as usize + 1];
    }

}
