//! Physical memory and the I/O page.

/// Access kinds, widths and alignment policy.
pub mod access;
/// I/O page device registry and dispatcher.
pub mod map;

pub use access::{validate_word_alignment, AccessKind, Width};
pub use map::{DeviceId, IoDevice, IoPageRouter};

use crate::{BusError, ConfigError};

/// 22-bit physical address.
pub type PhysAddr = u32;

/// Mask of a 22-bit physical address.
pub const PHYS_ADDR_MASK: PhysAddr = 0o17_777_777;
/// First byte of the I/O page (top 8 KiB of the 22-bit space).
pub const IOPAGE_BASE: PhysAddr = 0o17_760_000;
/// First 16-bit virtual address that maps to the I/O page with the MMU off.
pub const IOPAGE_VIRTUAL_BASE: u16 = 0o160_000;
/// First 18-bit address that aliases the I/O page without 22-bit mapping.
pub const IOPAGE_18BIT_BASE: PhysAddr = 0o760_000;
/// Allocation granule for main memory (one page, 8 KiB).
pub const MEMORY_GRANULE_BYTES: u32 = 0o20_000;
/// Default main memory size (256 KiB).
pub const DEFAULT_MEMORY_BYTES: u32 = 256 * 1024;

/// Returns `true` when `addr` lies in the I/O page.
#[must_use]
pub const fn is_iopage(addr: PhysAddr) -> bool {
    addr >= IOPAGE_BASE && addr <= PHYS_ADDR_MASK
}

/// Word-organised main memory below the I/O page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalMemory {
    words: Box<[u16]>,
}

impl PhysicalMemory {
    /// Allocates zeroed memory of `bytes` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MemorySize`] unless `bytes` is a non-zero
    /// multiple of 8 KiB that ends at or below the I/O page.
    pub fn new(bytes: u32) -> Result<Self, ConfigError> {
        Self::validate_size(bytes)?;
        Ok(Self {
            words: vec![0; (bytes / 2) as usize].into_boxed_slice(),
        })
    }

    /// Checks a memory size without allocating.
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub const fn validate_size(bytes: u32) -> Result<(), ConfigError> {
        if bytes == 0 || bytes % MEMORY_GRANULE_BYTES != 0 || bytes > IOPAGE_BASE {
            return Err(ConfigError::MemorySize { bytes });
        }
        Ok(())
    }

    /// Configured size in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u32 {
        u32::try_from(self.words.len() * 2).unwrap_or(IOPAGE_BASE)
    }

    /// Returns `true` when `addr` is backed by main memory.
    #[must_use]
    pub fn contains(&self, addr: PhysAddr) -> bool {
        (addr as usize) / 2 < self.words.len()
    }

    /// Reads the word containing `addr` (the low address bit is ignored).
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NonExistent`] outside configured memory.
    pub fn read_word(&self, addr: PhysAddr) -> Result<u16, BusError> {
        self.words
            .get((addr as usize) / 2)
            .copied()
            .ok_or(BusError::NonExistent { addr })
    }

    /// Reads the byte at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NonExistent`] outside configured memory.
    pub fn read_byte(&self, addr: PhysAddr) -> Result<u8, BusError> {
        let [lo, hi] = self.read_word(addr)?.to_le_bytes();
        Ok(if addr & 1 == 0 { lo } else { hi })
    }

    /// Writes the word containing `addr` (the low address bit is ignored).
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NonExistent`] outside configured memory.
    pub fn write_word(&mut self, addr: PhysAddr, value: u16) -> Result<(), BusError> {
        let slot = self
            .words
            .get_mut((addr as usize) / 2)
            .ok_or(BusError::NonExistent { addr })?;
        *slot = value;
        Ok(())
    }

    /// Writes the byte at `addr`, leaving the other byte of the word intact.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NonExistent`] outside configured memory.
    pub fn write_byte(&mut self, addr: PhysAddr, value: u8) -> Result<(), BusError> {
        let slot = self
            .words
            .get_mut((addr as usize) / 2)
            .ok_or(BusError::NonExistent { addr })?;
        *slot = merge_byte(*slot, addr, value);
        Ok(())
    }

    /// Full memory image in word order.
    #[must_use]
    pub fn as_words(&self) -> &[u16] {
        &self.words
    }

    /// Mutable memory image in word order.
    pub fn as_words_mut(&mut self) -> &mut [u16] {
        &mut self.words
    }
}

/// Replaces the byte of `word` selected by the low bit of `addr`.
#[must_use]
pub const fn merge_byte(word: u16, addr: PhysAddr, value: u8) -> u16 {
    if addr & 1 == 0 {
        (word & 0o177_400) | value as u16
    } else {
        (word & 0o377) | ((value as u16) << 8)
    }
}
