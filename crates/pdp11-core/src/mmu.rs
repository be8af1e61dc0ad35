//! KT11-style memory management: page descriptors, MMR0-MMR3 and address
//! translation.
//!
//! A virtual address splits into a 3-bit page number (bits 15:13), a 7-bit
//! block number (bits 12:6) and a 6-bit displacement. Each (mode, space,
//! page) triple selects one [`PageDescriptor`].

use crate::memory::{PhysAddr, IOPAGE_18BIT_BASE, IOPAGE_VIRTUAL_BASE, PHYS_ADDR_MASK};
use crate::state::Mode;
use crate::MmuFault;

/// Pages per address space.
pub const PAGES_PER_SPACE: usize = 8;
/// Address spaces per mode.
pub const SPACES_PER_MODE: usize = 2;
/// Modes with a descriptor table.
pub const MODE_COUNT: usize = 4;

const DISPLACEMENT_MASK: u16 = 0o17_777;
const ADDR_18BIT_MASK: PhysAddr = 0o777_777;
const IOPAGE_18BIT_ALIAS: PhysAddr = 0o17_000_000;
const IOPAGE_16BIT_ALIAS: PhysAddr = 0o17_600_000;

/// Instruction or data address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Space {
    /// Instruction space: fetches and PC-relative operands.
    Instruction = 0,
    /// Data space: operand references when enabled for the mode in MMR3.
    Data = 1,
}

impl Space {
    /// Both spaces.
    pub const ALL: [Self; SPACES_PER_MODE] = [Self::Instruction, Self::Data];

    /// Index into the descriptor table.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Direction of a memory reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Read reference.
    Read,
    /// Write reference (including the write half of read-modify-write).
    Write,
}

/// Access control field of a page descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum PageAccess {
    /// Any reference aborts.
    #[default]
    NonResident = 0,
    /// Reads allowed, writes abort.
    ReadOnly = 1,
    /// Reserved encoding; aborts like a non-resident page.
    Unused = 2,
    /// Reads and writes allowed.
    ReadWrite = 3,
}

impl PageAccess {
    /// Decodes the two-bit field.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        match bits & 0o3 {
            0 => Self::NonResident,
            1 => Self::ReadOnly,
            2 => Self::Unused,
            _ => Self::ReadWrite,
        }
    }

    /// Encodes the two-bit field.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self as u16
    }

    /// Returns `true` when the page is resident.
    #[must_use]
    pub const fn is_readable(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    /// Returns `true` when the page accepts writes.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

/// One page address register (PAR) and page descriptor register (PDR).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PageDescriptor {
    /// Relocation base in 64-byte blocks.
    pub par: u16,
    /// Page length field, `0..=127` blocks.
    pub plf: u8,
    /// Page grows downward from the top of the 8 KiB segment.
    pub expand_down: bool,
    /// Access control.
    pub access: PageAccess,
    /// Set by any successful write through this descriptor.
    pub written: bool,
    /// Set when a reference through this descriptor aborts.
    pub accessed: bool,
}

impl PageDescriptor {
    const PDR_PLF_SHIFT: u16 = 8;
    const PDR_A: u16 = 0o200;
    const PDR_W: u16 = 0o100;
    const PDR_ED: u16 = 0o10;
    const PDR_ACF_SHIFT: u16 = 1;

    /// Packs the PDR word.
    #[must_use]
    pub const fn pdr(&self) -> u16 {
        let mut word = ((self.plf as u16 & 0o177) << Self::PDR_PLF_SHIFT)
            | (self.access.bits() << Self::PDR_ACF_SHIFT);
        if self.accessed {
            word |= Self::PDR_A;
        }
        if self.written {
            word |= Self::PDR_W;
        }
        if self.expand_down {
            word |= Self::PDR_ED;
        }
        word
    }

    /// Loads the writable PDR fields; clears the written and accessed flags.
    pub const fn set_pdr(&mut self, word: u16) {
        #[allow(clippy::cast_possible_truncation)]
        let plf = ((word >> Self::PDR_PLF_SHIFT) & 0o177) as u8;
        self.plf = plf;
        self.expand_down = word & Self::PDR_ED != 0;
        self.access = PageAccess::from_bits(word >> Self::PDR_ACF_SHIFT);
        self.written = false;
        self.accessed = false;
    }

    /// Loads the PAR; clears the written and accessed flags.
    pub const fn set_par(&mut self, word: u16) {
        self.par = word;
        self.written = false;
        self.accessed = false;
    }

    /// Page length bound in blocks.
    ///
    /// Upward pages hold blocks `0..length` and downward pages hold
    /// `length..128`.
    #[must_use]
    pub const fn length(&self) -> u16 {
        if self.expand_down {
            self.plf as u16
        } else {
            self.plf as u16 + 1
        }
    }

    /// Returns `true` when `block` lies inside the page.
    #[must_use]
    pub const fn contains_block(&self, block: u16) -> bool {
        if self.expand_down {
            block >= self.length()
        } else {
            block < self.length()
        }
    }
}

/// Memory management register 0: enable, abort flags and faulting page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(clippy::struct_excessive_bools)]
pub struct Mmr0 {
    /// Abort: non-resident page.
    pub non_resident: bool,
    /// Abort: page length violation.
    pub page_length: bool,
    /// Abort: write to read-only page.
    pub read_only: bool,
    /// Maintenance mode.
    pub maintenance: bool,
    /// Current instruction completed.
    pub instruction_complete: bool,
    /// Descriptor index (`mode << 4 | space << 3 | page`) of the last abort.
    pub page: u8,
    /// Relocation enabled.
    pub enabled: bool,
}

impl Mmr0 {
    const NON_RESIDENT: u16 = 0o100_000;
    const PAGE_LENGTH: u16 = 0o40_000;
    const READ_ONLY: u16 = 0o20_000;
    const MAINTENANCE: u16 = 0o400;
    const INSTRUCTION_COMPLETE: u16 = 0o200;
    const PAGE_SHIFT: u16 = 1;
    const ENABLE: u16 = 0o1;
    /// Bits a program write can change.
    pub const WRITE_MASK: u16 = 0o160_577;

    /// Packs the register word.
    #[must_use]
    pub const fn to_word(self) -> u16 {
        let mut word = (self.page as u16 & 0o77) << Self::PAGE_SHIFT;
        if self.non_resident {
            word |= Self::NON_RESIDENT;
        }
        if self.page_length {
            word |= Self::PAGE_LENGTH;
        }
        if self.read_only {
            word |= Self::READ_ONLY;
        }
        if self.maintenance {
            word |= Self::MAINTENANCE;
        }
        if self.instruction_complete {
            word |= Self::INSTRUCTION_COMPLETE;
        }
        if self.enabled {
            word |= Self::ENABLE;
        }
        word
    }

    /// Unpacks a register word.
    #[must_use]
    pub const fn from_word(word: u16) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let page = ((word >> Self::PAGE_SHIFT) & 0o77) as u8;
        Self {
            non_resident: word & Self::NON_RESIDENT != 0,
            page_length: word & Self::PAGE_LENGTH != 0,
            read_only: word & Self::READ_ONLY != 0,
            maintenance: word & Self::MAINTENANCE != 0,
            instruction_complete: word & Self::INSTRUCTION_COMPLETE != 0,
            page,
            enabled: word & Self::ENABLE != 0,
        }
    }

    /// Returns `true` while any abort flag holds the diagnostic registers.
    #[must_use]
    pub const fn frozen(self) -> bool {
        self.non_resident || self.page_length || self.read_only
    }
}

/// Memory management register 3: D-space enables and 22-bit mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(clippy::struct_excessive_bools)]
pub struct Mmr3 {
    /// User mode D space enabled.
    pub user_data: bool,
    /// Supervisor mode D space enabled.
    pub supervisor_data: bool,
    /// Kernel mode D space enabled.
    pub kernel_data: bool,
    /// `CSM` instruction enabled (recorded only).
    pub csm_enable: bool,
    /// 22-bit physical addressing enabled.
    pub addressing_22bit: bool,
    /// Unibus map relocation enabled (recorded only).
    pub unibus_map: bool,
}

impl Mmr3 {
    /// Implemented bits.
    pub const WRITE_MASK: u16 = 0o77;

    /// Packs the register word.
    #[must_use]
    pub const fn to_word(self) -> u16 {
        (self.user_data as u16)
            | (self.supervisor_data as u16) << 1
            | (self.kernel_data as u16) << 2
            | (self.csm_enable as u16) << 3
            | (self.addressing_22bit as u16) << 4
            | (self.unibus_map as u16) << 5
    }

    /// Unpacks a register word.
    #[must_use]
    pub const fn from_word(word: u16) -> Self {
        Self {
            user_data: word & 0o1 != 0,
            supervisor_data: word & 0o2 != 0,
            kernel_data: word & 0o4 != 0,
            csm_enable: word & 0o10 != 0,
            addressing_22bit: word & 0o20 != 0,
            unibus_map: word & 0o40 != 0,
        }
    }

    /// Returns `true` when `mode` uses separate D space.
    #[must_use]
    pub const fn data_space_enabled(self, mode: Mode) -> bool {
        match mode {
            Mode::Kernel => self.kernel_data,
            Mode::Supervisor => self.supervisor_data,
            Mode::User => self.user_data,
            Mode::Unused => false,
        }
    }
}

/// Returns the descriptor index latched into MMR0 for a page.
#[must_use]
pub const fn descriptor_index(mode: Mode, space: Space, page: usize) -> u8 {
    #[allow(clippy::cast_possible_truncation)]
    let index = ((mode.index() << 4) | (space.index() << 3) | (page & 0o7)) as u8;
    index
}

/// Page descriptor table plus MMR0-MMR3.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Mmu {
    descriptors: [[[PageDescriptor; PAGES_PER_SPACE]; SPACES_PER_MODE]; MODE_COUNT],
    mmr0: Mmr0,
    mmr1: u16,
    mmr2: u16,
    mmr3: Mmr3,
}

impl Mmu {
    /// Creates a disabled MMU with every page non-resident.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears MMR0-MMR3 as a bus reset does; descriptors are kept.
    pub fn bus_reset(&mut self) {
        self.mmr0 = Mmr0::default();
        self.mmr1 = 0;
        self.mmr2 = 0;
        self.mmr3 = Mmr3::default();
    }

    /// Returns `true` when relocation is enabled.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.mmr0.enabled
    }

    /// Returns `true` while an abort holds MMR0-MMR2.
    #[must_use]
    pub const fn frozen(&self) -> bool {
        self.mmr0.frozen()
    }

    /// Space used for data references in `mode`.
    #[must_use]
    pub const fn data_space(&self, mode: Mode) -> Space {
        if self.mmr3.data_space_enabled(mode) {
            Space::Data
        } else {
            Space::Instruction
        }
    }

    /// Descriptor for `page` of (`mode`, `space`).
    #[must_use]
    pub const fn descriptor(&self, mode: Mode, space: Space, page: usize) -> &PageDescriptor {
        &self.descriptors[mode.index()][space.index()][page & 0o7]
    }

    /// Mutable descriptor for `page` of (`mode`, `space`).
    pub const fn descriptor_mut(
        &mut self,
        mode: Mode,
        space: Space,
        page: usize,
    ) -> &mut PageDescriptor {
        &mut self.descriptors[mode.index()][space.index()][page & 0o7]
    }

    /// MMR0 fields.
    #[must_use]
    pub const fn mmr0(&self) -> Mmr0 {
        self.mmr0
    }

    /// Program write of MMR0; read-only bits are preserved.
    pub const fn write_mmr0(&mut self, word: u16) {
        let kept = self.mmr0.to_word() & !Mmr0::WRITE_MASK;
        self.mmr0 = Mmr0::from_word(kept | (word & Mmr0::WRITE_MASK));
    }

    /// Host load of MMR0, every field included.
    pub const fn set_mmr0(&mut self, mmr0: Mmr0) {
        self.mmr0 = mmr0;
    }

    /// MMR1: register modifications of the current instruction.
    #[must_use]
    pub const fn mmr1(&self) -> u16 {
        self.mmr1
    }

    /// Host load of MMR1.
    pub const fn set_mmr1(&mut self, word: u16) {
        self.mmr1 = word;
    }

    /// MMR2: virtual PC of the current instruction, or the last vector.
    #[must_use]
    pub const fn mmr2(&self) -> u16 {
        self.mmr2
    }

    /// Host load of MMR2.
    pub const fn set_mmr2(&mut self, word: u16) {
        self.mmr2 = word;
    }

    /// MMR3 fields.
    #[must_use]
    pub const fn mmr3(&self) -> Mmr3 {
        self.mmr3
    }

    /// Program write of MMR3.
    pub const fn write_mmr3(&mut self, word: u16) {
        self.mmr3 = Mmr3::from_word(word & Mmr3::WRITE_MASK);
    }

    /// Starts a new instruction at `pc`: MMR1 clears and MMR2 latches `pc`
    /// unless frozen.
    pub const fn begin_instruction(&mut self, pc: u16) {
        if !self.frozen() {
            self.mmr1 = 0;
            self.mmr2 = pc;
        }
        self.mmr0.instruction_complete = false;
    }

    /// Marks the current instruction complete.
    pub const fn complete_instruction(&mut self) {
        self.mmr0.instruction_complete = true;
    }

    /// Latches the vector address being taken into MMR2 unless frozen.
    pub const fn begin_vector(&mut self, vector: u16) {
        if !self.frozen() {
            self.mmr2 = vector;
        }
        self.mmr0.instruction_complete = false;
    }

    /// Records a general register auto-modification in MMR1.
    ///
    /// The first change lands in the low byte and the second in the high
    /// byte; each byte holds a 5-bit signed delta above a 3-bit register.
    pub const fn record_register_change(&mut self, reg: u8, delta: i16) {
        if self.frozen() {
            return;
        }
        #[allow(clippy::cast_sign_loss)]
        let change = (((delta as u16) & 0o37) << 3) | (reg as u16 & 0o7);
        self.mmr1 = if self.mmr1 == 0 {
            change
        } else {
            (change << 8) | self.mmr1
        };
    }

    /// Translates a program reference, updating the descriptor flags and
    /// MMR0 as the hardware does.
    ///
    /// # Errors
    ///
    /// Returns the [`MmuFault`] after latching it in MMR0 and setting the
    /// accessed flag of the descriptor.
    pub fn translate(
        &mut self,
        va: u16,
        space: Space,
        mode: Mode,
        access: Access,
    ) -> Result<PhysAddr, MmuFault> {
        if !self.mmr0.enabled {
            return Ok(Self::unmapped(va));
        }
        let page = usize::from(va >> 13);
        match self.check(va, space, mode, access) {
            Ok(pa) => {
                if matches!(access, Access::Write) {
                    self.descriptor_mut(mode, space, page).written = true;
                }
                Ok(pa)
            }
            Err(fault) => {
                if !self.frozen() {
                    self.mmr0.page = fault.page();
                }
                match fault {
                    MmuFault::NonResident { .. } => self.mmr0.non_resident = true,
                    MmuFault::PageLength { .. } => self.mmr0.page_length = true,
                    MmuFault::ReadOnly { .. } => self.mmr0.read_only = true,
                }
                self.descriptor_mut(mode, space, page).accessed = true;
                Err(fault)
            }
        }
    }

    /// Translates a console reference with the same checks and no side
    /// effects.
    ///
    /// # Errors
    ///
    /// Returns the [`MmuFault`] the program reference would raise.
    pub fn translate_console(
        &self,
        va: u16,
        space: Space,
        mode: Mode,
        access: Access,
    ) -> Result<PhysAddr, MmuFault> {
        if self.mmr0.enabled {
            self.check(va, space, mode, access)
        } else {
            Ok(Self::unmapped(va))
        }
    }

    fn check(&self, va: u16, space: Space, mode: Mode, access: Access) -> Result<PhysAddr, MmuFault> {
        let page = usize::from(va >> 13);
        let index = descriptor_index(mode, space, page);
        let descriptor = self.descriptor(mode, space, page);
        if !descriptor.access.is_readable() {
            return Err(MmuFault::NonResident { page: index });
        }
        if !descriptor.contains_block((va >> 6) & 0o177) {
            return Err(MmuFault::PageLength { page: index });
        }
        if matches!(access, Access::Write) && !descriptor.access.is_writable() {
            return Err(MmuFault::ReadOnly { page: index });
        }
        let pa = ((PhysAddr::from(descriptor.par) << 6) + PhysAddr::from(va & DISPLACEMENT_MASK))
            & PHYS_ADDR_MASK;
        Ok(self.fold_18bit(pa))
    }

    const fn fold_18bit(&self, pa: PhysAddr) -> PhysAddr {
        if self.mmr3.addressing_22bit {
            return pa;
        }
        let pa = pa & ADDR_18BIT_MASK;
        if pa >= IOPAGE_18BIT_BASE {
            pa | IOPAGE_18BIT_ALIAS
        } else {
            pa
        }
    }

    const fn unmapped(va: u16) -> PhysAddr {
        if va >= IOPAGE_VIRTUAL_BASE {
            va as PhysAddr | IOPAGE_16BIT_ALIAS
        } else {
            va as PhysAddr
        }
    }
}
