//! CPU-owned registers on the I/O page.
//!
//! These addresses are reserved in the [`crate::memory::IoPageRouter`] and
//! served here before any device is consulted.

use crate::cpu::Cpu;
use crate::memory::{merge_byte, PhysAddr, Width};
use crate::mmu::Space;
use crate::state::psw::PSW_T;
use crate::state::{CpuErrorFlags, Mode, ProcessorStatus};

/// Processor status word.
pub const PSW_ADDR: PhysAddr = 0o17_777_776;
/// Stack limit register.
pub const STACK_LIMIT_ADDR: PhysAddr = 0o17_777_774;
/// Programmed interrupt request register.
pub const PIRQ_ADDR: PhysAddr = 0o17_777_772;
/// CPU error register.
pub const CPU_ERROR_ADDR: PhysAddr = 0o17_777_766;
/// System ID register.
pub const SYSTEM_ID_ADDR: PhysAddr = 0o17_777_764;
/// Upper memory size register.
pub const MEMORY_SIZE_HIGH_ADDR: PhysAddr = 0o17_777_762;
/// Lower memory size register.
pub const MEMORY_SIZE_LOW_ADDR: PhysAddr = 0o17_777_760;
/// MMR0.
pub const MMR0_ADDR: PhysAddr = 0o17_777_572;
/// MMR1.
pub const MMR1_ADDR: PhysAddr = 0o17_777_574;
/// MMR2.
pub const MMR2_ADDR: PhysAddr = 0o17_777_576;
/// MMR3.
pub const MMR3_ADDR: PhysAddr = 0o17_772_516;
/// First kernel page descriptor register.
pub const KERNEL_APR_BASE: PhysAddr = 0o17_772_300;
/// First supervisor page descriptor register.
pub const SUPERVISOR_APR_BASE: PhysAddr = 0o17_772_200;
/// First user page descriptor register.
pub const USER_APR_BASE: PhysAddr = 0o17_777_600;
/// Bytes spanned by one mode's PDR/PAR block.
pub const APR_BLOCK_BYTES: PhysAddr = 0o100;

/// Ranges reserved for the CPU when a [`Cpu`] is built.
pub const CPU_REGISTER_RANGES: [(PhysAddr, PhysAddr, &str); 6] = [
    (MEMORY_SIZE_LOW_ADDR, CPU_ERROR_ADDR + 1, "cpu"),
    (PIRQ_ADDR, PSW_ADDR + 1, "cpu"),
    (MMR0_ADDR, MMR2_ADDR + 1, "mmu"),
    (MMR3_ADDR, MMR3_ADDR + 1, "mmu"),
    (SUPERVISOR_APR_BASE, KERNEL_APR_BASE + APR_BLOCK_BYTES - 1, "mmu"),
    (USER_APR_BASE, USER_APR_BASE + APR_BLOCK_BYTES - 1, "mmu"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AprField {
    Pdr,
    Par,
}

/// Decodes a page register address into its mode, space, page and field.
fn decode_apr(pa: PhysAddr) -> Option<(Mode, Space, usize, AprField)> {
    let (mode, base) = if (KERNEL_APR_BASE..KERNEL_APR_BASE + APR_BLOCK_BYTES).contains(&pa) {
        (Mode::Kernel, KERNEL_APR_BASE)
    } else if (SUPERVISOR_APR_BASE..SUPERVISOR_APR_BASE + APR_BLOCK_BYTES).contains(&pa) {
        (Mode::Supervisor, SUPERVISOR_APR_BASE)
    } else if (USER_APR_BASE..USER_APR_BASE + APR_BLOCK_BYTES).contains(&pa) {
        (Mode::User, USER_APR_BASE)
    } else {
        return None;
    };
    let word = (pa - base) >> 1;
    let field = if word & 0o20 == 0 {
        AprField::Pdr
    } else {
        AprField::Par
    };
    let space = if word & 0o10 == 0 {
        Space::Instruction
    } else {
        Space::Data
    };
    Some((mode, space, (word & 0o7) as usize, field))
}

impl Cpu {
    /// Returns the CPU register at even address `pa`, or `None` when the
    /// address is not a CPU register.
    pub(crate) fn read_cpu_register(&self, pa: PhysAddr) -> Option<u16> {
        let value = match pa {
            PSW_ADDR => self.psw.to_word(),
            STACK_LIMIT_ADDR => self.control.stack_limit,
            PIRQ_ADDR => self.control.pirq,
            CPU_ERROR_ADDR => self.control.cpu_error.to_word(),
            SYSTEM_ID_ADDR => self.config.system_id,
            MEMORY_SIZE_LOW_ADDR => {
                #[allow(clippy::cast_possible_truncation)]
                let blocks = ((self.memory.size_bytes() >> 6) - 1) as u16;
                blocks
            }
            MEMORY_SIZE_HIGH_ADDR => 0,
            MMR0_ADDR => self.mmu.mmr0().to_word(),
            MMR1_ADDR => self.mmu.mmr1(),
            MMR2_ADDR => self.mmu.mmr2(),
            MMR3_ADDR => self.mmu.mmr3().to_word(),
            _ => {
                let (mode, space, page, field) = decode_apr(pa)?;
                let descriptor = self.mmu.descriptor(mode, space, page);
                match field {
                    AprField::Pdr => descriptor.pdr(),
                    AprField::Par => descriptor.par,
                }
            }
        };
        Some(value)
    }

    /// Writes a CPU register; returns `false` when `pa` is not one.
    ///
    /// Byte writes carry the byte in the low half of `value` and merge it
    /// into the addressed half of the register.
    pub(crate) fn write_cpu_register(&mut self, pa: PhysAddr, value: u16, width: Width) -> bool {
        let Some(current) = self.read_cpu_register(pa & !1) else {
            return false;
        };
        let word = match width {
            Width::Word => value,
            #[allow(clippy::cast_possible_truncation)]
            Width::Byte => merge_byte(current, pa, value as u8),
        };
        match pa & !1 {
            PSW_ADDR => {
                let trace = self.psw.to_word() & PSW_T;
                self.psw = ProcessorStatus::from_word((word & !PSW_T) | trace);
            }
            STACK_LIMIT_ADDR => self.control.set_stack_limit(word),
            PIRQ_ADDR => self.control.set_pirq(word),
            CPU_ERROR_ADDR => self.control.cpu_error = CpuErrorFlags::default(),
            MMR0_ADDR => self.mmu.write_mmr0(word),
            MMR3_ADDR => self.mmu.write_mmr3(word),
            SYSTEM_ID_ADDR | MEMORY_SIZE_LOW_ADDR | MEMORY_SIZE_HIGH_ADDR | MMR1_ADDR
            | MMR2_ADDR => {}
            other => {
                if let Some((mode, space, page, field)) = decode_apr(other) {
                    let descriptor = self.mmu.descriptor_mut(mode, space, page);
                    match field {
                        AprField::Pdr => descriptor.set_pdr(word),
                        AprField::Par => descriptor.set_par(word),
                    }
                }
            }
        }
        true
    }
}
