//! Cycle-approximate PDP-11/70 processor core.
//!
//! The crate models the CPU, the KT11 memory management unit, physical
//! memory and the I/O page dispatch that devices plug into. A host builds a
//! [`Cpu`], registers its devices, loads a bootstrap and calls
//! [`Cpu::step`] with its [`EventQueue`].

/// Trap kinds and the error taxonomy of every fallible operation.
pub mod fault;
pub use fault::{BusError, ConfigError, ConsoleError, HostError, MmuFault, TrapKind, TrapSet};

/// Architectural CPU state model primitives.
pub mod state;
pub use state::{
    ControlRegisters, CpuErrorFlags, GeneralRegister, HaltReason, Mode, ProcessorStatus,
    RegisterFile, RegisterSet, RunState,
};

/// Physical memory and the I/O page.
pub mod memory;
pub use memory::{
    AccessKind, DeviceId, IoDevice, IoPageRouter, PhysAddr, PhysicalMemory, Width,
    DEFAULT_MEMORY_BYTES,
};

/// Device interrupt request lines.
pub mod interrupt;
pub use interrupt::{InterruptRequests, IrqBinding, IrqLine};

/// Memory management unit.
pub mod mmu;
pub use mmu::{Access, Mmr0, Mmr3, Mmu, PageAccess, PageDescriptor, Space};

/// Instruction decoding.
pub mod decoder;
pub use decoder::{AddressingMode, Decoder, Instruction, Operand};

/// Trap and interrupt arbitration.
pub mod trap;
pub use trap::{next_event, Event};

/// The processor context.
pub mod cpu;
pub use cpu::Cpu;

/// CPU registers on the I/O page.
pub mod iopage;

mod execute;

/// Host-facing configuration and collaborator traits.
pub mod api;
pub use api::{CpuConfig, CpuSnapshot, EventQueue, NullEventQueue, StepOutcome};

/// MACRO-11 disassembly.
pub mod disasm;
pub use disasm::{disassemble_one, disassemble_range, DisassemblyRow};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
