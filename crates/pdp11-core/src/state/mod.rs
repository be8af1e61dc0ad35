//! Architectural CPU state model primitives.

/// CPU control registers (stack limit, PIRQ, CPU error).
pub mod control;
/// Processor status word model.
pub mod psw;
/// Architectural register file types and storage model.
pub mod registers;
/// Engine execution state.
pub mod run_state;

pub use control::{ControlRegisters, CpuErrorFlags, StackZone, EMERGENCY_STACK, PIRQ_VECTOR};
pub use psw::{Mode, ProcessorStatus, RegisterSet};
pub use registers::{GeneralRegister, RegisterFile, GENERAL_REGISTER_COUNT};
pub use run_state::{HaltReason, RunState};
