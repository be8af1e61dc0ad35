//! Host-facing configuration, collaborator traits and snapshot types.

use crate::interrupt::InterruptRequests;
use crate::memory::{PhysicalMemory, DEFAULT_MEMORY_BYTES};
use crate::mmu::Mmu;
use crate::state::{ControlRegisters, HaltReason, ProcessorStatus, RegisterFile, RunState};
use crate::{ConfigError, HostError, TrapSet};

/// Construction-time options of a [`crate::Cpu`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CpuConfig {
    /// Main memory size in bytes.
    pub memory_bytes: u32,
    /// Traps that halt the engine right after they are vectored.
    pub stop_traps: TrapSet,
    /// Halt when reading a trap vector aborts.
    pub stop_on_vector_abort: bool,
    /// Halt when pushing a trap frame aborts.
    pub stop_on_stack_abort: bool,
    /// Value returned by the system ID register.
    pub system_id: u16,
}

/// System ID reported when the host does not configure one.
pub const DEFAULT_SYSTEM_ID: u16 = 0o1234;

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            memory_bytes: DEFAULT_MEMORY_BYTES,
            stop_traps: TrapSet::EMPTY,
            stop_on_vector_abort: false,
            stop_on_stack_abort: false,
            system_id: DEFAULT_SYSTEM_ID,
        }
    }
}

impl CpuConfig {
    /// Checks the configuration before any state is allocated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MemorySize`] for an unsupported memory size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        PhysicalMemory::validate_size(self.memory_bytes)
    }
}

/// The event scheduler collaborator.
///
/// Devices schedule their own work on the queue; the engine only asks it to
/// run what is due and to advance time once per instruction.
pub trait EventQueue {
    /// Returns `true` when scheduled work has come due.
    fn is_work_due(&self) -> bool;

    /// Runs the due work. Devices post interrupt requests through `irq`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when a collaborator fails; the engine halts with
    /// [`HaltReason::Host`].
    fn process_due_work(&mut self, irq: &mut InterruptRequests) -> Result<(), HostError>;

    /// Advances the clock by one instruction time.
    fn advance(&mut self) {}

    /// Returns `true` while anything at all is scheduled.
    fn has_scheduled_work(&self) -> bool;
}

/// Event queue with nothing ever scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NullEventQueue;

impl EventQueue for NullEventQueue {
    fn is_work_due(&self) -> bool {
        false
    }

    fn process_due_work(&mut self, _irq: &mut InterruptRequests) -> Result<(), HostError> {
        Ok(())
    }

    fn has_scheduled_work(&self) -> bool {
        false
    }
}

/// Result of one engine iteration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StepOutcome {
    /// An instruction executed or a trap/interrupt was vectored.
    Continue,
    /// The processor is suspended in `WAIT`.
    Waiting,
    /// The engine is halted.
    Halted(HaltReason),
}

impl StepOutcome {
    pub(crate) fn from_run_state(state: &RunState) -> Self {
        match state {
            RunState::Running => Self::Continue,
            RunState::Waiting => Self::Waiting,
            RunState::Halted(reason) => Self::Halted(reason.clone()),
        }
    }
}

/// Complete architectural state of a CPU, memory image included.
///
/// Device state is not captured; devices snapshot themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CpuSnapshot {
    /// Processor status.
    pub psw: ProcessorStatus,
    /// Both register sets, the four stack pointers and PC.
    pub registers: RegisterFile,
    /// Stack limit, PIRQ and CPU error registers.
    pub control: ControlRegisters,
    /// Page descriptors and MMR0-MMR3.
    pub mmu: Mmu,
    /// Pending synchronous traps.
    pub traps: TrapSet,
    /// Pending interrupt requests and line bindings.
    pub interrupts: InterruptRequests,
    /// Run state.
    pub run_state: RunState,
    /// Executed instruction count.
    pub instructions: u64,
    /// A vector read has aborted and no vector has been taken since.
    pub vector_fault: bool,
    /// Main memory in word order.
    pub memory: Vec<u16>,
}

#[cfg(test)]
mod tests {
    use super::{CpuConfig, EventQueue, NullEventQueue, StepOutcome};
    use crate::interrupt::InterruptRequests;
    use crate::state::{HaltReason, RunState};
    use crate::ConfigError;

    #[test]
    fn default_config_is_valid() {
        let config = CpuConfig::default();
        assert_eq!(config.memory_bytes, 256 * 1024);
        assert!(config.stop_traps.is_empty());
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn odd_memory_size_is_rejected() {
        let config = CpuConfig {
            memory_bytes: 1000,
            ..CpuConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::MemorySize { bytes: 1000 })
        );
    }

    #[test]
    fn null_queue_never_has_work() {
        let mut queue = NullEventQueue;
        assert!(!queue.is_work_due());
        assert!(!queue.has_scheduled_work());
        assert_eq!(queue.process_due_work(&mut InterruptRequests::new()), Ok(()));
    }

    #[test]
    fn outcome_mirrors_run_state() {
        assert_eq!(
            StepOutcome::from_run_state(&RunState::Running),
            StepOutcome::Continue
        );
        assert_eq!(
            StepOutcome::from_run_state(&RunState::Halted(HaltReason::Halt)),
            StepOutcome::Halted(HaltReason::Halt)
        );
    }
}
