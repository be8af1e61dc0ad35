use crate::{HostError, TrapKind};

/// Why the engine stopped issuing instructions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum HaltReason {
    /// `HALT` executed in kernel mode.
    Halt,
    /// A kernel context push failed while the red-zone trap itself was
    /// being taken.
    RedZone,
    /// `WAIT` with nothing scheduled and nothing pending.
    WaitWithNoEvents,
    /// A trap listed in the configured stop set was taken.
    TrapStop(TrapKind),
    /// Reading a trap vector aborted and the configuration asks to stop.
    VectorAbort,
    /// Pushing a trap frame aborted and the configuration asks to stop.
    StackAbort,
    /// A host collaborator failed.
    Host(HostError),
}

/// Execution state of the engine between steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RunState {
    /// Fetching and executing instructions.
    #[default]
    Running,
    /// Suspended by `WAIT` until a trap or interrupt is taken.
    Waiting,
    /// Stopped until reset or an explicit resume.
    Halted(HaltReason),
}

impl RunState {
    /// Returns the halt reason, if halted.
    #[must_use]
    pub const fn halt_reason(&self) -> Option<&HaltReason> {
        match self {
            Self::Halted(reason) => Some(reason),
            Self::Running | Self::Waiting => None,
        }
    }
}
