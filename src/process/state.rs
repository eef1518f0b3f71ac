//! Process lifecycle states.

use core::fmt;

/// Where a process is in its life.
///
/// ```text
/// Spawned ──► Failed
///    │
///    └──► PendingRelease ──► Released ──► Exited ──► Reaped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Record created, loader running.
    Spawned,
    /// The executable could not be loaded.
    Failed,
    /// Loaded and registered with the parent, held until released.
    PendingRelease,
    /// Running user code.
    Released,
    /// Torn down; exit status published.
    Exited,
    /// The parent collected the exit status.
    Reaped,
}

impl ProcessState {
    /// Whether `self -> next` is a legal transition.
    pub const fn can_become(self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Spawned, Failed)
                | (Spawned, PendingRelease)
                | (PendingRelease, Released)
                | (Released, Exited)
                | (Exited, Reaped)
        )
    }

    /// The process will never run user code again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Exited | Self::Reaped)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Spawned => "spawned",
            Self::Failed => "failed",
            Self::PendingRelease => "pending-release",
            Self::Released => "released",
            Self::Exited => "exited",
            Self::Reaped => "reaped",
        };
        f.write_str(name)
    }
}

/// Result of loading the executable, set once by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadOutcome {
    #[default]
    Pending,
    Succeeded,
    Failed,
}
