use std::fmt;
use std::process::Child;

use super::cleanup::CleanupHandle;
use crate::error::UsageError;
use crate::paths::InstanceDirs;

/// Lifecycle state of an instance.
///
/// States only move forward. `Stopping` becomes `Stopped` on whichever thread
/// runs the cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Storage prepared; the server has not been launched.
    Uninitialised,
    /// The server was launched but never became ready.
    Faulted,
    /// The server is accepting connections on its socket.
    Running,
    /// The stop signal was sent; exit and cleanup are pending.
    Stopping,
    /// The server exited and owned directories were removed.
    Stopped,
}

impl Lifecycle {
    /// Returns `true` once the server process has been launched.
    #[must_use]
    pub const fn has_started(self) -> bool {
        !matches!(self, Self::Uninitialised)
    }

    /// The usage error `stop` reports from this state, if stopping is not
    /// allowed.
    pub(crate) const fn stop_rejection(self) -> Option<UsageError> {
        match self {
            Self::Uninitialised => Some(UsageError::NeverStarted),
            Self::Stopping | Self::Stopped => Some(UsageError::AlreadyStopped),
            Self::Faulted | Self::Running => None,
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialised => write!(f, "uninitialised"),
            Self::Faulted => write!(f, "faulted"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Mutable part of an instance, guarded by the instance mutex.
#[derive(Debug)]
pub(crate) struct State {
    pub lifecycle: Lifecycle,
    pub child: Option<Child>,
    pub dirs: Option<InstanceDirs>,
    pub cleanup: Option<CleanupHandle>,
}

impl State {
    pub(crate) const fn new(dirs: InstanceDirs) -> Self {
        Self {
            lifecycle: Lifecycle::Uninitialised,
            child: None,
            dirs: Some(dirs),
            cleanup: None,
        }
    }
}
