use crate::error::UsageError;
use crate::process::ShutdownMode;

use super::cleanup::{CleanupHandle, CleanupReport};

/// Where the post-signal teardown runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CleanupMode {
    /// On the calling thread; `stop` returns once directories are removed.
    Blocking,
    /// On a dedicated worker thread; `stop` returns a [`CleanupHandle`].
    #[default]
    Background,
}

/// How lifecycle calls from the wrong state are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strictness {
    /// Report a [`UsageError`].
    #[default]
    Strict,
    /// Do nothing and report what was skipped.
    Lenient,
}

/// Parameters for [`crate::PostgresServer::stop`].
///
/// The default is a graceful, background, strict stop.
///
/// ```
/// use pgserver::{CleanupMode, ShutdownMode, StopOptions};
///
/// let options = StopOptions::fast().blocking();
/// assert_eq!(options.mode(), ShutdownMode::Fast);
/// assert_eq!(options.cleanup(), CleanupMode::Blocking);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopOptions {
    mode: ShutdownMode,
    cleanup: CleanupMode,
    strictness: Strictness,
}

impl StopOptions {
    /// Graceful shutdown: wait for sessions to disconnect.
    #[must_use]
    pub const fn graceful() -> Self {
        Self {
            mode: ShutdownMode::Graceful,
            cleanup: CleanupMode::Background,
            strictness: Strictness::Strict,
        }
    }

    /// Fast shutdown: abort sessions immediately.
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            mode: ShutdownMode::Fast,
            ..Self::graceful()
        }
    }

    /// Runs cleanup on the calling thread.
    #[must_use]
    pub const fn blocking(mut self) -> Self {
        self.cleanup = CleanupMode::Blocking;
        self
    }

    /// Runs cleanup on a worker thread.
    #[must_use]
    pub const fn background(mut self) -> Self {
        self.cleanup = CleanupMode::Background;
        self
    }

    /// Turns "not running" into a no-op instead of an error.
    #[must_use]
    pub const fn lenient(mut self) -> Self {
        self.strictness = Strictness::Lenient;
        self
    }

    /// Selected shutdown mode.
    #[must_use]
    pub const fn mode(&self) -> ShutdownMode {
        self.mode
    }

    /// Selected cleanup placement.
    #[must_use]
    pub const fn cleanup(&self) -> CleanupMode {
        self.cleanup
    }

    /// Selected misuse handling.
    #[must_use]
    pub const fn strictness(&self) -> Strictness {
        self.strictness
    }
}

/// What a successful `stop` call did.
#[derive(Debug, Clone)]
pub enum StopOutcome {
    /// Cleanup ran to completion on the calling thread.
    Stopped(CleanupReport),
    /// Cleanup is running (or ran) on a worker thread.
    Cleaning(CleanupHandle),
    /// Lenient stop from a state where there was nothing to stop.
    Skipped(UsageError),
}

impl StopOutcome {
    /// Blocks until cleanup has finished and returns its report.
    ///
    /// `None` for [`StopOutcome::Skipped`].
    #[must_use]
    pub fn wait(self) -> Option<CleanupReport> {
        match self {
            Self::Stopped(report) => Some(report),
            Self::Cleaning(handle) => Some(handle.wait()),
            Self::Skipped(_) => None,
        }
    }
}
