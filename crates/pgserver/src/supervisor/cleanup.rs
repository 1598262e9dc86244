//! Teardown after the stop signal: confirm exit, then remove owned
//! directories.
//!
//! Directories are only removed once the server is known to have exited; the
//! server deletes its own socket and lock files on the way out, and racing it
//! over the same directory corrupts both sides of the teardown.

use std::io;
use std::path::PathBuf;
use std::process::{Child, ExitStatus};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use crate::paths::InstanceDirs;
use crate::process::shutdown::{ExitWaitError, wait_for_exit};

const CLEANUP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::cleanup");

/// A cleanup step that did not complete.
///
/// Failures are reported rather than returned as errors: the instance still
/// reaches [`crate::Lifecycle::Stopped`].
#[derive(Debug, Clone, Error)]
pub enum CleanupFailure {
    /// Waiting for the server failed, so its exit is unconfirmed and owned
    /// directories were left in place.
    #[error("failed to confirm server pid {pid} exited: {source}")]
    Wait {
        /// Server process id.
        pid: u32,
        /// Underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The grace period expired and the server could not be killed.
    #[error("failed to kill server pid {pid} after the grace period: {source}")]
    Escalate {
        /// Server process id.
        pid: u32,
        /// Underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },
    /// An owned directory could not be removed.
    #[error("failed to remove owned directory {path:?}: {source}")]
    RemoveDirectory {
        /// Directory that remains on disk.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },
}

/// Outcome of one teardown.
#[derive(Debug, Clone)]
pub struct CleanupReport {
    pid: u32,
    exit_status: Option<ExitStatus>,
    failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    /// Process id of the server that was torn down.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit status of the server, when its exit was confirmed.
    #[must_use]
    pub const fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Steps that did not complete.
    #[must_use]
    pub fn failures(&self) -> &[CleanupFailure] {
        &self.failures
    }

    /// Returns `true` when every step completed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    #[cfg(test)]
    pub(crate) const fn empty(pid: u32) -> Self {
        Self {
            pid,
            exit_status: None,
            failures: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct CleanupSlot {
    report: Mutex<Option<CleanupReport>>,
    done: Condvar,
}

/// Shared view of a teardown that may still be running.
///
/// Clones observe the same teardown. The instance keeps one, the exit hook
/// registry keeps one, and background `stop` calls hand one to the caller.
#[derive(Debug, Clone, Default)]
pub struct CleanupHandle {
    slot: Arc<CleanupSlot>,
}

impl CleanupHandle {
    pub(crate) fn pending() -> Self {
        Self::default()
    }

    pub(crate) fn complete(&self, report: CleanupReport) {
        let mut guard = self
            .slot
            .report
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Some(report);
        self.slot.done.notify_all();
    }

    /// Blocks until the teardown has finished.
    #[must_use = "the report carries any cleanup failures"]
    pub fn wait(&self) -> CleanupReport {
        let mut guard = self
            .slot
            .report
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(report) = guard.as_ref() {
                return report.clone();
            }
            guard = self
                .slot
                .done
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks for at most `timeout`; `None` when the teardown is still
    /// running.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CleanupReport> {
        let deadline = Instant::now() + timeout;
        let mut guard = self
            .slot
            .report
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(report) = guard.as_ref() {
                return Some(report.clone());
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let (next, _) = self
                .slot
                .done
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next;
        }
    }

    /// Returns `true` once the teardown has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.slot
            .report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Timing for the exit wait.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExitPolicy {
    pub grace: Option<Duration>,
    pub poll_interval: Duration,
}

/// Waits for `child` to exit, then removes the owned directories in `dirs`.
pub(crate) fn tear_down(
    mut child: Child,
    dirs: Option<InstanceDirs>,
    policy: ExitPolicy,
) -> CleanupReport {
    let pid = child.id();
    let mut failures = Vec::new();
    let exit_status = match wait_for_exit(&mut child, policy.grace, policy.poll_interval) {
        Ok(status) => {
            info!(target: CLEANUP_TARGET, pid, status = %status, "server exited");
            Some(status)
        }
        Err(ExitWaitError::Wait(source)) => {
            failures.push(CleanupFailure::Wait {
                pid,
                source: Arc::new(source),
            });
            None
        }
        Err(ExitWaitError::Escalate(source)) => {
            failures.push(CleanupFailure::Escalate {
                pid,
                source: Arc::new(source),
            });
            None
        }
    };
    match (exit_status, dirs) {
        (Some(_), Some(dirs)) => {
            for (path, source) in dirs.remove_owned() {
                failures.push(CleanupFailure::RemoveDirectory {
                    path,
                    source: Arc::new(source),
                });
            }
        }
        (None, Some(dirs)) => {
            warn!(
                target: CLEANUP_TARGET,
                pid,
                socket_dir = %dirs.socket_path().display(),
                "server exit unconfirmed; leaving owned directories in place"
            );
        }
        (_, None) => {}
    }
    for failure in &failures {
        warn!(target: CLEANUP_TARGET, pid, error = %failure, "cleanup step failed");
    }
    CleanupReport {
        pid,
        exit_status,
        failures,
    }
}

#[cfg(test)]
mod tests {
    use std::process::{Command, Stdio};
    use std::thread;

    use super::*;

    #[test]
    fn handle_reports_completion_to_every_clone() {
        let handle = CleanupHandle::pending();
        let observer = handle.clone();
        assert!(!observer.is_finished());
        assert!(observer.wait_timeout(Duration::from_millis(10)).is_none());

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.complete(CleanupReport::empty(42));
        });
        let finished = observer.wait();
        worker.join().expect("worker thread");
        assert_eq!(finished.pid(), 42);
        assert!(finished.is_clean());
        assert!(observer.is_finished());
    }

    #[test]
    fn tear_down_removes_owned_directories_after_exit() {
        let (dirs, _) = InstanceDirs::prepare(None).expect("prepare dirs");
        let socket = dirs.socket_path().to_path_buf();
        let storage = dirs.storage().path().to_path_buf();
        let child = Command::new("sh")
            .arg("-c")
            .arg("exit 0")
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn sh");
        let report = tear_down(
            child,
            Some(dirs),
            ExitPolicy {
                grace: None,
                poll_interval: Duration::from_millis(10),
            },
        );
        assert!(report.is_clean(), "unexpected failures: {:?}", report.failures());
        assert!(report.exit_status().is_some_and(|status| status.success()));
        assert!(!socket.exists());
        assert!(!storage.exists());
    }
}
