//! Stop signalling and exit confirmation for the server process.

use std::io;
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{info, warn};

use super::PROCESS_TARGET;
use crate::error::ServerError;

/// How the server should treat connected sessions when asked to stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Wait for sessions to disconnect (`SIGTERM`, "smart" shutdown).
    ///
    /// Blocking on this from a thread that still holds a connection to the
    /// server deadlocks; close connections first or use [`Self::Fast`].
    #[default]
    Graceful,
    /// Abort sessions immediately (`SIGINT`, "fast" shutdown).
    Fast,
}

impl ShutdownMode {
    const fn signal(self) -> Signal {
        match self {
            Self::Graceful => Signal::SIGTERM,
            Self::Fast => Signal::SIGINT,
        }
    }
}

/// Delivers the stop signal for `mode` to `child`.
///
/// A child that has already exited is left alone.
pub(crate) fn signal_server(child: &mut Child, mode: ShutdownMode) -> Result<(), ServerError> {
    let pid = child.id();
    if let Ok(Some(status)) = child.try_wait() {
        info!(
            target: PROCESS_TARGET,
            pid,
            status = %status,
            "server already exited; no signal sent"
        );
        return Ok(());
    }
    let raw = i32::try_from(pid).map_err(|_| ServerError::Signal {
        pid,
        source: Errno::EINVAL,
    })?;
    match kill(Pid::from_raw(raw), mode.signal()) {
        Ok(()) | Err(Errno::ESRCH) => {
            info!(
                target: PROCESS_TARGET,
                pid,
                signal = %mode.signal(),
                "stop signal sent"
            );
            Ok(())
        }
        Err(source) => Err(ServerError::Signal { pid, source }),
    }
}

/// Failure while confirming the server has exited.
#[derive(Debug)]
pub(crate) enum ExitWaitError {
    /// Waiting on the child failed; exit is unconfirmed.
    Wait(io::Error),
    /// The grace period expired and killing the child failed.
    Escalate(io::Error),
}

/// Blocks until `child` has exited.
///
/// With a `grace` period the child is polled and sent `SIGKILL` once the
/// period expires; without one the wait is unbounded.
pub(crate) fn wait_for_exit(
    child: &mut Child,
    grace: Option<Duration>,
    poll_interval: Duration,
) -> Result<ExitStatus, ExitWaitError> {
    let Some(grace) = grace else {
        return child.wait().map_err(ExitWaitError::Wait);
    };
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait().map_err(ExitWaitError::Wait)? {
            return Ok(status);
        }
        thread::sleep(poll_interval);
    }
    warn!(
        target: PROCESS_TARGET,
        pid = child.id(),
        grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
        "server did not exit within grace period; killing"
    );
    child.kill().map_err(ExitWaitError::Escalate)?;
    child.wait().map_err(ExitWaitError::Wait)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::process::{Command, Stdio};

    use rstest::rstest;

    use super::*;

    fn spawn_sh(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn sh")
    }

    #[rstest]
    #[case::graceful(ShutdownMode::Graceful, Signal::SIGTERM)]
    #[case::fast(ShutdownMode::Fast, Signal::SIGINT)]
    fn modes_map_to_server_signals(#[case] mode: ShutdownMode, #[case] expected: Signal) {
        assert_eq!(mode.signal(), expected);
    }

    #[test]
    fn default_mode_is_graceful() {
        assert_eq!(ShutdownMode::default(), ShutdownMode::Graceful);
    }

    #[test]
    fn signalled_child_exits() {
        let mut child = spawn_sh("sleep 5");
        signal_server(&mut child, ShutdownMode::Graceful).expect("signal child");
        let status = wait_for_exit(&mut child, None, Duration::from_millis(10))
            .expect("child should exit");
        assert!(!status.success(), "terminated child should not report success");
    }

    #[test]
    fn exited_child_is_not_signalled() {
        let mut child = spawn_sh("exit 0");
        child.wait().expect("wait for child");
        signal_server(&mut child, ShutdownMode::Fast).expect("already exited child is fine");
    }

    /// Waits until the child has created `ready`, i.e. its traps are set.
    fn await_ready(ready: &Path) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !ready.exists() {
            assert!(Instant::now() < deadline, "child never became ready");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn grace_period_escalates_to_kill() {
        let scratch = tempfile::tempdir().expect("scratch dir");
        let ready = scratch.path().join("ready");
        let mut child = spawn_sh(&format!(
            "trap '' TERM INT; touch '{}'; while :; do sleep 0.05; done",
            ready.display()
        ));
        await_ready(&ready);
        signal_server(&mut child, ShutdownMode::Graceful).expect("signal child");
        let started = Instant::now();
        let status = wait_for_exit(
            &mut child,
            Some(Duration::from_millis(200)),
            Duration::from_millis(10),
        )
        .expect("killed child should be reaped");
        assert!(!status.success());
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
