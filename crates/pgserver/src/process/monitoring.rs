//! Readiness polling for a freshly spawned server.
//!
//! The server gives no synchronous readiness signal, so the communication
//! directory is polled until the listening socket shows up.

use std::fs;
use std::io;
use std::path::Path;
use std::process::Child;
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use super::PROCESS_TARGET;
use crate::error::ReadinessError;

/// Name of the socket file the server creates for `port`.
pub(crate) fn socket_file_name(port: u16) -> String {
    format!(".s.PGSQL.{port}")
}

/// Bounds for the readiness wait.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadinessPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

/// Blocks until the server socket for `port` appears in `socket_dir`.
///
/// Fails early when the child exits first, and with
/// [`ReadinessError::Timeout`] once the deadline passes.
pub(crate) fn wait_for_socket(
    socket_dir: &Path,
    port: u16,
    child: &mut Child,
    policy: ReadinessPolicy,
) -> Result<(), ReadinessError> {
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let socket_name = socket_file_name(port);
    loop {
        // Check the child first so a crashed server is reported as such
        // rather than as a timeout.
        if let Some(status) = child
            .try_wait()
            .map_err(|source| ReadinessError::Monitor { source })?
        {
            return Err(ReadinessError::Exited {
                exit_status: status.code(),
            });
        }
        if socket_present(socket_dir, &socket_name)? {
            info!(
                target: PROCESS_TARGET,
                pid = child.id(),
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "server socket ready"
            );
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(ReadinessError::Timeout {
                socket_dir: socket_dir.to_path_buf(),
                timeout_ms: u64::try_from(policy.timeout.as_millis()).unwrap_or(u64::MAX),
            });
        }
        thread::sleep(policy.poll_interval);
    }
}

/// Reports whether `socket_name` exists in `socket_dir`.
///
/// The server's `.lock` companion file appears before the socket and does not
/// count.
fn socket_present(socket_dir: &Path, socket_name: &str) -> Result<bool, ReadinessError> {
    let read_error = |source| ReadinessError::ReadSocketDirectory {
        path: socket_dir.to_path_buf(),
        source,
    };
    let entries = fs::read_dir(socket_dir).map_err(read_error)?;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) if error.kind() == io::ErrorKind::NotFound => continue,
            Err(error) => return Err(read_error(error)),
        };
        if entry.file_name() == socket_name {
            return Ok(true);
        }
    }
    Ok(false)
}
