//! Launches the external cluster initialisation and server commands.

use std::ffi::OsString;
use std::path::Path;
use std::process::{Child, Command};

use tracing::info;

use super::{OutputPolicy, PROCESS_TARGET};
use crate::error::ServerError;

/// Inputs for `initdb`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InitdbPlan<'a> {
    pub binary: &'a Path,
    pub data_dir: &'a Path,
    pub superuser: &'a str,
    pub output: OutputPolicy,
}

/// Inputs for the server command.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ServerPlan<'a> {
    pub binary: &'a Path,
    pub data_dir: &'a Path,
    pub socket_dir: &'a Path,
    pub port: u16,
    pub output: OutputPolicy,
}

/// Runs `initdb` against `plan.data_dir` and blocks until it finishes.
pub(crate) fn run_initdb(plan: InitdbPlan<'_>) -> Result<(), ServerError> {
    let mut command = Command::new(plan.binary);
    command
        .arg("-D")
        .arg(plan.data_dir)
        .arg("-U")
        .arg(plan.superuser)
        .arg("-A")
        .arg("trust");
    plan.output.apply(&mut command);
    info!(
        target: PROCESS_TARGET,
        data_dir = %plan.data_dir.display(),
        "initialising cluster"
    );
    let status = command
        .status()
        .map_err(|source| ServerError::LaunchInitdb {
            binary: OsString::from(plan.binary),
            source,
        })?;
    if !status.success() {
        return Err(ServerError::InitdbFailed {
            data_dir: plan.data_dir.to_path_buf(),
            exit_status: status.code(),
        });
    }
    info!(
        target: PROCESS_TARGET,
        data_dir = %plan.data_dir.display(),
        "cluster initialised"
    );
    Ok(())
}

/// Spawns the server bound to the communication directory only.
///
/// An empty `-h` disables TCP listening; `-k` points the Unix socket at the
/// communication directory.
pub(crate) fn spawn_server(plan: ServerPlan<'_>) -> Result<Child, ServerError> {
    let mut command = Command::new(plan.binary);
    command
        .arg("-D")
        .arg(plan.data_dir)
        .arg("-h")
        .arg("")
        .arg("-k")
        .arg(plan.socket_dir)
        .arg("-p")
        .arg(plan.port.to_string());
    plan.output.apply(&mut command);
    let child = command
        .spawn()
        .map_err(|source| ServerError::LaunchServer {
            binary: OsString::from(plan.binary),
            source,
        })?;
    info!(
        target: PROCESS_TARGET,
        pid = child.id(),
        data_dir = %plan.data_dir.display(),
        socket_dir = %plan.socket_dir.display(),
        "server process spawned"
    );
    Ok(child)
}
