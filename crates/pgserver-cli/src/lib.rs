//! Runtime for the `pgserver` command.
//!
//! The command starts one ephemeral server with configuration layered by
//! `ortho_config` (defaults, configuration file, `PGSERVER_*` environment,
//! flags), creates the default database, writes the connection details to
//! stdout and blocks until a termination signal arrives. The server is then
//! stopped fast and its directories removed before the command exits.

use std::ffi::OsString;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use ortho_config::OrthoConfig;
use pgserver::telemetry::{self, TelemetryError};
use pgserver::{PostgresServer, ServerError, StopOptions};
use pgserver_config::Config;
use thiserror::Error;
use tracing::warn;

mod shutdown;

pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};

pub(crate) const CLI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::cli");

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
    #[error("failed to write connection details: {0}")]
    Output(#[source] io::Error),
}

/// Runs the command with the process signal listener.
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    match SystemShutdownSignal::install() {
        Ok(mut signal) => run_with(args, stdout, stderr, &mut signal),
        Err(error) => report(stderr, &AppError::from(error)),
    }
}

/// Runs the command, blocking on `shutdown` while the server is up.
pub fn run_with<I, W, E, S>(args: I, stdout: &mut W, stderr: &mut E, shutdown: &mut S) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    S: ShutdownSignal,
{
    match serve(args, stdout, shutdown) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => report(stderr, &error),
    }
}

fn report<E: Write>(stderr: &mut E, error: &AppError) -> ExitCode {
    let _ = writeln!(stderr, "pgserver: {error}");
    ExitCode::FAILURE
}

fn serve<I, W, S>(args: I, stdout: &mut W, shutdown: &mut S) -> Result<(), AppError>
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    S: ShutdownSignal,
{
    let config = Config::load_from_iter(args).map_err(AppError::LoadConfiguration)?;
    telemetry::initialise(&config)?;
    let server = PostgresServer::builder()
        .config(config.clone())
        .auto_start(true)
        .build()?;
    drop(server.connect(None)?);
    write_connection_details(stdout, &server, &config).map_err(AppError::Output)?;
    shutdown.wait()?;
    if let Some(report) = server.stop(StopOptions::fast().blocking())?.wait() {
        for failure in report.failures() {
            warn!(target: CLI_TARGET, error = %failure, "cleanup incomplete");
        }
    }
    Ok(())
}

fn write_connection_details<W: Write>(
    stdout: &mut W,
    server: &PostgresServer,
    config: &Config,
) -> io::Result<()> {
    let socket_dir = server.socket_dir().to_string_lossy();
    writeln!(stdout, "data_dir: {}", server.data_dir().display())?;
    writeln!(stdout, "socket_dir: {socket_dir}")?;
    writeln!(
        stdout,
        "dsn: host={} port={} user={} dbname={}",
        libpq_value(&socket_dir),
        server.port(),
        libpq_value(&config.superuser),
        libpq_value(&config.default_database),
    )?;
    stdout.flush()
}

/// Formats `value` for a libpq keyword/value connection string.
fn libpq_value(value: &str) -> String {
    let plain = !value.is_empty()
        && !value
            .chars()
            .any(|ch| ch.is_whitespace() || ch == '\'' || ch == '\\');
    if plain {
        return value.to_owned();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}
