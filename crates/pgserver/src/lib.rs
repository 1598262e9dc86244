//! Supervisor for ephemeral PostgreSQL servers.
//!
//! A [`PostgresServer`] owns one server process listening only on a Unix
//! socket in a private directory. Storage is either supplied by the caller
//! (and kept) or allocated per instance (and removed on teardown). The
//! cluster is initialised on first use, databases are created on demand by
//! [`PostgresServer::connect`], and any instance still running when the host
//! process exits is stopped from an exit hook.
//!
//! ```no_run
//! use pgserver::{PostgresServer, StopOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = PostgresServer::builder().auto_start(true).build()?;
//! let mut client = server.connect(Some("fixtures"))?;
//! client.batch_execute("CREATE TABLE foo (bar int); INSERT INTO foo VALUES (2)")?;
//! drop(client);
//! server.stop(StopOptions::graceful().blocking())?;
//! # Ok(())
//! # }
//! ```

mod connection;
mod error;
mod exit_hook;
mod paths;
mod process;
mod storage;
mod supervisor;
pub mod telemetry;

pub use error::{ErrorKind, ReadinessError, ServerError, UsageError};
pub use exit_hook::run_exit_hooks;
pub use process::ShutdownMode;
pub use storage::{StorageState, inspect_storage};
pub use supervisor::{
    CleanupFailure, CleanupHandle, CleanupMode, CleanupReport, Lifecycle, PostgresServer,
    ServerBuilder, StopOptions, StopOutcome, Strictness,
};

#[cfg(test)]
mod tests;
