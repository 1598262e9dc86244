//! Defines the unified error surface for provisioning and supervising a server.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

/// Broad classification of a [`ServerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The storage or communication directory could not be prepared.
    Configuration,
    /// A lifecycle operation was called from the wrong state.
    Usage,
    /// The server never produced its listening socket.
    Readiness,
    /// An external command could not be launched, signalled or completed.
    Process,
    /// The database server rejected a connection or statement.
    Database,
}

/// Errors surfaced while provisioning, supervising or connecting to a server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The storage path exists but could not be listed.
    #[error("failed to inspect storage directory '{path}': {source}")]
    InspectStorage {
        /// Storage directory that could not be listed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The storage path exists but is not a directory.
    #[error("storage path '{path}' is not a directory")]
    StorageNotDirectory {
        /// Offending storage path.
        path: PathBuf,
    },
    /// The storage directory could not be created.
    #[error("failed to create storage directory '{path}': {source}")]
    CreateStorage {
        /// Storage directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A temporary directory could not be allocated.
    #[error("failed to allocate {purpose} directory: {source}")]
    AllocateDirectory {
        /// What the directory was meant to hold.
        purpose: &'static str,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The cluster initialisation command could not be launched.
    #[error("failed to launch '{binary:?}': {source}")]
    LaunchInitdb {
        /// Command that failed to launch.
        binary: OsString,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The cluster initialisation command exited unsuccessfully.
    #[error("cluster initialisation of '{data_dir}' failed (status: {exit_status:?})")]
    InitdbFailed {
        /// Storage directory being initialised.
        data_dir: PathBuf,
        /// Exit code, absent when terminated by a signal.
        exit_status: Option<i32>,
    },
    /// The server command could not be launched.
    #[error("failed to launch '{binary:?}': {source}")]
    LaunchServer {
        /// Command that failed to launch.
        binary: OsString,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The stop signal could not be delivered.
    #[error("failed to signal server pid {pid}: {source}")]
    Signal {
        /// Server process id.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// A lifecycle operation was called from the wrong state.
    #[error(transparent)]
    Usage(#[from] UsageError),
    /// The server never became ready.
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
    /// Opening a connection failed.
    #[error("failed to connect to database '{database}': {source}")]
    Connect {
        /// Database the connection targeted.
        database: String,
        /// Error reported by the client library.
        #[source]
        source: postgres::Error,
    },
    /// Creating a database failed for a reason other than it already existing.
    #[error("failed to create database '{database}': {source}")]
    CreateDatabase {
        /// Database that could not be created.
        database: String,
        /// Error reported by the client library.
        #[source]
        source: postgres::Error,
    },
}

impl ServerError {
    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InspectStorage { .. }
            | Self::StorageNotDirectory { .. }
            | Self::CreateStorage { .. }
            | Self::AllocateDirectory { .. } => ErrorKind::Configuration,
            Self::LaunchInitdb { .. }
            | Self::InitdbFailed { .. }
            | Self::LaunchServer { .. }
            | Self::Signal { .. } => ErrorKind::Process,
            Self::Usage(_) => ErrorKind::Usage,
            Self::Readiness(_) => ErrorKind::Readiness,
            Self::Connect { .. } | Self::CreateDatabase { .. } => ErrorKind::Database,
        }
    }
}

/// Lifecycle misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsageError {
    /// `start` was called on an instance that has already been started.
    #[error("server may only be started once; construct a new instance instead")]
    AlreadyStarted,
    /// `stop` was called on an instance that was never started.
    #[error("server has not been started")]
    NeverStarted,
    /// `stop` was called on an instance that has already been stopped.
    #[error("server has already been stopped")]
    AlreadyStopped,
    /// A connection was requested while the server is not running.
    #[error("server is not running")]
    NotRunning,
}

/// Failures while waiting for the server's listening socket.
#[derive(Debug, Error)]
pub enum ReadinessError {
    /// The socket did not appear before the deadline.
    #[error("server socket did not appear in {socket_dir:?} within {timeout_ms} ms")]
    Timeout {
        /// Communication directory being watched.
        socket_dir: PathBuf,
        /// Deadline that expired.
        timeout_ms: u64,
    },
    /// The server exited before its socket appeared.
    #[error("server exited before becoming ready (status: {exit_status:?})")]
    Exited {
        /// Exit code, absent when terminated by a signal.
        exit_status: Option<i32>,
    },
    /// Polling the child process failed.
    #[error("failed to monitor server process: {source}")]
    Monitor {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Listing the communication directory failed.
    #[error("failed to read socket directory {path:?}: {source}")]
    ReadSocketDirectory {
        /// Communication directory being watched.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
