//! Shared configuration for the ephemeral PostgreSQL supervisor.
//!
//! [`Config`] is loaded in layers: built-in defaults, an optional
//! configuration file, `PGSERVER_*` environment variables and finally
//! command-line flags. The library crate only reads the resolved values; the
//! `pgserver` binary is the one that drives the layered loader.

mod defaults;
mod logging;

use std::path::PathBuf;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_ADMIN_DATABASE, DEFAULT_DATABASE, DEFAULT_INITDB_BINARY, DEFAULT_LOG_FILTER,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_PORT, DEFAULT_POSTGRES_BINARY, DEFAULT_STARTUP_TIMEOUT_MS,
    DEFAULT_SUPERUSER, default_log_filter, default_log_filter_string, default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved settings for one supervised server instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "PGSERVER")]
pub struct Config {
    /// Directory holding the server binaries; `PATH` is searched when absent.
    #[serde(default)]
    pub bin_dir: Option<Utf8PathBuf>,
    /// Cluster initialisation command.
    #[serde(default = "defaults::default_initdb_binary")]
    pub initdb_binary: String,
    /// Server command.
    #[serde(default = "defaults::default_postgres_binary")]
    pub postgres_binary: String,
    /// Caller-supplied storage directory. An ephemeral one is allocated when
    /// absent.
    #[serde(default)]
    pub data_dir: Option<Utf8PathBuf>,
    /// Superuser created at initialisation and used by connections.
    #[serde(default = "defaults::default_superuser")]
    pub superuser: String,
    /// Database used to issue `CREATE DATABASE`.
    #[serde(default = "defaults::default_admin_database")]
    pub admin_database: String,
    /// Database handed out when a caller does not name one.
    #[serde(default = "defaults::default_database")]
    pub default_database: String,
    /// Port number embedded in the socket file name.
    #[serde(default = "defaults::default_port")]
    pub port: u16,
    /// Readiness deadline in milliseconds.
    #[serde(default = "defaults::default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    /// Interval between readiness and exit probes in milliseconds.
    #[serde(default = "defaults::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Grace period after the stop signal before the server is killed.
    /// Without it, cleanup waits for the server indefinitely.
    #[serde(default)]
    pub shutdown_timeout_ms: Option<u64>,
    /// Discard the server's stdout and stderr.
    #[serde(default)]
    pub silence_output: bool,
    /// `tracing` filter expression.
    #[serde(default = "defaults::default_log_filter_string")]
    pub log_filter: String,
    /// Log output format.
    #[serde(default = "defaults::default_log_format")]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bin_dir: None,
            initdb_binary: defaults::default_initdb_binary(),
            postgres_binary: defaults::default_postgres_binary(),
            data_dir: None,
            superuser: defaults::default_superuser(),
            admin_database: defaults::default_admin_database(),
            default_database: defaults::default_database(),
            port: defaults::default_port(),
            startup_timeout_ms: defaults::default_startup_timeout_ms(),
            poll_interval_ms: defaults::default_poll_interval_ms(),
            shutdown_timeout_ms: None,
            silence_output: false,
            log_filter: defaults::default_log_filter_string(),
            log_format: defaults::default_log_format(),
        }
    }
}

impl Config {
    /// Resolves the cluster initialisation command against [`Self::bin_dir`].
    #[must_use]
    pub fn initdb_path(&self) -> PathBuf {
        self.resolve_binary(&self.initdb_binary)
    }

    /// Resolves the server command against [`Self::bin_dir`].
    #[must_use]
    pub fn postgres_path(&self) -> PathBuf {
        self.resolve_binary(&self.postgres_binary)
    }

    /// Caller-supplied storage directory, if any.
    #[must_use]
    pub fn data_dir(&self) -> Option<&Utf8Path> {
        self.data_dir.as_deref()
    }

    /// Readiness deadline.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Interval between readiness and exit probes. Never zero.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Grace period before a stopping server is killed.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout_ms.map(Duration::from_millis)
    }

    /// Configured `tracing` filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Configured log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    fn resolve_binary(&self, name: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(name).into_std_path_buf(),
            None => PathBuf::from(name),
        }
    }
}
