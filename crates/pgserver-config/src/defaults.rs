use crate::logging::LogFormat;

/// Default cluster initialisation command.
pub const DEFAULT_INITDB_BINARY: &str = "initdb";

/// Default server command.
pub const DEFAULT_POSTGRES_BINARY: &str = "postgres";

/// Superuser created by `initdb` and used for every connection.
pub const DEFAULT_SUPERUSER: &str = "postgres";

/// Maintenance database that `initdb` always creates.
pub const DEFAULT_ADMIN_DATABASE: &str = "postgres";

/// Logical database handed out when callers do not name one.
pub const DEFAULT_DATABASE: &str = "data";

/// Port embedded in the socket file name; no TCP listener is opened.
pub const DEFAULT_PORT: u16 = 5432;

/// Upper bound on the wait for the server socket to appear.
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 30_000;

/// Interval between readiness and exit probes.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

pub(crate) fn default_initdb_binary() -> String {
    DEFAULT_INITDB_BINARY.to_owned()
}

pub(crate) fn default_postgres_binary() -> String {
    DEFAULT_POSTGRES_BINARY.to_owned()
}

pub(crate) fn default_superuser() -> String {
    DEFAULT_SUPERUSER.to_owned()
}

pub(crate) fn default_admin_database() -> String {
    DEFAULT_ADMIN_DATABASE.to_owned()
}

pub(crate) fn default_database() -> String {
    DEFAULT_DATABASE.to_owned()
}

pub(crate) const fn default_port() -> u16 {
    DEFAULT_PORT
}

pub(crate) const fn default_startup_timeout_ms() -> u64 {
    DEFAULT_STARTUP_TIMEOUT_MS
}

pub(crate) const fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}
