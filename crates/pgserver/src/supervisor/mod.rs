//! Server Supervisor: one server process, its directories and its lifecycle.
//!
//! An instance moves `Uninitialised → Running → Stopping → Stopped`, or
//! `Uninitialised → Faulted → Stopping → Stopped` when the server never
//! becomes ready. It starts at most once. Teardown (confirm exit, then remove
//! owned directories) runs on the caller's thread or on a worker thread; the
//! exit registry joins whichever is still outstanding when the process ends.

use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::mpsc::{self, SendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;

use pgserver_config::Config;
use postgres::Client;
use tracing::{info, warn};

use crate::connection::{self, ConnectionTarget};
use crate::error::{ServerError, UsageError};
use crate::exit_hook::{self, ExitStop};
use crate::paths::InstanceDirs;
use crate::process::OutputPolicy;
use crate::process::monitoring::wait_for_socket;
use crate::process::shutdown::signal_server;
use crate::process::spawning::{InitdbPlan, ServerPlan, run_initdb, spawn_server};
use crate::storage::StorageState;

mod cleanup;
mod options;
mod settings;
mod state;

pub use cleanup::{CleanupFailure, CleanupHandle, CleanupReport};
pub use options::{CleanupMode, StopOptions, StopOutcome, Strictness};
pub use state::Lifecycle;

use cleanup::{ExitPolicy, tear_down};
use settings::ServerSettings;
use state::State;

const SUPERVISOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::supervisor");

/// A supervised PostgreSQL server.
///
/// Clones share the same instance. When the last clone is dropped a server
/// that is still running receives a fast stop and its owned directories are
/// removed in the background; the process exit sequence waits for that
/// cleanup to finish.
#[derive(Debug, Clone)]
pub struct PostgresServer {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    settings: ServerSettings,
    data_dir: PathBuf,
    socket_dir: PathBuf,
    storage_owned: bool,
    state: Arc<Mutex<State>>,
}

/// Configures and constructs a [`PostgresServer`].
///
/// ```no_run
/// use pgserver::PostgresServer;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let server = PostgresServer::builder()
///     .silence_output(true)
///     .auto_start(true)
///     .build()?;
/// let mut client = server.connect(None)?;
/// client.batch_execute("CREATE TABLE foo (bar int)")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ServerBuilder {
    config: Config,
    data_dir: Option<PathBuf>,
    silence_output: Option<bool>,
    auto_start: bool,
}

impl ServerBuilder {
    /// Replaces the configuration. Overrides set on the builder still win.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Uses `path` as storage instead of an ephemeral directory. The
    /// directory is never deleted by the instance.
    #[must_use]
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    /// Discards the output of `initdb` and the server.
    #[must_use]
    pub const fn silence_output(mut self, silence: bool) -> Self {
        self.silence_output = Some(silence);
        self
    }

    /// Starts the server as part of [`Self::build`].
    #[must_use]
    pub const fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Prepares storage, initialises the cluster when needed and, with
    /// `auto_start`, starts the server.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when storage cannot be prepared, a
    /// process error when cluster initialisation fails, and any error from
    /// [`PostgresServer::start`] when auto-starting.
    pub fn build(self) -> Result<PostgresServer, ServerError> {
        let mut settings = ServerSettings::from_config(&self.config);
        if let Some(silence) = self.silence_output {
            settings.output = OutputPolicy::from_silence(silence);
        }
        let supplied = self.data_dir.or_else(|| {
            self.config
                .data_dir()
                .map(|path| path.as_std_path().to_path_buf())
        });
        let server = PostgresServer::provision(settings, supplied.as_deref())?;
        if self.auto_start {
            server.start()?;
        }
        Ok(server)
    }
}

impl PostgresServer {
    /// Returns a builder with default configuration.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Prepares an instance from `config` without starting it.
    ///
    /// # Errors
    ///
    /// See [`ServerBuilder::build`].
    pub fn new(config: &Config) -> Result<Self, ServerError> {
        Self::builder().config(config.clone()).build()
    }

    fn provision(settings: ServerSettings, supplied: Option<&Path>) -> Result<Self, ServerError> {
        let (dirs, storage) = InstanceDirs::prepare(supplied)?;
        let data_dir = dirs.storage().path().to_path_buf();
        let socket_dir = dirs.socket_path().to_path_buf();
        let storage_owned = dirs.storage().is_owned();
        match storage {
            StorageState::NeedsInitialisation => {
                let plan = InitdbPlan {
                    binary: &settings.initdb,
                    data_dir: &data_dir,
                    superuser: &settings.superuser,
                    output: settings.output,
                };
                if let Err(error) = run_initdb(plan) {
                    discard(dirs);
                    return Err(error);
                }
            }
            StorageState::Initialised => {
                info!(
                    target: SUPERVISOR_TARGET,
                    data_dir = %data_dir.display(),
                    "reusing initialised storage"
                );
            }
        }
        info!(
            target: SUPERVISOR_TARGET,
            data_dir = %data_dir.display(),
            socket_dir = %socket_dir.display(),
            storage_owned,
            "instance prepared"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                settings,
                data_dir,
                socket_dir,
                storage_owned,
                state: Arc::new(Mutex::new(State::new(dirs))),
            }),
        })
    }

    /// Launches the server and waits for its socket.
    ///
    /// Other calls on this instance block until readiness is decided.
    ///
    /// # Errors
    ///
    /// [`UsageError::AlreadyStarted`] when the instance has been started
    /// before, a process error when the server cannot be launched, and a
    /// readiness error when the socket does not appear. After a readiness
    /// error the instance is [`Lifecycle::Faulted`] and `stop` cleans up.
    pub fn start(&self) -> Result<(), ServerError> {
        self.start_with(Strictness::Strict)
    }

    /// Like [`Self::start`], but a no-op on an instance that has already
    /// been started.
    ///
    /// # Errors
    ///
    /// As [`Self::start`], without the usage error.
    pub fn ensure_started(&self) -> Result<(), ServerError> {
        self.start_with(Strictness::Lenient)
    }

    fn start_with(&self, strictness: Strictness) -> Result<(), ServerError> {
        let shared = &self.shared;
        let mut state = shared.lock_state();
        if state.lifecycle.has_started() {
            return match strictness {
                Strictness::Strict => Err(UsageError::AlreadyStarted.into()),
                Strictness::Lenient => Ok(()),
            };
        }
        let settings = &shared.settings;
        let mut child = spawn_server(ServerPlan {
            binary: &settings.postgres,
            data_dir: &shared.data_dir,
            socket_dir: &shared.socket_dir,
            port: settings.port,
            output: settings.output,
        })?;
        let pid = child.id();
        let weak: Weak<Shared> = Arc::downgrade(shared);
        let target: Weak<dyn ExitStop> = weak;
        exit_hook::register_instance(target);

        let readiness = wait_for_socket(
            &shared.socket_dir,
            settings.port,
            &mut child,
            settings.readiness(),
        );
        state.child = Some(child);
        match readiness {
            Ok(()) => {
                state.lifecycle = Lifecycle::Running;
                info!(target: SUPERVISOR_TARGET, pid, "server ready");
                Ok(())
            }
            Err(error) => {
                state.lifecycle = Lifecycle::Faulted;
                warn!(target: SUPERVISOR_TARGET, pid, error = %error, "server failed to become ready");
                Err(error.into())
            }
        }
    }

    /// Signals the server to stop and tears the instance down.
    ///
    /// A graceful stop waits for every session to end. Blocking on it while
    /// the calling thread still holds a connection deadlocks: close
    /// connections first or use [`StopOptions::fast`].
    ///
    /// # Errors
    ///
    /// In strict mode, [`UsageError::NeverStarted`] or
    /// [`UsageError::AlreadyStopped`] when there is nothing to stop. A
    /// process error when the signal cannot be delivered; the instance is
    /// left as it was. Cleanup failures are reported in the
    /// [`CleanupReport`], not here.
    pub fn stop(&self, options: StopOptions) -> Result<StopOutcome, ServerError> {
        self.shared.stop(options)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> Lifecycle {
        self.shared.lock_state().lifecycle
    }

    /// Server process id, while the instance holds the process.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.shared.lock_state().child.as_ref().map(Child::id)
    }

    /// Storage directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.shared.data_dir
    }

    /// Communication directory holding the server socket.
    #[must_use]
    pub fn socket_dir(&self) -> &Path {
        &self.shared.socket_dir
    }

    /// Returns `true` when the storage directory is ephemeral and removed on
    /// teardown.
    #[must_use]
    pub fn owns_data_dir(&self) -> bool {
        self.shared.storage_owned
    }

    /// Port number the server socket is named after.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.shared.settings.port
    }

    /// Client configuration for `database` (the default database when
    /// `None`), for callers that open connections themselves.
    ///
    /// The database is not created.
    #[must_use]
    pub fn connection_config(&self, database: Option<&str>) -> postgres::Config {
        self.shared
            .connection_target()
            .config(self.shared.database_or_default(database))
    }

    /// Creates `database` (the default database when `None` or empty) if it does not
    /// exist and returns a new connection to it.
    ///
    /// # Errors
    ///
    /// [`UsageError::NotRunning`] outside [`Lifecycle::Running`];
    /// [`ServerError::Connect`] or [`ServerError::CreateDatabase`] with the
    /// client library's error otherwise.
    pub fn connect(&self, database: Option<&str>) -> Result<Client, ServerError> {
        if self.state() != Lifecycle::Running {
            return Err(UsageError::NotRunning.into());
        }
        let database = self.shared.database_or_default(database);
        connection::provision(&self.shared.connection_target(), database)
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    /// An empty name selects the default database too.
    fn database_or_default<'a>(&'a self, database: Option<&'a str>) -> &'a str {
        database
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.settings.default_database)
    }

    fn connection_target(&self) -> ConnectionTarget<'_> {
        ConnectionTarget {
            socket_dir: &self.socket_dir,
            port: self.settings.port,
            superuser: &self.settings.superuser,
            admin_database: &self.settings.admin_database,
            retry_window: self.settings.startup_timeout,
            poll_interval: self.settings.poll_interval,
        }
    }

    fn stop(&self, options: StopOptions) -> Result<StopOutcome, ServerError> {
        let mut state = self.lock_state();
        if let Some(rejection) = state.lifecycle.stop_rejection() {
            return match options.strictness() {
                Strictness::Strict => Err(rejection.into()),
                Strictness::Lenient => {
                    let pending = state.cleanup.clone();
                    drop(state);
                    Ok(join_existing(pending, rejection, options.cleanup()))
                }
            };
        }
        let Some(mut child) = state.child.take() else {
            // Faulted and Running always hold the process.
            return Err(UsageError::NotRunning.into());
        };
        if let Err(error) = signal_server(&mut child, options.mode()) {
            state.child = Some(child);
            return Err(error);
        }
        state.lifecycle = Lifecycle::Stopping;
        let handle = CleanupHandle::pending();
        state.cleanup = Some(handle.clone());
        let teardown = Teardown {
            state: Arc::clone(&self.state),
            child,
            dirs: state.dirs.take(),
            policy: self.settings.exit_policy(),
            handle: handle.clone(),
        };
        drop(state);
        match options.cleanup() {
            CleanupMode::Blocking => Ok(StopOutcome::Stopped(teardown.run())),
            CleanupMode::Background => {
                exit_hook::register_cleanup(handle.clone());
                teardown.spawn();
                Ok(StopOutcome::Cleaning(handle))
            }
        }
    }

    /// Fast, lenient stop used when the instance is abandoned.
    ///
    /// An instance that never started has no process; its owned directories
    /// are removed straight away.
    fn release(&self, cleanup: CleanupMode) {
        let mut state = self.lock_state();
        if state.lifecycle == Lifecycle::Uninitialised {
            state.lifecycle = Lifecycle::Stopped;
            let dirs = state.dirs.take();
            drop(state);
            if let Some(dirs) = dirs {
                discard(dirs);
            }
            return;
        }
        drop(state);
        let options = match cleanup {
            CleanupMode::Blocking => StopOptions::fast().blocking().lenient(),
            CleanupMode::Background => StopOptions::fast().background().lenient(),
        };
        if let Err(error) = self.stop(options) {
            warn!(target: SUPERVISOR_TARGET, error = %error, "failed to stop abandoned server");
        }
    }
}

impl ExitStop for Shared {
    fn stop_at_exit(&self) {
        self.release(CleanupMode::Blocking);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.release(CleanupMode::Background);
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lenient stop of an instance that is already stopping or stopped.
fn join_existing(
    pending: Option<CleanupHandle>,
    rejection: UsageError,
    cleanup: CleanupMode,
) -> StopOutcome {
    match (pending, cleanup) {
        (Some(handle), CleanupMode::Blocking) => StopOutcome::Stopped(handle.wait()),
        (Some(handle), CleanupMode::Background) => StopOutcome::Cleaning(handle),
        (None, _) => StopOutcome::Skipped(rejection),
    }
}

fn discard(dirs: InstanceDirs) {
    for (path, error) in dirs.remove_owned() {
        warn!(
            target: SUPERVISOR_TARGET,
            path = %path.display(),
            error = %error,
            "failed to remove owned directory"
        );
    }
}

/// Everything a teardown needs, detached from the instance.
struct Teardown {
    state: Arc<Mutex<State>>,
    child: Child,
    dirs: Option<InstanceDirs>,
    policy: ExitPolicy,
    handle: CleanupHandle,
}

impl Teardown {
    fn run(self) -> CleanupReport {
        let report = tear_down(self.child, self.dirs, self.policy);
        lock(&self.state).lifecycle = Lifecycle::Stopped;
        self.handle.complete(report.clone());
        info!(
            target: SUPERVISOR_TARGET,
            pid = report.pid(),
            clean = report.is_clean(),
            "instance stopped"
        );
        report
    }

    /// Runs on a worker thread, or inline when no thread can be spawned.
    fn spawn(self) {
        let pid = self.child.id();
        let (sender, receiver) = mpsc::channel::<Self>();
        let spawned = thread::Builder::new()
            .name(format!("pgserver-cleanup-{pid}"))
            .spawn(move || {
                if let Ok(teardown) = receiver.recv() {
                    teardown.run();
                }
            });
        match spawned {
            Ok(_) => {
                if let Err(SendError(teardown)) = sender.send(self) {
                    teardown.run();
                }
            }
            Err(error) => {
                warn!(
                    target: SUPERVISOR_TARGET,
                    pid,
                    error = %error,
                    "failed to spawn cleanup thread; cleaning up inline"
                );
                self.run();
            }
        }
    }
}
