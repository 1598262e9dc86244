//! Connection Provisioner: create-if-missing, then connect.
//!
//! `CREATE DATABASE` is issued from the administrative database rather than
//! `template1`; connecting to the template while another session copies it
//! makes concurrent provisioning of different names fail. An existing
//! database is recognised by its SQLSTATE, never by message text: `42P04`
//! when it already existed, or `23505` on the catalogue's name index when a
//! concurrent `CREATE DATABASE` for the same name committed first.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use postgres::error::SqlState;
use postgres::{Client, Config, NoTls};
use tracing::{debug, info};

use crate::error::ServerError;

const CONNECTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::connection");
const APPLICATION_NAME: &str = env!("CARGO_PKG_NAME");
const DATABASE_NAME_INDEX: &str = "pg_database_datname_index";

/// Where and as whom connections are opened.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnectionTarget<'a> {
    pub socket_dir: &'a Path,
    pub port: u16,
    pub superuser: &'a str,
    pub admin_database: &'a str,
    /// How long "the database system is starting up" is retried.
    pub retry_window: Duration,
    pub poll_interval: Duration,
}

impl ConnectionTarget<'_> {
    /// Client configuration for `database` over the Unix socket.
    pub(crate) fn config(&self, database: &str) -> Config {
        let mut config = Config::new();
        config
            .host_path(self.socket_dir)
            .port(self.port)
            .user(self.superuser)
            .dbname(database)
            .application_name(APPLICATION_NAME);
        config
    }
}

/// Ensures `database` exists and returns a fresh connection to it.
pub(crate) fn provision(target: &ConnectionTarget<'_>, database: &str) -> Result<Client, ServerError> {
    create_database(target, database)?;
    connect(target, database)
}

fn create_database(target: &ConnectionTarget<'_>, database: &str) -> Result<(), ServerError> {
    let mut admin = connect(target, target.admin_database)?;
    let statement = format!("CREATE DATABASE {}", quote_identifier(database));
    match admin.batch_execute(&statement) {
        Ok(()) => {
            info!(target: CONNECTION_TARGET, database, "database created");
            Ok(())
        }
        Err(error) if already_exists(&error) => {
            debug!(target: CONNECTION_TARGET, database, "database already exists");
            Ok(())
        }
        Err(source) => Err(ServerError::CreateDatabase {
            database: database.to_owned(),
            source,
        }),
    }
}

fn already_exists(error: &postgres::Error) -> bool {
    let constraint = error.as_db_error().and_then(|db| db.constraint());
    names_existing_database(error.code(), constraint)
}

fn names_existing_database(code: Option<&SqlState>, constraint: Option<&str>) -> bool {
    match code {
        Some(code) if *code == SqlState::DUPLICATE_DATABASE => true,
        Some(code) if *code == SqlState::UNIQUE_VIOLATION => {
            constraint == Some(DATABASE_NAME_INDEX)
        }
        _ => false,
    }
}

/// Connects to `database`, retrying while the server is still starting up.
pub(crate) fn connect(target: &ConnectionTarget<'_>, database: &str) -> Result<Client, ServerError> {
    let config = target.config(database);
    let deadline = Instant::now() + target.retry_window;
    loop {
        match config.connect(NoTls) {
            Ok(client) => return Ok(client),
            Err(error)
                if error.code() == Some(&SqlState::CANNOT_CONNECT_NOW)
                    && Instant::now() < deadline =>
            {
                debug!(target: CONNECTION_TARGET, database, "server still starting; retrying");
                thread::sleep(target.poll_interval);
            }
            Err(source) => {
                return Err(ServerError::Connect {
                    database: database.to_owned(),
                    source,
                });
            }
        }
    }
}

/// Quotes `name` as an SQL identifier.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
