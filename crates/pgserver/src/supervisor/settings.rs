use std::path::PathBuf;
use std::time::Duration;

use pgserver_config::Config;

use super::cleanup::ExitPolicy;
use crate::process::OutputPolicy;
use crate::process::monitoring::ReadinessPolicy;

/// Runtime view of [`Config`] used by one instance.
#[derive(Debug, Clone)]
pub(crate) struct ServerSettings {
    pub initdb: PathBuf,
    pub postgres: PathBuf,
    pub superuser: String,
    pub admin_database: String,
    pub default_database: String,
    pub port: u16,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    pub shutdown_timeout: Option<Duration>,
    pub output: OutputPolicy,
}

impl ServerSettings {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            initdb: config.initdb_path(),
            postgres: config.postgres_path(),
            superuser: config.superuser.clone(),
            admin_database: config.admin_database.clone(),
            default_database: config.default_database.clone(),
            port: config.port,
            startup_timeout: config.startup_timeout(),
            poll_interval: config.poll_interval(),
            shutdown_timeout: config.shutdown_timeout(),
            output: OutputPolicy::from_silence(config.silence_output),
        }
    }

    pub(crate) const fn readiness(&self) -> ReadinessPolicy {
        ReadinessPolicy {
            timeout: self.startup_timeout,
            poll_interval: self.poll_interval,
        }
    }

    pub(crate) const fn exit_policy(&self) -> ExitPolicy {
        ExitPolicy {
            grace: self.shutdown_timeout,
            poll_interval: self.poll_interval,
        }
    }
}
