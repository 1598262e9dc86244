//! External process handling for the server toolchain.
//!
//! - [`spawning`] launches `initdb` and the server.
//! - [`monitoring`] polls for the listening socket.
//! - [`shutdown`] delivers stop signals and confirms exit.

use std::process::{Command, Stdio};

pub(crate) mod monitoring;
pub(crate) mod shutdown;
pub(crate) mod spawning;

pub use shutdown::ShutdownMode;

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// What happens to the stdout/stderr of spawned commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputPolicy {
    /// Forward to the host's stdout/stderr.
    Inherit,
    /// Discard.
    Silent,
}

impl OutputPolicy {
    pub(crate) const fn from_silence(silence: bool) -> Self {
        if silence { Self::Silent } else { Self::Inherit }
    }

    /// Stdin is always detached; the server never reads it.
    fn apply(self, command: &mut Command) {
        command.stdin(Stdio::null());
        match self {
            Self::Inherit => {
                command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            Self::Silent => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
    }
}
