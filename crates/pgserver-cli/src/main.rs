//! CLI entrypoint for the `pgserver` command.
//!
//! The binary delegates to [`pgserver_cli::run`], which loads configuration,
//! starts one server, prints its connection details and stops it again when
//! a termination signal arrives.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    pgserver_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
