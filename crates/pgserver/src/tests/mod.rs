//! Test suites for the supervisor, run against the fake toolchain.

pub(crate) mod support;
