//! Shared fixtures for the supervisor test suites.

mod fake_toolchain;

pub use fake_toolchain::{FakeMarker, fake_config, read_signals, wait_until};
