//! # Configuration
//!
//! Controller settings from command line flags, each with an environment variable fallback.

mod controller;

pub use controller::{BackoffKind, Cli, ControllerConfig};
