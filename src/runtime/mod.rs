//! # Runtime
//!
//! Process wiring: startup, the controller's own key material, the watch loop and
//! its error policy.

pub mod bootstrap;
pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
