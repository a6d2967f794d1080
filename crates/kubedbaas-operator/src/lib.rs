//! kubedbaas operator: bootstrap and controller startup

#![deny(missing_docs)]

/// Controller manager construction and the blocking run loop
pub mod controller_runner;
/// Startup stages: configuration, endpoint registration, orchestration
pub mod startup;
