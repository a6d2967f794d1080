//! Common types for kubedbaas: CRDs, operator configuration, errors, and utilities

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod leader_election;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager for status patches and lease updates
pub const FIELD_MANAGER: &str = "kubedbaas-operator";

/// Namespace searched for DatabaseClass resources when the configuration doesn't name one
pub const DEFAULT_CLASS_NAMESPACE: &str = "default";

/// Namespace holding the leader lease when `POD_NAMESPACE` is unset
pub const DEFAULT_LEASE_NAMESPACE: &str = "default";

/// Lease name used for leader election unless overridden on the command line
pub const DEFAULT_LEADER_ELECTION_ID: &str = "bfa62c96.bedag.ch";
