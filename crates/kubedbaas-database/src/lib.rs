//! Database controller for kubedbaas
//!
//! Watches Database resources and reports whether the endpoint they select
//! was registered at startup and its class can provision them.

#![deny(missing_docs)]

pub mod controller;
pub mod error;

pub use controller::{error_policy, evaluate, reconcile, DatabaseContext};
pub use error::DatabaseError;
