//! Connection pool for kubedbaas
//!
//! Holds one sqlx pool per registered DBMS endpoint. Endpoints are registered
//! once at startup from the operator configuration together with their
//! DatabaseClass, then looked up by reference name by the Database
//! controller.

#![deny(missing_docs)]

mod error;
mod pool;

pub use error::PoolError;
pub use pool::{ConnectionPool, ConnectionPoolConfig, EndpointPool, RegisteredEndpoint};
