//! Pool error types

use thiserror::Error;

use kubedbaas_common::crd::DbmsDriver;

/// Errors returned when registering an endpoint
#[derive(Debug, Error)]
pub enum PoolError {
    /// An endpoint with this reference name is already registered
    #[error("endpoint {endpoint} is already registered")]
    AlreadyRegistered {
        /// Reference name of the endpoint
        endpoint: String,
    },

    /// The DSN's scheme doesn't belong to the class's driver
    #[error("endpoint {endpoint}: dsn scheme '{scheme}' does not match {driver} driver of class {class}")]
    DriverMismatch {
        /// Reference name of the endpoint
        endpoint: String,
        /// DatabaseClass the endpoint was registered with
        class: String,
        /// Driver declared by the class
        driver: DbmsDriver,
        /// Scheme found in the DSN (empty if none)
        scheme: String,
    },

    /// The endpoint could not be reached or refused the connection
    #[error("failed to connect to endpoint {endpoint}: {source}")]
    Connect {
        /// Reference name of the endpoint
        endpoint: String,
        /// Underlying driver error
        source: sqlx::Error,
    },
}

impl PoolError {
    /// Reference name of the endpoint the error concerns
    pub fn endpoint(&self) -> &str {
        match self {
            PoolError::AlreadyRegistered { endpoint }
            | PoolError::DriverMismatch { endpoint, .. }
            | PoolError::Connect { endpoint, .. } => endpoint,
        }
    }
}
