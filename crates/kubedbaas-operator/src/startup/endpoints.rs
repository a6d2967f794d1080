//! Endpoint registration
//!
//! For every configured endpoint, in configuration order, the DatabaseClass
//! named by the entry is read from the cluster and the pair is handed to the
//! connection pool. A class that can't be read only skips its entry: the
//! remaining endpoints are still served. An endpoint that can't be registered
//! is fatal, because the operator would otherwise claim databases on a DBMS it
//! cannot reach.
//!
//! Both calls are bounded by the configured registration timeout so a single
//! unresponsive dependency can't stall startup.

use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, warn};

use kubedbaas_common::config::{DbmsConfigEntry, OperatorConfig};
use kubedbaas_pool::{EndpointPool, PoolError};

use super::lookup::DatabaseClassLookup;

/// A registration failure; always fatal to the process
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The pool rejected the endpoint or couldn't connect to it
    #[error("failed to register endpoint {endpoint}: {source}")]
    Pool {
        /// Reference name of the endpoint
        endpoint: String,
        /// Pool error
        source: PoolError,
    },

    /// The pool didn't answer within the registration timeout
    #[error("registering endpoint {endpoint} timed out after {timeout:?}")]
    Timeout {
        /// Reference name of the endpoint
        endpoint: String,
        /// Timeout that elapsed
        timeout: Duration,
    },
}

impl RegistrationError {
    /// Reference name of the endpoint that failed
    pub fn endpoint(&self) -> &str {
        match self {
            RegistrationError::Pool { endpoint, .. } | RegistrationError::Timeout { endpoint, .. } => {
                endpoint
            }
        }
    }
}

/// An entry that was skipped because its class couldn't be read
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedEntry {
    /// Reference name of the endpoint
    pub name: String,
    /// DatabaseClass that couldn't be read
    pub class_name: String,
    /// Why the lookup failed
    pub reason: String,
}

/// What registration did with each configured entry
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistrationReport {
    /// Entries registered into the pool, in configuration order
    pub registered: Vec<String>,
    /// Entries skipped, in configuration order
    pub skipped: Vec<SkippedEntry>,
}

/// Look up each entry's class and register the pair into the pool
///
/// Returns on the first registration failure; entries registered before it
/// stay in the pool for the caller to tear down.
pub async fn register_endpoints(
    config: &OperatorConfig,
    lookup: &dyn DatabaseClassLookup,
    pool: &dyn EndpointPool,
) -> Result<RegistrationReport, RegistrationError> {
    let limit = config.registration_timeout();
    let mut report = RegistrationReport::default();

    for entry in &config.dbms {
        let class = match timeout(limit, lookup.get(&entry.database_class_name, &config.class_namespace)).await {
            Ok(Ok(class)) => class,
            Ok(Err(e)) if e.is_not_found() => {
                warn!(
                    endpoint = %entry.name,
                    class = %entry.database_class_name,
                    namespace = %config.class_namespace,
                    "database class not found, skipping endpoint"
                );
                report.skipped.push(skipped(entry, e.to_string()));
                continue;
            }
            Ok(Err(e)) => {
                error!(
                    endpoint = %entry.name,
                    class = %entry.database_class_name,
                    namespace = %config.class_namespace,
                    error = %e,
                    "unable to get database class, skipping endpoint"
                );
                report.skipped.push(skipped(entry, e.to_string()));
                continue;
            }
            Err(_) => {
                warn!(
                    endpoint = %entry.name,
                    class = %entry.database_class_name,
                    timeout = ?limit,
                    "database class lookup timed out, skipping endpoint"
                );
                report
                    .skipped
                    .push(skipped(entry, format!("lookup timed out after {limit:?}")));
                continue;
            }
        };

        match timeout(limit, pool.register(entry, &class)).await {
            Ok(Ok(())) => {
                info!(endpoint = %entry.name, class = %entry.database_class_name, "endpoint registered");
                report.registered.push(entry.name.clone());
            }
            Ok(Err(source)) => {
                return Err(RegistrationError::Pool {
                    endpoint: entry.name.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(RegistrationError::Timeout {
                    endpoint: entry.name.clone(),
                    timeout: limit,
                })
            }
        }
    }

    Ok(report)
}

fn skipped(entry: &DbmsConfigEntry, reason: String) -> SkippedEntry {
    SkippedEntry {
        name: entry.name.clone(),
        class_name: entry.database_class_name.clone(),
        reason,
    }
}
