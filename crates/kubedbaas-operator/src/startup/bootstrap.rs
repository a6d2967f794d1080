//! Bootstrap orchestration
//!
//! Startup runs in strict order: configuration, then endpoint registration,
//! then the controller manager. Any stage failing is fatal and leaves the
//! orchestrator in [`BootstrapPhase::Failed`]; the pool is closed before an
//! error is returned so no connection outlives the process's decision to exit.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use kubedbaas_common::config::{load_config, ConfigError, ConfigSource};
use kubedbaas_pool::EndpointPool;

use super::endpoints::{register_endpoints, RegistrationError};
use super::lookup::DatabaseClassLookup;
use crate::controller_runner::{ControllerError, ControllerManager, Readiness};

/// Logged when the configuration file can't be found or read
pub const CONFIG_LOAD_ERROR: &str = "problem loading configuration file";
/// Logged when the configuration file isn't a valid operator configuration
pub const CONFIG_PARSE_ERROR: &str = "problem parsing configuration file";
/// Logged when an endpoint can't be registered into the pool
pub const DBMS_CONN_OPEN_ERROR: &str = "problem opening a connection to DBMS endpoint";
/// Logged when the controller manager stops with an error
pub const MANAGER_RUN_ERROR: &str = "problem running manager";

/// Where bootstrap currently is
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BootstrapPhase {
    /// Nothing has happened yet
    #[default]
    Init,
    /// The configuration is loaded and valid
    ConfigLoaded,
    /// Every resolvable endpoint is in the pool
    EndpointsRegistered,
    /// The controller manager is running
    ControllerRunning,
    /// A stage failed; the process should exit
    Failed,
}

impl fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BootstrapPhase::Init => "Init",
            BootstrapPhase::ConfigLoaded => "ConfigLoaded",
            BootstrapPhase::EndpointsRegistered => "EndpointsRegistered",
            BootstrapPhase::ControllerRunning => "ControllerRunning",
            BootstrapPhase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// A fatal bootstrap failure
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration file missing or unreadable
    #[error(transparent)]
    ConfigLoad(ConfigError),

    /// Configuration file malformed or invalid
    #[error(transparent)]
    ConfigParse(ConfigError),

    /// An endpoint couldn't be registered
    #[error(transparent)]
    DbmsConnOpen(#[from] RegistrationError),

    /// The controller manager failed
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl From<ConfigError> for BootstrapError {
    fn from(e: ConfigError) -> Self {
        if e.is_load_error() {
            BootstrapError::ConfigLoad(e)
        } else {
            BootstrapError::ConfigParse(e)
        }
    }
}

impl BootstrapError {
    /// Fixed message describing which stage failed
    pub fn fatal_message(&self) -> &'static str {
        match self {
            BootstrapError::ConfigLoad(_) => CONFIG_LOAD_ERROR,
            BootstrapError::ConfigParse(_) => CONFIG_PARSE_ERROR,
            BootstrapError::DbmsConnOpen(_) => DBMS_CONN_OPEN_ERROR,
            BootstrapError::Controller(_) => MANAGER_RUN_ERROR,
        }
    }
}

/// Drives the operator from an empty process to a running controller manager
pub struct Bootstrap {
    source: ConfigSource,
    lookup: Arc<dyn DatabaseClassLookup>,
    pool: Arc<dyn EndpointPool>,
    manager: Arc<dyn ControllerManager>,
    phase: BootstrapPhase,
    failed_at: Option<BootstrapPhase>,
}

impl Bootstrap {
    /// Create an orchestrator; nothing runs until [`run`](Self::run)
    pub fn new(
        source: ConfigSource,
        lookup: Arc<dyn DatabaseClassLookup>,
        pool: Arc<dyn EndpointPool>,
        manager: Arc<dyn ControllerManager>,
    ) -> Self {
        Self {
            source,
            lookup,
            pool,
            manager,
            phase: BootstrapPhase::Init,
            failed_at: None,
        }
    }

    /// Current phase
    pub fn phase(&self) -> BootstrapPhase {
        self.phase
    }

    /// Phase that was current when a stage failed
    pub fn failed_at(&self) -> Option<BootstrapPhase> {
        self.failed_at
    }

    /// Run every stage; returns once the controller manager stops
    pub async fn run(&mut self) -> Result<(), BootstrapError> {
        let result = self.run_stages().await;

        // Teardown happens on every exit path after the config was read
        if self.phase != BootstrapPhase::Init {
            self.pool.close_all().await;
            debug!("connection pool closed");
        }

        if let Err(e) = &result {
            warn!(phase = %self.phase, stage_error = %e, "bootstrap stage failed");
            self.failed_at = Some(self.phase);
            self.transition(BootstrapPhase::Failed);
        }
        result
    }

    async fn run_stages(&mut self) -> Result<(), BootstrapError> {
        let config = load_config(&self.source)?;
        self.transition(BootstrapPhase::ConfigLoaded);

        let report = register_endpoints(&config, self.lookup.as_ref(), self.pool.as_ref()).await?;
        info!(
            registered = report.registered.len(),
            skipped = report.skipped.len(),
            "endpoint registration complete"
        );
        self.transition(BootstrapPhase::EndpointsRegistered);

        if self.manager.prepare().await? == Readiness::ShutdownRequested {
            info!("shutdown requested before controllers started");
            return Ok(());
        }

        self.transition(BootstrapPhase::ControllerRunning);
        self.manager.run(&config, Arc::clone(&self.pool)).await?;

        info!("controller manager stopped");
        Ok(())
    }

    fn transition(&mut self, next: BootstrapPhase) {
        info!(from = %self.phase, to = %next, "bootstrap phase transition");
        self.phase = next;
    }
}
