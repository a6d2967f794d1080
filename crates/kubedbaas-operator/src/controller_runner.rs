//! Controller startup
//!
//! Runs the Database controller once the connection pool is ready. Startup is
//! split in two: [`ControllerManager::prepare`] builds the client and, with
//! leader election on, waits for the lease; [`ControllerManager::run`] blocks
//! in the controller until shutdown. The controller only runs while this
//! replica holds the lease, and stops as soon as the lease is lost.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

use kubedbaas_common::config::OperatorConfig;
use kubedbaas_common::crd::Database;
use kubedbaas_common::kube_utils::ClusterClient;
use kubedbaas_common::leader_election::{LeaderElectionError, LeaderElector, LeaderGuard};
use kubedbaas_common::{DEFAULT_LEADER_ELECTION_ID, DEFAULT_LEASE_NAMESPACE};
use kubedbaas_database::{error_policy, reconcile, DatabaseContext};
use kubedbaas_pool::EndpointPool;

/// Watch timeout, kept below the API server's default request timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Errors that stop the controller manager
#[derive(Debug, Error)]
pub enum ControllerError {
    /// No Kubernetes client could be built
    #[error("kubernetes client unavailable: {0}")]
    Client(#[from] kubedbaas_common::Error),

    /// The leader lease couldn't be acquired
    #[error("leader election failed: {0}")]
    LeaderElection(#[from] LeaderElectionError),

    /// Another replica took over the lease while we were running
    #[error("leadership lost")]
    LeadershipLost,
}

/// Outcome of [`ControllerManager::prepare`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// Controllers can run
    Ready,
    /// A shutdown signal arrived first; nothing should run
    ShutdownRequested,
}

/// Starts the reconciliation controllers and blocks until they stop
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControllerManager: Send + Sync {
    /// Build the client and, if enabled, wait for the leader lease
    async fn prepare(&self) -> Result<Readiness, ControllerError>;

    /// Run until shutdown; the pool holds every registered endpoint
    async fn run(
        &self,
        config: &OperatorConfig,
        pool: Arc<dyn EndpointPool>,
    ) -> Result<(), ControllerError>;
}

/// Options for [`KubeControllerManager`]
#[derive(Clone, Debug)]
pub struct ManagerOptions {
    /// Only run controllers while holding the leader lease
    pub leader_election: bool,
    /// Lease name
    pub leader_election_id: String,
    /// Namespace the lease lives in
    pub lease_namespace: String,
    /// Holder identity written into the lease
    pub identity: String,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            leader_election: false,
            leader_election_id: DEFAULT_LEADER_ELECTION_ID.to_string(),
            lease_namespace: DEFAULT_LEASE_NAMESPACE.to_string(),
            identity: format!("kubedbaas-{}", std::process::id()),
        }
    }
}

/// [`ControllerManager`] running kube-rs controllers against the cluster
pub struct KubeControllerManager {
    client: Arc<ClusterClient>,
    options: ManagerOptions,
    leadership: Mutex<Option<LeaderGuard>>,
}

impl KubeControllerManager {
    /// Create a manager sharing `client` with the rest of the operator
    pub fn new(client: Arc<ClusterClient>, options: ManagerOptions) -> Self {
        Self {
            client,
            options,
            leadership: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ControllerManager for KubeControllerManager {
    async fn prepare(&self) -> Result<Readiness, ControllerError> {
        let client = self.client.get().await?;

        if !self.options.leader_election {
            return Ok(Readiness::Ready);
        }

        let elector = Arc::new(LeaderElector::new(
            client,
            &self.options.leader_election_id,
            &self.options.lease_namespace,
            &self.options.identity,
        ));

        // A standby replica waits here indefinitely; it must still exit cleanly on SIGTERM
        match unless_shutdown(elector.acquire(), shutdown_signal()).await {
            Some(guard) => {
                *self.leadership.lock().await = Some(guard?);
                Ok(Readiness::Ready)
            }
            None => {
                info!("shutdown requested while waiting for leadership");
                Ok(Readiness::ShutdownRequested)
            }
        }
    }

    async fn run(
        &self,
        config: &OperatorConfig,
        pool: Arc<dyn EndpointPool>,
    ) -> Result<(), ControllerError> {
        let client = self.client.get().await?;

        info!(
            endpoints = pool.names().len(),
            class_namespace = %config.class_namespace,
            leader_election = self.options.leader_election,
            "starting controllers"
        );

        let controller = build_database_controller(client, pool);

        let held = self.leadership.lock().await.take();
        let Some(mut guard) = held else {
            controller.await;
            info!("Database controller completed");
            return Ok(());
        };

        let result = tokio::select! {
            _ = controller => {
                info!("Database controller completed");
                Ok(())
            }
            _ = guard.lost() => {
                warn!("leadership lost, stopping controllers");
                Err(ControllerError::LeadershipLost)
            }
        };

        if let Err(e) = guard.release_leadership().await {
            warn!(error = %e, "failed to release leadership");
        }
        result
    }
}

/// Drive `work` to completion unless `shutdown` resolves first
async fn unless_shutdown<W, S>(work: W, shutdown: S) -> Option<W::Output>
where
    W: Future,
    S: Future<Output = ()>,
{
    tokio::select! {
        out = work => Some(out),
        _ = shutdown => None,
    }
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}

/// Build the Database controller future; it completes on SIGTERM/SIGINT
fn build_database_controller(
    client: Client,
    pool: Arc<dyn EndpointPool>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let databases: Api<Database> = Api::all(client.clone());
    let ctx = Arc::new(DatabaseContext::new(client, pool));

    info!("  - Database controller");

    Box::pin(
        Controller::new(databases, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(|result| async move {
                match result {
                    Ok(action) => {
                        tracing::debug!(?action, "Database reconciliation completed");
                    }
                    Err(e) => {
                        tracing::error!(error = ?e, "Database reconciliation error");
                    }
                }
            }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn leader_election_is_off_by_default() {
        let options = ManagerOptions::default();
        assert!(!options.leader_election);
        assert_eq!(options.leader_election_id, DEFAULT_LEADER_ELECTION_ID);
        assert_eq!(options.lease_namespace, DEFAULT_LEASE_NAMESPACE);
        assert!(options.identity.starts_with("kubedbaas-"));
    }

    #[test]
    fn manager_does_not_touch_the_cluster_until_prepared() {
        let client = Arc::new(ClusterClient::new());
        let _manager = KubeControllerManager::new(Arc::clone(&client), ManagerOptions::default());
        assert!(!client.is_initialized());
    }

    #[tokio::test]
    async fn shutdown_interrupts_work_that_never_finishes() {
        let out = unless_shutdown(std::future::pending::<u32>(), async {}).await;
        assert_eq!(out, None);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_a_standby_wait() {
        let standby = async {
            loop {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        };
        let shutdown = tokio::time::sleep(Duration::from_secs(30));

        let out: Option<()> = unless_shutdown(standby, shutdown).await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn finished_work_is_returned_without_shutdown() {
        let out = unless_shutdown(async { 7 }, std::future::pending()).await;
        assert_eq!(out, Some(7));
    }

    #[test]
    fn errors_describe_the_failure() {
        assert_eq!(ControllerError::LeadershipLost.to_string(), "leadership lost");
        let err = ControllerError::from(kubedbaas_common::Error::cluster_client("no kubeconfig"));
        assert!(err.to_string().contains("no kubeconfig"));
    }
}
