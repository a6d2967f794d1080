//! Leader election using Kubernetes Leases
//!
//! When several operator replicas run, only the holder of the
//! coordination.k8s.io/v1 Lease runs the Database controller. Updates use the
//! lease's resourceVersion, so a concurrent writer makes our update fail with
//! 409 Conflict instead of both replicas believing they lead.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::FIELD_MANAGER;

const LEASE_DURATION: Duration = Duration::from_secs(15);
const RENEW_INTERVAL: Duration = Duration::from_secs(5);
const RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Leader election errors
#[derive(Debug, Error)]
pub enum LeaderElectionError {
    /// Kubernetes API error
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The lease came back without a resourceVersion
    #[error("lease {0} has no resourceVersion")]
    MissingResourceVersion(String),
}

/// Outcome of reading a lease, decided without touching the API
#[derive(Debug, PartialEq, Eq)]
enum LeaseState {
    /// We hold it and should renew
    Held,
    /// Nobody holds it, or the holder let it expire
    Available,
    /// Someone else holds a live lease
    Taken,
}

fn lease_state(spec: Option<&LeaseSpec>, identity: &str, now: chrono::DateTime<Utc>) -> LeaseState {
    let holder = spec.and_then(|s| s.holder_identity.as_deref());
    if holder == Some(identity) {
        return LeaseState::Held;
    }
    if holder.is_none() {
        return LeaseState::Available;
    }

    let renew_time = spec.and_then(|s| s.renew_time.as_ref());
    let duration_secs = spec.and_then(|s| s.lease_duration_seconds);
    match (renew_time, duration_secs) {
        (Some(rt), Some(duration)) if now <= rt.0 + chrono::Duration::seconds(duration as i64) => {
            LeaseState::Taken
        }
        _ => LeaseState::Available,
    }
}

/// Leader elector using Kubernetes Leases
pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
    lease_duration: Duration,
    renew_interval: Duration,
    retry_interval: Duration,
}

impl LeaderElector {
    /// Create a new leader elector with default timing (15s lease, 5s renew, 2s retry)
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            lease_duration: LEASE_DURATION,
            renew_interval: RENEW_INTERVAL,
            retry_interval: RETRY_INTERVAL,
        }
    }

    /// Block until leadership is acquired, then return a guard that keeps renewing
    pub async fn acquire(self: Arc<Self>) -> Result<LeaderGuard, LeaderElectionError> {
        info!(
            identity = %self.identity,
            lease = %self.lease_name,
            namespace = %self.namespace,
            "waiting for leadership"
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, "leadership acquired");
                    return Ok(self.create_guard());
                }
                Ok(false) => {
                    debug!(identity = %self.identity, "lease held by another replica");
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "failed to acquire lease, retrying");
                }
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    fn create_guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move {
            elector.renewal_loop(lost_tx).await;
        });

        LeaderGuard {
            elector: Arc::clone(self),
            renewal_task,
            lost_rx: Some(lost_rx),
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();

        let existing = match api.get(&self.lease_name).await {
            Ok(lease) => lease,
            Err(kube::Error::Api(e)) if e.code == 404 => return self.create_lease(&api, now).await,
            Err(e) => return Err(e.into()),
        };

        let transitions = existing
            .spec
            .as_ref()
            .and_then(|s| s.lease_transitions)
            .unwrap_or(0);

        match lease_state(existing.spec.as_ref(), &self.identity, now) {
            LeaseState::Taken => Ok(false),
            LeaseState::Held => {
                let mut updated = existing;
                if let Some(ref mut spec) = updated.spec {
                    spec.renew_time = Some(MicroTime(now));
                }
                self.replace_lease(&api, updated).await
            }
            LeaseState::Available => {
                let rv = existing
                    .metadata
                    .resource_version
                    .clone()
                    .ok_or_else(|| LeaderElectionError::MissingResourceVersion(self.lease_name.clone()))?;
                let mut lease = self.lease(now, transitions + 1);
                lease.metadata.resource_version = Some(rv);
                self.replace_lease(&api, lease).await
            }
        }
    }

    fn lease(&self, now: chrono::DateTime<Utc>, transitions: i32) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(self.lease_duration.as_secs() as i32),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }

    async fn create_lease(
        &self,
        api: &Api<Lease>,
        now: chrono::DateTime<Utc>,
    ) -> Result<bool, LeaderElectionError> {
        match api.create(&PostParams::default(), &self.lease(now, 0)).await {
            Ok(_) => {
                info!(identity = %self.identity, "created new lease");
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the lease; resourceVersion on `lease` makes this compare-and-swap
    async fn replace_lease(&self, api: &Api<Lease>, lease: Lease) -> Result<bool, LeaderElectionError> {
        match api
            .replace(&self.lease_name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.identity, "lease update conflict");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn renewal_loop(&self, lost_tx: oneshot::Sender<()>) {
        loop {
            tokio::time::sleep(self.renew_interval).await;

            match self.try_acquire_or_renew().await {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    warn!(identity = %self.identity, "leadership lost");
                    let _ = lost_tx.send(());
                    return;
                }
            }
        }
    }

    /// Clear the holder so a standby can take over without waiting for expiry
    async fn release_lease(&self) -> Result<(), LeaderElectionError> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);

        let lease = match api.get(&self.lease_name).await {
            Ok(l) => l,
            Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let holder = lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref());
        if holder != Some(self.identity.as_str()) {
            debug!(identity = %self.identity, "not the lease holder, nothing to release");
            return Ok(());
        }

        let past = Utc::now() - chrono::Duration::seconds(60);
        let patch = json!({
            "spec": {
                "holderIdentity": null,
                "renewTime": past.to_rfc3339()
            }
        });

        api.patch(
            &self.lease_name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;

        info!(identity = %self.identity, "lease released");
        Ok(())
    }
}

/// Guard that maintains leadership
///
/// The renewal task is aborted when the guard is dropped.
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Wait until leadership is lost
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }

    /// Release leadership by clearing the lease holder (call on graceful shutdown)
    pub async fn release_leadership(&self) -> Result<(), LeaderElectionError> {
        self.elector.release_lease().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.renewal_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(holder: Option<&str>, renewed_secs_ago: i64, duration: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: holder.map(str::to_string),
            renew_time: Some(MicroTime(Utc::now() - chrono::Duration::seconds(renewed_secs_ago))),
            lease_duration_seconds: Some(duration),
            ..Default::default()
        }
    }

    #[test]
    fn own_lease_is_renewed() {
        let s = spec(Some("pod-a"), 100, 15);
        assert_eq!(lease_state(Some(&s), "pod-a", Utc::now()), LeaseState::Held);
    }

    #[test]
    fn live_foreign_lease_is_respected() {
        let s = spec(Some("pod-b"), 1, 15);
        assert_eq!(lease_state(Some(&s), "pod-a", Utc::now()), LeaseState::Taken);
    }

    #[test]
    fn expired_or_released_lease_is_available() {
        let expired = spec(Some("pod-b"), 60, 15);
        assert_eq!(lease_state(Some(&expired), "pod-a", Utc::now()), LeaseState::Available);

        let released = spec(None, 1, 15);
        assert_eq!(lease_state(Some(&released), "pod-a", Utc::now()), LeaseState::Available);

        assert_eq!(lease_state(None, "pod-a", Utc::now()), LeaseState::Available);
    }

    #[test]
    fn lease_without_timing_is_available() {
        let s = LeaseSpec {
            holder_identity: Some("pod-b".to_string()),
            ..Default::default()
        };
        assert_eq!(lease_state(Some(&s), "pod-a", Utc::now()), LeaseState::Available);
    }
}
