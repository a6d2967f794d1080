//! Kubernetes client helpers

use kube::Client;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::Error;

/// Lazily constructed, shared Kubernetes client
///
/// The client is built on first use from the in-cluster environment or the
/// local kubeconfig, then reused for every later call. Nothing touches the
/// cluster until a caller asks for the client.
#[derive(Default)]
pub struct ClusterClient {
    client: OnceCell<Client>,
}

impl ClusterClient {
    /// Create an empty holder; the client is built on first [`get`](Self::get)
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the shared client, constructing it on first call
    pub async fn get(&self) -> Result<Client, Error> {
        let client = self
            .client
            .get_or_try_init(|| async {
                debug!("creating Kubernetes client");
                Client::try_default()
                    .await
                    .map_err(|e| Error::cluster_client(e.to_string()))
            })
            .await?;
        Ok(client.clone())
    }

    /// Whether the client has been constructed yet
    pub fn is_initialized(&self) -> bool {
        self.client.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_is_not_built_eagerly() {
        let holder = ClusterClient::new();
        assert!(!holder.is_initialized());
    }
}
