//! DatabaseClass lookup
//!
//! Bootstrap reads one DatabaseClass per configured endpoint. The trait lets
//! the registrar be exercised without an API server.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::Api;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use kubedbaas_common::crd::DatabaseClass;
use kubedbaas_common::kube_utils::ClusterClient;
use kubedbaas_common::Error;

/// Read access to DatabaseClass resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatabaseClassLookup: Send + Sync {
    /// Fetch and validate the named class from `namespace`
    async fn get(&self, name: &str, namespace: &str) -> Result<DatabaseClass, Error>;
}

/// [`DatabaseClassLookup`] backed by the Kubernetes API
pub struct KubeClassLookup {
    client: Arc<ClusterClient>,
}

impl KubeClassLookup {
    /// Create a lookup sharing `client` with the rest of the operator
    pub fn new(client: Arc<ClusterClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DatabaseClassLookup for KubeClassLookup {
    async fn get(&self, name: &str, namespace: &str) -> Result<DatabaseClass, Error> {
        let client = self.client.get().await?;
        let api: Api<DatabaseClass> = Api::namespaced(client, namespace);

        let class = api.get(name).await?;
        class.spec.validate(name)?;

        debug!(class = %name, namespace = %namespace, driver = %class.spec.driver, "database class found");
        Ok(class)
    }
}
