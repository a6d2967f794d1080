//! Database controller implementation
//!
//! A Database is Ready when its endpoint is in the connection pool and the
//! endpoint's class declares a `create` operation. Anything else is Failed
//! with a message naming what is missing; the resource is requeued so a
//! restarted operator with a fixed configuration picks it up.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info};

use kubedbaas_common::crd::{Database, DatabasePhase, DatabaseStatus, OPERATION_CREATE};
use kubedbaas_common::FIELD_MANAGER;
use kubedbaas_pool::EndpointPool;

use crate::error::DatabaseError;

const READY_REQUEUE: Duration = Duration::from_secs(300);
const FAILED_REQUEUE: Duration = Duration::from_secs(60);

/// Shared context for the Database controller
pub struct DatabaseContext {
    /// Client used for status updates
    pub client: Client,
    /// Endpoints registered at startup
    pub pool: Arc<dyn EndpointPool>,
}

impl DatabaseContext {
    /// Create a context over the registered endpoints
    pub fn new(client: Client, pool: Arc<dyn EndpointPool>) -> Self {
        Self { client, pool }
    }
}

/// Reconcile a Database resource
pub async fn reconcile(
    db: Arc<Database>,
    ctx: Arc<DatabaseContext>,
) -> Result<Action, DatabaseError> {
    let name = db.name_any();
    let namespace = db.namespace().ok_or(DatabaseError::MissingNamespace)?;

    info!(database = %name, namespace = %namespace, endpoint = %db.spec.endpoint, "reconciling Database");

    let status = evaluate(&db, ctx.pool.as_ref());
    let requeue = match status.phase {
        DatabasePhase::Ready => READY_REQUEUE,
        _ => FAILED_REQUEUE,
    };

    update_status(&ctx.client, &db, &namespace, status).await?;
    Ok(Action::requeue(requeue))
}

/// Compute the status a Database should have given the registered endpoints
pub fn evaluate(db: &Database, pool: &dyn EndpointPool) -> DatabaseStatus {
    let endpoint_name = &db.spec.endpoint;

    let status = match pool.get(endpoint_name) {
        None => DatabaseStatus::new(
            DatabasePhase::Failed,
            format!("endpoint '{endpoint_name}' is not registered"),
        ),
        Some(endpoint) if !endpoint.supports(OPERATION_CREATE) => DatabaseStatus::new(
            DatabasePhase::Failed,
            format!(
                "class '{}' of endpoint '{endpoint_name}' defines no '{OPERATION_CREATE}' operation",
                endpoint.class_name
            ),
        ),
        Some(endpoint) => DatabaseStatus::new(
            DatabasePhase::Ready,
            format!(
                "endpoint '{endpoint_name}' ({} via class '{}') is available",
                endpoint.driver, endpoint.class_name
            ),
        ),
    };

    status.observed(db.metadata.generation)
}

async fn update_status(
    client: &Client,
    db: &Database,
    namespace: &str,
    status: DatabaseStatus,
) -> Result<(), DatabaseError> {
    if db.status.as_ref() == Some(&status) {
        debug!(database = %db.name_any(), "status unchanged, skipping update");
        return Ok(());
    }

    let api: Api<Database> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        &db.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Error policy for Database reconciliation
pub fn error_policy(db: Arc<Database>, error: &DatabaseError, _ctx: Arc<DatabaseContext>) -> Action {
    error!(
        ?error,
        database = %db.name_any(),
        "database reconciliation failed"
    );
    Action::requeue(Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use kubedbaas_common::config::DbmsConfigEntry;
    use kubedbaas_common::crd::{DatabaseClass, DatabaseSpec, DbmsDriver, Operation};
    use kubedbaas_pool::{PoolError, RegisteredEndpoint};
    use mockall::mock;
    use sqlx::any::AnyPoolOptions;

    mock! {
        pub Pool {}

        #[async_trait::async_trait]
        impl EndpointPool for Pool {
            async fn register(&self, entry: &DbmsConfigEntry, class: &DatabaseClass) -> Result<(), PoolError>;
            fn get(&self, name: &str) -> Option<RegisteredEndpoint>;
            fn names(&self) -> Vec<String>;
            async fn close_all(&self);
        }
    }

    fn database(endpoint: &str) -> Database {
        let mut db = Database::new(
            "orders",
            DatabaseSpec {
                endpoint: endpoint.to_string(),
                params: BTreeMap::new(),
            },
        );
        db.metadata.namespace = Some("shop".to_string());
        db.metadata.generation = Some(3);
        db
    }

    fn endpoint(operations: &[&str]) -> RegisteredEndpoint {
        sqlx::any::install_default_drivers();
        RegisteredEndpoint {
            name: "eu-pg".to_string(),
            class_name: "postgres-std".to_string(),
            driver: DbmsDriver::Postgres,
            operations: operations
                .iter()
                .map(|op| {
                    (
                        op.to_string(),
                        Operation {
                            name: format!("sp_{op}"),
                            inputs: BTreeMap::new(),
                        },
                    )
                })
                .collect(),
            pool: AnyPoolOptions::new()
                .connect_lazy("sqlite::memory:")
                .expect("lazy pool"),
        }
    }

    fn pool_returning(endpoint: Option<RegisteredEndpoint>) -> MockPool {
        let mut pool = MockPool::new();
        pool.expect_get().times(1).return_const(endpoint);
        pool
    }

    #[test]
    fn unregistered_endpoint_fails() {
        let pool = pool_returning(None);
        let status = evaluate(&database("eu-pg"), &pool);

        assert_eq!(status.phase, DatabasePhase::Failed);
        assert!(status.message.unwrap().contains("not registered"));
        assert_eq!(status.observed_generation, Some(3));
    }

    #[tokio::test]
    async fn class_without_create_operation_fails() {
        let pool = pool_returning(Some(endpoint(&["delete"])));
        let status = evaluate(&database("eu-pg"), &pool);

        assert_eq!(status.phase, DatabasePhase::Failed);
        let message = status.message.unwrap();
        assert!(message.contains("postgres-std"));
        assert!(message.contains("'create'"));
    }

    #[tokio::test]
    async fn registered_endpoint_with_create_is_ready() {
        let pool = pool_returning(Some(endpoint(&["create", "delete"])));
        let status = evaluate(&database("eu-pg"), &pool);

        assert_eq!(status.phase, DatabasePhase::Ready);
        assert!(status.message.unwrap().contains("postgres via class 'postgres-std'"));
    }

    #[test]
    fn missing_namespace_is_reported() {
        let err = DatabaseError::MissingNamespace;
        assert!(err.to_string().contains("namespace"));
    }
}
