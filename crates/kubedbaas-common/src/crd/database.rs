//! Database CRD
//!
//! A Database asks the operator to provision one database on a registered
//! DBMS endpoint. The endpoint is selected by the reference name it was given
//! in the operator configuration.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Database requests a database on an external DBMS endpoint.
///
/// Example:
/// ```yaml
/// apiVersion: database.dbaas.bedag.ch/v1
/// kind: Database
/// metadata:
///   name: orders
///   namespace: shop
/// spec:
///   endpoint: eu-postgres-prod
///   params:
///     owner: shop
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "database.dbaas.bedag.ch",
    version = "v1",
    kind = "Database",
    namespaced,
    status = "DatabaseStatus",
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".spec.endpoint"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    /// Reference name of the configured DBMS endpoint
    pub endpoint: String,

    /// Inputs for the class's stored procedures
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

/// Database status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStatus {
    /// Current phase
    #[serde(default)]
    pub phase: DatabasePhase,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation of the spec this status describes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Database phase
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DatabasePhase {
    /// Not yet reconciled
    #[default]
    Pending,
    /// The endpoint is registered and can serve this database
    Ready,
    /// The endpoint or its class can't serve this database
    Failed,
}

impl std::fmt::Display for DatabasePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

impl DatabaseStatus {
    /// Status with the given phase and message
    pub fn new(phase: DatabasePhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: Some(message.into()),
            observed_generation: None,
        }
    }

    /// Record the generation this status was computed for
    pub fn observed(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }
}
