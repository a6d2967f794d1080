//! Custom Resource Definitions for kubedbaas
//!
//! `DatabaseClass` describes how to drive a family of DBMS endpoints;
//! `Database` is what users create to request a database on one of them.

mod database;
mod database_class;

pub use database::{Database, DatabasePhase, DatabaseSpec, DatabaseStatus};
pub use database_class::{
    dsn_scheme, DatabaseClass, DatabaseClassSpec, DbmsDriver, Operation, OPERATION_CREATE,
    OPERATION_DELETE,
};

use kube::CustomResourceExt;

use crate::{Error, Result};

/// Render every kubedbaas CRD as one multi-document YAML stream
pub fn crd_manifests() -> Result<String> {
    let docs = [Database::crd(), DatabaseClass::crd()]
        .iter()
        .map(|crd| serde_yaml::to_string(crd).map_err(|e| Error::serialization(e.to_string())))
        .collect::<Result<Vec<_>>>()?;
    Ok(docs.join("---\n"))
}
