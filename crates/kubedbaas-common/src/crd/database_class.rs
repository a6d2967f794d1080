//! DatabaseClass CRD
//!
//! A DatabaseClass tells the operator which driver speaks to an endpoint and
//! which stored procedure implements each provisioning operation. Classes are
//! read once per configured endpoint at startup and never written by the
//! operator.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Operation invoked when a Database is created
pub const OPERATION_CREATE: &str = "create";

/// Operation invoked when a Database is deleted
pub const OPERATION_DELETE: &str = "delete";

/// DatabaseClass describes a family of DBMS endpoints.
///
/// Example:
/// ```yaml
/// apiVersion: databaseclass.dbaas.bedag.ch/v1
/// kind: DatabaseClass
/// metadata:
///   name: postgres-standard
///   namespace: default
/// spec:
///   driver: postgres
///   operations:
///     create:
///       name: sp_create_database
///       inputs:
///         dbName: "{{ .Metadata.name }}"
///     delete:
///       name: sp_drop_database
///   secretFormat:
///     username: "{{ .Result.username }}"
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "databaseclass.dbaas.bedag.ch",
    version = "v1",
    kind = "DatabaseClass",
    namespaced,
    printcolumn = r#"{"name":"Driver","type":"string","jsonPath":".spec.driver"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseClassSpec {
    /// Driver used to talk to endpoints of this class
    pub driver: DbmsDriver,

    /// Operation name (`create`, `delete`, ...) to stored procedure
    #[serde(default)]
    pub operations: BTreeMap<String, Operation>,

    /// Keys of the credentials Secret and the templates that fill them
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secret_format: BTreeMap<String, String>,
}

/// A stored procedure and the inputs passed to it
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Stored procedure name
    pub name: String,

    /// Named inputs, as templates over the Database resource
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, String>,
}

/// DBMS families the connection pool can open
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DbmsDriver {
    /// PostgreSQL
    Postgres,
    /// MySQL / MariaDB
    Mysql,
    /// SQLite (local development)
    Sqlite,
}

impl DbmsDriver {
    /// DSN schemes accepted for this driver
    pub fn schemes(&self) -> &'static [&'static str] {
        match self {
            Self::Postgres => &["postgres", "postgresql"],
            Self::Mysql => &["mysql", "mariadb"],
            Self::Sqlite => &["sqlite"],
        }
    }

    /// Whether `dsn` starts with one of this driver's schemes
    pub fn accepts_dsn(&self, dsn: &str) -> bool {
        dsn_scheme(dsn).is_some_and(|scheme| {
            self.schemes()
                .iter()
                .any(|s| s.eq_ignore_ascii_case(scheme))
        })
    }
}

impl std::fmt::Display for DbmsDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Postgres => write!(f, "postgres"),
            Self::Mysql => write!(f, "mysql"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Scheme part of a DSN (`postgres` in `postgres://...`)
pub fn dsn_scheme(dsn: &str) -> Option<&str> {
    dsn.split_once(':')
        .map(|(scheme, _)| scheme)
        .filter(|scheme| !scheme.is_empty())
}

impl DatabaseClassSpec {
    /// Validate the class; `class` is the resource name for error context
    pub fn validate(&self, class: &str) -> Result<(), Error> {
        for (op, procedure) in &self.operations {
            if procedure.name.trim().is_empty() {
                return Err(Error::validation_for(
                    class,
                    format!("operation '{op}' has no stored procedure name"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn spec_with(ops: &[(&str, &str)]) -> DatabaseClassSpec {
        DatabaseClassSpec {
            driver: DbmsDriver::Postgres,
            operations: ops
                .iter()
                .map(|(op, proc_name)| {
                    (
                        op.to_string(),
                        Operation {
                            name: proc_name.to_string(),
                            inputs: BTreeMap::new(),
                        },
                    )
                })
                .collect(),
            secret_format: BTreeMap::new(),
        }
    }

    #[rstest]
    #[case(DbmsDriver::Postgres, "postgres://u:p@db:5432/app", true)]
    #[case(DbmsDriver::Postgres, "postgresql://db/app", true)]
    #[case(DbmsDriver::Postgres, "mysql://db/app", false)]
    #[case(DbmsDriver::Mysql, "MySQL://db/app", true)]
    #[case(DbmsDriver::Mysql, "mariadb://db/app", true)]
    #[case(DbmsDriver::Sqlite, "sqlite::memory:", true)]
    #[case(DbmsDriver::Sqlite, "no-scheme-here", false)]
    #[case(DbmsDriver::Sqlite, ":memory:", false)]
    fn driver_matches_dsn_scheme(
        #[case] driver: DbmsDriver,
        #[case] dsn: &str,
        #[case] expected: bool,
    ) {
        assert_eq!(driver.accepts_dsn(dsn), expected);
    }

    #[test]
    fn class_spec_parses_from_yaml() {
        let yaml = r#"
driver: mysql
operations:
  create:
    name: sp_create
    inputs:
      dbName: "{{ .Metadata.name }}"
secretFormat:
  username: "{{ .Result.username }}"
"#;
        let spec: DatabaseClassSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.driver, DbmsDriver::Mysql);
        assert_eq!(spec.operations[OPERATION_CREATE].name, "sp_create");
        assert!(!spec.operations.contains_key(OPERATION_DELETE));
        assert_eq!(spec.secret_format.len(), 1);
    }

    #[test]
    fn empty_procedure_name_is_rejected() {
        assert!(spec_with(&[("create", "sp_create")]).validate("c").is_ok());

        let err = spec_with(&[("create", "sp_create"), ("delete", " ")])
            .validate("pg-class")
            .unwrap_err();
        assert!(err.to_string().contains("pg-class"));
        assert!(err.to_string().contains("'delete'"));
    }
}
