//! Error types for kubedbaas
//!
//! Errors carry the resource they concern so that a single log line is enough
//! to locate a misconfigured DatabaseClass or Database.

use thiserror::Error;

/// Main error type for kubedbaas cluster operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The Kubernetes client could not be constructed
    #[error("kubernetes client unavailable: {message}")]
    ClusterClient {
        /// Description of what failed
        message: String,
    },

    /// A custom resource has an invalid spec
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the offending resource
        resource: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a client construction error
    pub fn cluster_client(msg: impl Into<String>) -> Self {
        Self::ClusterClient {
            message: msg.into(),
        }
    }

    /// Create a validation error for a named resource
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Whether the resource was simply not there (HTTP 404)
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    #[test]
    fn validation_errors_name_the_resource() {
        let err = Error::validation_for("postgres-class", "operation 'create' has no procedure");
        assert!(err.to_string().contains("postgres-class"));
        assert!(err.to_string().contains("no procedure"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn not_found_is_detected_from_api_status() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(403).is_not_found());
        assert!(!Error::cluster_client("no kubeconfig").is_not_found());
        assert!(!Error::serialization("bad json").is_not_found());
    }
}
