//! Database controller error types

/// Errors returned by Database reconciliation
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The Database has no namespace
    #[error("missing namespace on Database")]
    MissingNamespace,
}
