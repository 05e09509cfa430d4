use crate::Key;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ShoalError {
    /// A parameter list was decoded under the wrong command id.
    #[error("protocol fault: expected command id {expected}, got {actual}")]
    CommandIdMismatch { expected: u8, actual: u8 },
    #[error("protocol fault: {0}")]
    Protocol(String),
    #[error("key '{key}' is not available: not all owners are in the current view")]
    KeyUnavailable { key: Key },
    #[error("cluster is in degraded mode")]
    ClusterUnavailable,
    #[error("remote invocation on {target} failed: {reason}")]
    RemoteInvocation { target: String, reason: String },
    #[error("unable to acquire lock on key '{0}'")]
    LockTimeout(Key),
    #[error("delta merge failed: {0}")]
    DeltaMerge(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("transaction error: {0}")]
    Transaction(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ShoalError {
    pub fn key_unavailable(key: &Key) -> Self {
        ShoalError::KeyUnavailable { key: key.clone() }
    }

    pub fn remote(target: impl ToString, reason: impl ToString) -> Self {
        ShoalError::RemoteInvocation {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Degraded-mode rejection raised by partition handling.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ShoalError::KeyUnavailable { .. } | ShoalError::ClusterUnavailable)
    }

    pub fn is_protocol_fault(&self) -> bool {
        matches!(self, ShoalError::CommandIdMismatch { .. } | ShoalError::Protocol(_))
    }

    pub fn is_remote_invocation(&self) -> bool {
        matches!(self, ShoalError::RemoteInvocation { .. })
    }
}
