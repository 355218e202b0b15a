//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The CRM refused the operation for this module.
    #[error("access denied: {operation} on {module}")]
    PermissionDenied {
        /// Remote module name.
        module: String,
        /// Denied operation ("export" or "import").
        operation: String,
    },

    /// A single remote record could not be processed.
    #[error("malformed record {}: {message}", remote_id.as_deref().unwrap_or("<unknown>"))]
    MalformedRecord {
        /// Remote id, if it could be read from the payload.
        remote_id: Option<String>,
        /// What was wrong with it.
        message: String,
    },

    /// Error reported by the remote access adapter.
    #[error("remote error: {message}")]
    Remote {
        /// Error message.
        message: String,
        /// Whether the call can be retried.
        retryable: bool,
    },

    /// Error reported by the local store adapter.
    #[error("local store error: {0}")]
    LocalStore(String),

    /// The remote side rejected a create or update.
    #[error("push of local item {local_id} failed: {message}")]
    PushFailed {
        /// Local item identity.
        local_id: String,
        /// Underlying failure.
        message: String,
    },

    /// Two local items claimed the same remote id.
    #[error("remote id {remote_id} is already bound to local item {existing}")]
    DuplicateRemoteId {
        /// The contested remote id.
        remote_id: String,
        /// Local item already holding it.
        existing: String,
    },

    /// A local item vanished between lookup and use.
    #[error("local item not found: {0}")]
    ItemNotFound(String),

    /// The pass was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current phase.
        from: String,
        /// Attempted target phase.
        to: String,
    },

    /// A timestamp did not match any accepted format.
    #[error("invalid timestamp: {0}")]
    Timestamp(String),

    /// JSON payload error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Creates a retryable remote error.
    pub fn remote_retryable(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable remote error.
    pub fn remote_fatal(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a malformed-record error.
    pub fn malformed(remote_id: Option<&str>, message: impl Into<String>) -> Self {
        Self::MalformedRecord {
            remote_id: remote_id.map(str::to_owned),
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote { retryable, .. } => *retryable,
            SyncError::PushFailed { .. } => true,
            SyncError::LocalStore(_) => true,
            _ => false,
        }
    }

    /// Returns true if the error concerns one record or item only.
    ///
    /// A reconciliation pass logs these and moves on to the next record.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            SyncError::MalformedRecord { .. }
                | SyncError::LocalStore(_)
                | SyncError::PushFailed { .. }
                | SyncError::DuplicateRemoteId { .. }
                | SyncError::ItemNotFound(_)
                | SyncError::Timestamp(_)
                | SyncError::Json(_)
        )
    }
}
