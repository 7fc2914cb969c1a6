//! State backend trait and error types

use std::collections::BTreeMap;

use async_trait::async_trait;
use strata_core::tree::BackendSettings;
use strata_core::value::Value;
use thiserror::Error;

use crate::lock::LockInfo;
use crate::state::StateFile;

/// Errors that can occur when interacting with a state backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The state is locked by another invocation
    #[error("State is locked by {who} (lock ID: {lock_id}, operation: {operation})")]
    Locked {
        lock_id: String,
        who: String,
        operation: String,
    },

    /// The lock was not found (for release/force-unlock operations)
    #[error("Lock not found: {0}")]
    LockNotFound(String),

    /// Lock ID mismatch when trying to release
    #[error("Lock ID mismatch: expected {expected}, got {actual}")]
    LockMismatch { expected: String, actual: String },

    /// A state write failed and the previous state was restored
    #[error("State write failed, previous state restored: {0}")]
    WriteFailed(String),

    /// A state write failed and so did restoring the previous state
    #[error(
        "State may be corrupted: write failed ({write_error}) and restore failed ({restore_error}); manual intervention required"
    )]
    StateCorruption {
        write_error: String,
        restore_error: String,
    },

    /// A termination signal arrived while the lock was held
    #[error("Interrupted while holding the state lock")]
    Interrupted,

    /// The backend type is not supported
    #[error("Unsupported backend type: {0}")]
    UnsupportedBackend(String),

    /// Configuration error
    #[error("Backend configuration error: {0}")]
    Configuration(String),

    /// The bucket does not exist
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    /// State file is corrupted or invalid
    #[error("Invalid state file: {0}")]
    InvalidState(String),

    /// State lineage mismatch (prevents accidental state overwrites)
    #[error("State lineage mismatch: expected {expected}, got {actual}")]
    LineageMismatch { expected: String, actual: String },

    /// Operation attempted on a session that no longer holds its lock
    #[error("State session is not locked")]
    NotLocked,

    /// The session outlived its lock lease; another invocation may own the state now
    #[error("Lease of lock {lock_id} ran out {overdue_secs}s ago; refusing to write")]
    LeaseExpired { lock_id: String, overdue_secs: i64 },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("AWS error: {0}")]
    Aws(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BackendError {
    /// Create a Locked error from a LockInfo
    pub fn locked(lock: &LockInfo) -> Self {
        Self::Locked {
            lock_id: lock.id.clone(),
            who: lock.who.clone(),
            operation: lock.operation.clone(),
        }
    }

    /// Locked by a holder whose lock record could not be read yet
    pub(crate) fn locked_by_unknown() -> Self {
        Self::Locked {
            lock_id: "unknown".to_string(),
            who: "unknown".to_string(),
            operation: "unknown".to_string(),
        }
    }

    pub fn unsupported_backend(backend_type: impl Into<String>) -> Self {
        Self::UnsupportedBackend(backend_type.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether waiting and trying again may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Trait for state storage backends
///
/// Each lock request is a single attempt: contention surfaces as
/// [`BackendError::Locked`] immediately and retrying is left to the caller.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Short human readable location, used in log lines
    fn describe(&self) -> String;

    /// Read the current state from the backend
    ///
    /// Returns `None` if no state exists (first-time use)
    async fn read_state(&self) -> BackendResult<Option<StateFile>>;

    /// Replace the stored state
    async fn write_state(&self, state: &StateFile) -> BackendResult<()>;

    /// Delete the stored state entirely
    async fn remove_state(&self) -> BackendResult<()>;

    /// Acquire a lock for the given operation
    ///
    /// Fails with `Locked` if another invocation holds an unexpired lock.
    async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo>;

    /// Release a previously acquired lock, verifying that it is still ours
    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()>;

    /// Force release a lock by its ID
    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()>;

    /// The lock currently held, if any
    async fn current_lock(&self) -> BackendResult<Option<LockInfo>>;

    /// Prepare storage and write an empty state if none exists
    async fn init(&self) -> BackendResult<()>;
}

/// Configuration for a state backend
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Backend type (e.g., "s3", "local")
    pub backend_type: String,
    /// Backend-specific attributes
    pub attributes: BTreeMap<String, Value>,
}

impl BackendConfig {
    pub fn new(backend_type: impl Into<String>) -> Self {
        Self {
            backend_type: backend_type.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Build from the backend block declared on a construct tree
    pub fn from_settings(settings: &BackendSettings) -> Self {
        Self {
            backend_type: settings.backend_type.clone(),
            attributes: settings.attributes.clone(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Get a string attribute value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.attributes.get(key) {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get a required string attribute value
    pub fn require_string(&self, key: &str) -> BackendResult<&str> {
        self.get_string(key).ok_or_else(|| {
            BackendError::configuration(format!("Missing required attribute: {}", key))
        })
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.attributes.get(key) {
            Some(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Get a boolean attribute with a default value
    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }
}
