//! Backend implementations for state storage

mod local;
mod s3;

pub use local::{DEFAULT_STATE_PATH, LocalBackend};
pub use s3::S3Backend;

use std::sync::Arc;

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};

/// Create a backend from configuration
///
/// Dispatches on `backend_type`. The result is shared so a session can still
/// release its lock from a background task when dropped early.
pub async fn create_backend(config: &BackendConfig) -> BackendResult<Arc<dyn StateBackend>> {
    match config.backend_type.as_str() {
        "s3" => {
            let backend = S3Backend::from_config(config).await?;
            Ok(Arc::new(backend))
        }
        "local" => Ok(Arc::new(LocalBackend::from_config(config)?)),
        other => Err(BackendError::unsupported_backend(other)),
    }
}
