//! Strata State Management
//!
//! Persists the resolved attributes of applied resources in a backend
//! (local file or S3) and guards every modification with a lock.
//!
//! # Overview
//!
//! - **StateFile**: the persisted record, keyed by resource path
//! - **StateBackend**: storage with single-attempt locking
//! - **StateSession**: a held lock, with rollback of failed writes
//! - **LockRetry**: caller-side backoff while a lock is contended
//!
//! # Example
//!
//! ```ignore
//! use strata_state::{BackendConfig, LockRetry, create_backend, with_lock};
//!
//! let config = BackendConfig::new("s3")
//!     .with_attribute("bucket", "my-state-bucket")
//!     .with_attribute("key", "terraform.tfstate")
//!     .with_attribute("region", "us-east-1");
//! let backend = create_backend(&config).await?;
//!
//! with_lock(backend, "state rm", &LockRetry::default(), async |session| {
//!     let mut state = session.read_state().await?.unwrap_or_default();
//!     state.remove_resource("site/bucket");
//!     session.write_state(&mut state).await
//! })
//! .await?;
//! ```

pub mod backend;
pub mod backends;
pub mod diff;
pub mod lock;
pub mod retry;
pub mod session;
pub mod state;

pub use backend::{BackendConfig, BackendError, BackendResult, StateBackend};
pub use backends::create_backend;
pub use lock::LockInfo;
pub use retry::LockRetry;
pub use session::{SessionPhase, StateSession, with_lock};
pub use state::StateFile;
