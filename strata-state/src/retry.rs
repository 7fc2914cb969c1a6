//! Bounded retry for lock contention

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{BackendResult, StateBackend};
use crate::session::StateSession;

/// Exponential backoff policy applied when a lock is held elsewhere
///
/// Only [`BackendError::Locked`](crate::BackendError::Locked) is retried; any
/// other failure is returned immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRetry {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for LockRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl LockRetry {
    /// Single attempt, fail fast on contention
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` counts from 1
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Acquire a session on `backend`, waiting out contention
    pub async fn acquire(
        &self,
        backend: Arc<dyn StateBackend>,
        operation: &str,
    ) -> BackendResult<StateSession> {
        let mut attempt = 1;
        loop {
            match StateSession::acquire(Arc::clone(&backend), operation).await {
                Ok(session) => return Ok(session),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_after(attempt);
                    log::info!(
                        "{} (attempt {}/{}), retrying in {:?}",
                        e,
                        attempt,
                        self.max_attempts,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
