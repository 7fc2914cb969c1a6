//! State lock records
//!
//! A lock is a small JSON record stored next to the state. Whoever manages to
//! create it owns the state until it is deleted or its lease runs out.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Lease granted to a new lock, in seconds (15 minutes)
pub const DEFAULT_LOCK_LEASE_SECS: i64 = 900;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub id: String,
    /// e.g. "plan", "state rm"
    pub operation: String,
    /// user@host of the holder
    pub who: String,
    pub created: DateTime<Utc>,
    /// After this instant another invocation may take the lock over
    pub expires: DateTime<Utc>,
}

impl LockInfo {
    pub fn new(operation: impl Into<String>) -> Self {
        Self::with_lease(operation, TimeDelta::seconds(DEFAULT_LOCK_LEASE_SECS))
    }

    pub fn with_lease(operation: impl Into<String>, lease: TimeDelta) -> Self {
        let created = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            who: holder_identity(),
            created,
            expires: created + lease,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expired_at(Utc::now())
    }

    /// Whether the lease has run out at `instant`
    pub fn expired_at(&self, instant: DateTime<Utc>) -> bool {
        instant > self.expires
    }

    /// Lease left, negative once expired
    pub fn remaining(&self) -> TimeDelta {
        self.expires - Utc::now()
    }
}

impl fmt::Display for LockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} held by {} for '{}' until {}",
            self.id,
            self.who,
            self.operation,
            self.expires.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

fn holder_identity() -> String {
    let user = ["USER", "USERNAME"]
        .into_iter()
        .find_map(|var| std::env::var(var).ok())
        .unwrap_or_else(|| "unknown".to_string());

    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{}@{}", user, host)
}
