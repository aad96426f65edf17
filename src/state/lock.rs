//! State locking for concurrent access protection.
//!
//! A lock record names the deployment, the operation in progress and the
//! holder. It expires on its own so that a crashed run cannot wedge a
//! deployment forever.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;
use uuid::Uuid;

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// Information about a state lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Deployment the lock guards.
    pub deployment: String,
    /// Who holds the lock.
    pub holder: String,
    /// Operation the holder is running.
    #[serde(default)]
    pub operation: Option<String>,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a lock for a deployment, valid for [`LOCK_EXPIRY_SECS`].
    #[must_use]
    pub fn new(deployment: &str, holder: &str) -> Self {
        Self::with_ttl(deployment, holder, default_ttl())
    }

    /// Creates a lock for a deployment, valid for `ttl`.
    #[must_use]
    pub fn with_ttl(deployment: &str, holder: &str, ttl: StdDuration) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            deployment: deployment.to_string(),
            holder: holder.to_string(),
            operation: None,
            acquired_at: now,
            expires_at: now + to_chrono(ttl),
        }
    }

    /// Returns the same lock with its expiry pushed to `ttl` from now.
    #[must_use]
    pub fn renewed(&self, ttl: StdDuration) -> Self {
        Self {
            expires_at: Utc::now() + to_chrono(ttl),
            ..self.clone()
        }
    }

    /// Tags the lock with the operation in progress.
    #[must_use]
    pub fn for_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

/// Lock lifetime used when a store is not given one.
#[must_use]
pub const fn default_ttl() -> StdDuration {
    StdDuration::from_secs(LOCK_EXPIRY_SECS.unsigned_abs())
}

fn to_chrono(ttl: StdDuration) -> Duration {
    Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(LOCK_EXPIRY_SECS))
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get().map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());
    let pid = std::process::id();
    let suffix = &Uuid::new_v4().simple().to_string()[..8];

    format!("{hostname}-{pid}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_lock_is_live() {
        let lock = LockInfo::new("svc", "holder").for_operation("apply");
        assert_eq!(lock.deployment, "svc");
        assert_eq!(lock.operation.as_deref(), Some("apply"));
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > 0);
    }

    #[test]
    fn test_expired_lock() {
        let mut lock = LockInfo::new("svc", "holder");
        lock.expires_at = Utc::now() - Duration::seconds(1);
        assert!(lock.is_expired());
        assert_eq!(lock.remaining_secs(), 0);
    }

    #[test]
    fn test_renewal_keeps_identity() {
        let lock = LockInfo::with_ttl("svc", "holder", StdDuration::from_millis(10));
        let renewed = lock.renewed(StdDuration::from_secs(60));
        assert_eq!(renewed.lock_id, lock.lock_id);
        assert_eq!(renewed.acquired_at, lock.acquired_at);
        assert!(renewed.expires_at > lock.expires_at);
        assert!(renewed.remaining_secs() > 50);
    }

    #[test]
    fn test_holder_ids_are_unique() {
        let id1 = generate_holder_id();
        let id2 = generate_holder_id();
        assert_ne!(id1, id2);
        assert!(id1.contains(&std::process::id().to_string()));
    }
}
