//! Resource lock records

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Lock compatibility mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// At most one holder; incompatible with everything
    Exclusive,
    /// Any number of holders; incompatible with exclusive
    Shared,
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exclusive => write!(f, "exclusive"),
            Self::Shared => write!(f, "shared"),
        }
    }
}

/// A persisted advisory lock with TTL
///
/// Locks survive process restarts; a crashed holder is reclaimed when the
/// lock expires during scheduled cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    /// Unique lock identifier
    pub lock_id: String,
    /// Locked resource type, e.g. `campaign` or `config`
    pub resource_type: String,
    /// Locked resource identifier
    pub resource_id: String,
    /// Worker holding the lock
    pub holder: String,
    /// Compatibility mode
    pub mode: LockMode,
    /// When the lock was granted
    pub acquired_at: DateTime<Utc>,
    /// When the lock lapses
    pub expires_at: DateTime<Utc>,
}

impl ResourceLock {
    /// Mint a lock expiring `ttl` from now
    pub fn new(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        holder: impl Into<String>,
        mode: LockMode,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(30));
        Self {
            lock_id: Uuid::new_v4().to_string(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            holder: holder.into(),
            mode,
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    /// Whether the lock has lapsed at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_sets_expiry() {
        let lock = ResourceLock::new("campaign", "c-1", "w-1", LockMode::Exclusive, Duration::from_secs(2));
        assert!(!lock.is_expired(Utc::now()));
        assert!(lock.is_expired(Utc::now() + ChronoDuration::seconds(3)));
    }
}
