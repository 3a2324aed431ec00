//! Application-level node locks (§3's `lock` xattr, §5's "CheckLock is a
//! higher-level application lock").

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// The serialized record stored as the `lock` xattr and mirrored by a lock
/// file in the node directory (§3, §4.5's "a lock file exists it is
/// removed as part of the rename").
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub kind: LockKind,
    pub owner: String,
    pub lock_id: String,
    pub expires_at: Option<Timestamp>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum LockKind {
    Exclusive,
    Shared,
}

impl LockRecord {
    pub fn new(
        kind: LockKind,
        owner: impl Into<String>,
        lock_id: impl Into<String>,
        expires_at: Option<Timestamp>,
    ) -> Self {
        Self {
            kind,
            owner: owner.into(),
            lock_id: lock_id.into(),
            expires_at,
        }
    }

    /// Whether this lock record has passed its expiry (§10.5: "treats an
    /// expired lock as absent rather than erroring locked").
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Whether `carried_lock_id` satisfies this lock.
    pub fn satisfied_by(&self, carried_lock_id: Option<&str>) -> bool {
        carried_lock_id == Some(self.lock_id.as_str())
    }

    pub fn to_bytes(&self) -> crate::error::Result<Vec<u8>> {
        rmp_serde::to_vec(self)
            .map_err(|e| crate::error::internal(format!("encoding lock record: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> crate::error::Result<Self> {
        rmp_serde::from_slice(bytes)
            .map_err(|e| crate::error::internal(format!("decoding lock record: {e}")))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn expired_lock_is_detected() {
        let now = "2024-01-01T00:00:00Z".parse::<Timestamp>().unwrap();
        let past = "2023-01-01T00:00:00Z".parse::<Timestamp>().unwrap();
        let lock = LockRecord::new(LockKind::Exclusive, "alice", "lock-1", Some(past));
        assert!(lock.is_expired(now));

        let future = "2025-01-01T00:00:00Z".parse::<Timestamp>().unwrap();
        let lock = LockRecord::new(LockKind::Exclusive, "alice", "lock-1", Some(future));
        assert!(!lock.is_expired(now));
    }

    #[test]
    fn round_trips_through_msgpack() {
        let lock = LockRecord::new(LockKind::Shared, "bob", "lock-2", None);
        let bytes = lock.to_bytes().unwrap();
        assert_eq!(LockRecord::from_bytes(&bytes).unwrap(), lock);
    }

    #[test]
    fn satisfied_only_by_matching_id() {
        let lock = LockRecord::new(LockKind::Exclusive, "alice", "lock-1", None);
        assert!(lock.satisfied_by(Some("lock-1")));
        assert!(!lock.satisfied_by(Some("lock-2")));
        assert!(!lock.satisfied_by(None));
    }
}
