use async_trait::async_trait;
use std::time::Duration;

use crate::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Remaining lifetime of a key, as reported by `PTTL`-style commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// -2: key does not exist.
    Missing,
    /// -1: key exists without an expiry.
    Persistent,
    Expires(Duration),
}

impl KeyTtl {
    /// Decodes the integer convention of `TTL`/`PTTL` (`-2`, `-1`, remaining).
    pub fn from_millis(raw: i64) -> Self {
        match raw {
            -2 => KeyTtl::Missing,
            r if r < 0 => KeyTtl::Persistent,
            r => KeyTtl::Expires(Duration::from_millis(r as u64)),
        }
    }
}

/// Result of a single WATCH / read / MULTI-DEL-EXEC round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The value matched and the transactional delete committed.
    Committed,
    /// The value did not match; the watch was dropped without writing.
    Mismatch,
    /// The watched key changed before EXEC; the transaction was aborted.
    Conflict,
}

/// Minimal command contract the lock manager needs from a key-value store.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait LockStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Atomic set-if-absent, optionally with an expiry set in the same step.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        lease: Option<Duration>,
    ) -> StoreResult<bool>;

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl>;

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    async fn delete(&self, key: &str) -> StoreResult<u64>;

    /// Whether `compare_and_delete` is backed by a native atomic primitive.
    fn supports_compare_and_delete(&self) -> bool {
        false
    }

    async fn compare_and_delete(&self, _key: &str, _expected: &str) -> StoreResult<bool> {
        Err(StoreError::Unsupported("COMPARE_AND_DELETE"))
    }

    /// Resets the expiry of `key` only while it still holds `expected`.
    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> StoreResult<bool>;

    /// One optimistic-transaction round: watch `key`, read it and delete it
    /// inside a transaction if it equals `expected`.
    async fn watched_delete(&self, key: &str, expected: &str) -> StoreResult<WatchOutcome>;
}
