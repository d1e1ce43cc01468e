use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::store::{KeyTtl, LockStore, StoreResult, WatchOutcome};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |exp| exp <= now)
    }
}

/// プロセス内で完結するロックストア。
///
/// 全コマンドが単一の Mutex の下で実行されるため、set-if-absent や
/// compare-and-delete はそのままアトミックになる。テストや単一プロセス構成向け。
pub struct InMemoryLockStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// 期限切れのエントリを取り除いた上で、有効なエントリを返す。
    fn live_entry<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        let now = Instant::now();
        if entries.get(key).map_or(false, |e| e.is_expired(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

impl Default for InMemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        Ok(Self::live_entry(&mut entries, key).map(|e| e.value.clone()))
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        lease: Option<Duration>,
    ) -> StoreResult<bool> {
        let mut entries = self.entries.lock().await;
        if Self::live_entry(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: lease.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let mut entries = self.entries.lock().await;
        let ttl = match Self::live_entry(&mut entries, key) {
            None => KeyTtl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at: Some(exp),
                ..
            }) => KeyTtl::Expires(exp.saturating_duration_since(Instant::now())),
        };
        Ok(ttl)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut entries = self.entries.lock().await;
        match Self::live_entry(&mut entries, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        let mut entries = self.entries.lock().await;
        let existed = Self::live_entry(&mut entries, key).is_some();
        entries.remove(key);
        Ok(u64::from(existed))
    }

    fn supports_compare_and_delete(&self) -> bool {
        true
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut entries = self.entries.lock().await;
        let matched = Self::live_entry(&mut entries, key).map_or(false, |e| e.value == expected);
        if matched {
            entries.remove(key);
        }
        Ok(matched)
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut entries = self.entries.lock().await;
        match Self::live_entry(&mut entries, key) {
            Some(entry) if entry.value == expected => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // Mutex の下では監視中の書き込み競合が起こり得ないため Conflict は返さない。
    async fn watched_delete(&self, key: &str, expected: &str) -> StoreResult<WatchOutcome> {
        let mut entries = self.entries.lock().await;
        let matched = Self::live_entry(&mut entries, key).map_or(false, |e| e.value == expected);
        if !matched {
            return Ok(WatchOutcome::Mismatch);
        }
        entries.remove(key);
        Ok(WatchOutcome::Committed)
    }
}
