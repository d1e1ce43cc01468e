use std::sync::Arc;
use std::time::Duration;

use crate::config::{self, LockConfig};
use crate::key::KeyNamer;
use crate::lease::{LeaseLock, LockOptions};
use crate::legacy::{LegacyLock, DEFAULT_LEGACY_LEASE, DEFAULT_LEGACY_WAIT};
use crate::store::LockStore;
use crate::{ConfigError, LockResult};

/// Entry point for both lock APIs over one store.
///
/// The legacy functions (`acquire_lock` / `release_lock`) and the lease
/// handles (`lock`) share the store and the key namespace, nothing else.
#[derive(Clone)]
pub struct LockClient {
    store: Arc<dyn LockStore>,
    keys: KeyNamer,
    options: LockOptions,
    legacy: LegacyLock,
    legacy_lease: Duration,
    legacy_wait: Duration,
}

impl LockClient {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        let keys = KeyNamer::default();
        Self {
            legacy: LegacyLock::new(Arc::clone(&store), keys.clone()),
            store,
            keys,
            options: LockOptions::default(),
            legacy_lease: DEFAULT_LEGACY_LEASE,
            legacy_wait: DEFAULT_LEGACY_WAIT,
        }
    }

    /// 設定ファイルの値（キープレフィックス・デフォルトオプション）を反映して作成する。
    ///
    /// 設定は [`config::validate`] を通してから適用する。
    pub fn from_config(
        store: Arc<dyn LockStore>,
        config: &LockConfig,
    ) -> Result<Self, ConfigError> {
        config::validate(config)?;
        Ok(Self::new(store)
            .with_prefix(config.key_prefix.clone())
            .with_options(config.lease.to_options())
            .with_legacy_retry_interval(config.legacy.retry_interval())
            .with_legacy_defaults(config.legacy.lease(), config.legacy.wait()))
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.keys = KeyNamer::new(prefix);
        self.legacy = LegacyLock::new(Arc::clone(&self.store), self.keys.clone())
            .with_retry_interval(self.legacy_retry_interval());
        self
    }

    /// `lock()` で作るハンドルのデフォルトオプション。
    pub fn with_options(mut self, options: LockOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_legacy_retry_interval(mut self, interval: Duration) -> Self {
        self.legacy = self.legacy.with_retry_interval(interval);
        self
    }

    /// `acquire_lock_default` が使うリースと待機時間。
    pub fn with_legacy_defaults(mut self, lease: Duration, wait: Duration) -> Self {
        self.legacy_lease = lease;
        self.legacy_wait = wait;
        self
    }

    pub fn store(&self) -> &Arc<dyn LockStore> {
        &self.store
    }

    pub fn keys(&self) -> &KeyNamer {
        &self.keys
    }

    fn legacy_retry_interval(&self) -> Duration {
        self.legacy.retry_interval()
    }

    /// Legacy acquire: polls for up to `wait` and returns the token, or `None`.
    pub async fn acquire_lock(
        &self,
        name: &str,
        lease: Duration,
        wait: Duration,
    ) -> LockResult<Option<String>> {
        self.legacy.acquire(name, lease, wait).await
    }

    /// Legacy acquire with the client's default lease and wait.
    pub async fn acquire_lock_default(&self, name: &str) -> LockResult<Option<String>> {
        self.legacy
            .acquire(name, self.legacy_lease, self.legacy_wait)
            .await
    }

    /// Legacy release: `Ok(false)` when `token` no longer owns the lock.
    pub async fn release_lock(&self, name: &str, token: &str) -> LockResult<bool> {
        self.legacy.release(name, token).await
    }

    /// Lease handle with the client's default options.
    pub fn lock(&self, name: &str) -> LockResult<LeaseLock> {
        self.lock_with(name, self.options.clone())
    }

    pub fn lock_with(&self, name: &str, options: LockOptions) -> LockResult<LeaseLock> {
        LeaseLock::new(Arc::clone(&self.store), name, self.keys.key(name), options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryLockStore, KeyTtl, LockError};

    #[tokio::test]
    async fn test_lock_uses_prefixed_key() {
        let client = LockClient::new(Arc::new(InMemoryLockStore::new())).with_prefix("redisz-lock");
        let lock = client.lock("a-lock").unwrap();
        assert_eq!(lock.key(), "redisz-lock:a-lock");
        assert!(lock.acquire().await.unwrap());
        assert!(client
            .store()
            .get("redisz-lock:a-lock")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_legacy_and_lease_share_namespace() {
        let client = LockClient::new(Arc::new(InMemoryLockStore::new()));
        let token = client
            .acquire_lock("a-lock", Duration::from_secs(10), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(token.is_some());

        let lock = client.lock("a-lock").unwrap();
        assert!(!lock.acquire().await.unwrap());
        assert!(lock.locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_from_config_applies_defaults() {
        let mut config = LockConfig::default();
        config.key_prefix = "app:lock".to_string();
        config.lease.lease_ms = 30_000;
        config.legacy.lease_ms = 5_000;
        config.legacy.wait_ms = 200;
        config.legacy.retry_interval_ms = 25;

        let client =
            LockClient::from_config(Arc::new(InMemoryLockStore::new()), &config).unwrap();
        assert_eq!(client.keys().prefix(), "app:lock");
        assert_eq!(client.legacy_retry_interval(), Duration::from_millis(25));
        assert_eq!(client.legacy_lease, Duration::from_secs(5));
        assert_eq!(client.legacy_wait, Duration::from_millis(200));
        let lock = client.lock("job").unwrap();
        assert_eq!(lock.options().lease, Duration::from_secs(30));
        assert_eq!(lock.key(), "app:lock:job");
    }

    #[test]
    fn test_from_config_rejects_invalid_config() {
        let mut config = LockConfig::default();
        config.legacy.retry_interval_ms = 0;

        let result = LockClient::from_config(Arc::new(InMemoryLockStore::new()), &config);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[tokio::test]
    async fn test_acquire_lock_default_uses_configured_lease_and_wait() {
        let client = LockClient::new(Arc::new(InMemoryLockStore::new()))
            .with_legacy_defaults(Duration::from_secs(7), Duration::from_millis(100));

        let token = client.acquire_lock_default("a-lock").await.unwrap();
        assert!(token.is_some());
        match client.store().ttl("lock:a-lock").await.unwrap() {
            KeyTtl::Expires(left) => {
                assert!(left > Duration::from_secs(6) && left <= Duration::from_secs(7))
            }
            other => panic!("expected Expires, got {:?}", other),
        }

        let started = std::time::Instant::now();
        assert!(client.acquire_lock_default("a-lock").await.unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_lock_with_invalid_options_fails() {
        let client = LockClient::new(Arc::new(InMemoryLockStore::new()));
        let result = client.lock_with("a-lock", LockOptions::new(Duration::ZERO));
        assert!(matches!(result, Err(LockError::InvalidOptions(_))));
    }
}
