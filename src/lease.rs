//! Lease-based lock handle.
//!
//! A [`LeaseLock`] binds a lock name to its options and caches the token of
//! its last successful acquire. Ownership is never assumed from the cache:
//! release, extend and `owned` all compare the cached token with the store.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;

use crate::store::{LockStore, WatchOutcome};
use crate::token::{new_token, TokenScope, TokenSlot};
use crate::{LockError, LockResult};

/// Smallest lease, poll interval or extension the store can represent.
pub const MIN_DURATION: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct LockOptions {
    /// 更新されなければストアがキーを削除するまでの時間。
    pub lease: Duration,
    /// 競合時に待機するかどうか。
    pub blocking: bool,
    /// 待機する最大時間（`blocking` の場合のみ有効）。
    pub blocking_wait: Duration,
    /// 待機中の再試行間隔。
    pub poll_interval: Duration,
    pub token_scope: TokenScope,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(10),
            blocking: false,
            blocking_wait: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            token_scope: TokenScope::Local,
        }
    }
}

impl LockOptions {
    pub fn new(lease: Duration) -> Self {
        Self {
            lease,
            ..Default::default()
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// 競合時に最大 `wait` だけ待機するようにする。
    pub fn blocking(mut self, wait: Duration) -> Self {
        self.blocking = true;
        self.blocking_wait = wait;
        self
    }

    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_token_scope(mut self, scope: TokenScope) -> Self {
        self.token_scope = scope;
        self
    }

    /// ストアの有効期限はミリ秒単位のため、1ms 未満のリースと間隔は受け付けない。
    pub fn validate(&self) -> LockResult<()> {
        if self.lease < MIN_DURATION {
            return Err(LockError::InvalidOptions(
                "lease must be at least 1ms".into(),
            ));
        }
        if self.poll_interval < MIN_DURATION {
            return Err(LockError::InvalidOptions(
                "poll_interval must be at least 1ms".into(),
            ));
        }
        if self.poll_interval > self.lease {
            return Err(LockError::InvalidOptions(
                "poll_interval must not exceed lease".into(),
            ));
        }
        Ok(())
    }
}

/// Handle on one named lock.
///
/// Cloning a handle follows its [`TokenScope`]: `Local` clones start
/// unacquired, `Shared` clones see the same token.
#[derive(Clone)]
pub struct LeaseLock {
    store: Arc<dyn LockStore>,
    name: String,
    key: String,
    options: LockOptions,
    token: TokenSlot,
}

impl std::fmt::Debug for LeaseLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseLock")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl LeaseLock {
    /// `key` は名前空間付きのストアキー。通常は [`LockClient::lock`](crate::LockClient::lock) から作る。
    pub fn new(
        store: Arc<dyn LockStore>,
        name: impl Into<String>,
        key: impl Into<String>,
        options: LockOptions,
    ) -> LockResult<Self> {
        options.validate()?;
        Ok(Self {
            store,
            name: name.into(),
            key: key.into(),
            token: TokenSlot::new(options.token_scope),
            options,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Token cached by the last successful acquire, if any.
    pub fn token(&self) -> Option<String> {
        self.token.get()
    }

    /// Tries to take the lock with a fresh token.
    ///
    /// Returns `Ok(false)` when the lock is held elsewhere and either the
    /// handle is non-blocking or `blocking_wait` has elapsed.
    pub async fn acquire(&self) -> LockResult<bool> {
        self.acquire_inner(new_token(), self.default_wait()).await
    }

    /// Same as [`acquire`](Self::acquire) with a caller-supplied token.
    pub async fn acquire_with_token(&self, token: impl Into<String>) -> LockResult<bool> {
        self.acquire_inner(token.into(), self.default_wait()).await
    }

    /// Same as [`acquire`](Self::acquire) with the blocking policy overridden
    /// for this call: `None` tries once, `Some(wait)` waits up to `wait`.
    pub async fn acquire_with(&self, blocking: Option<Duration>) -> LockResult<bool> {
        self.acquire_inner(new_token(), blocking).await
    }

    fn default_wait(&self) -> Option<Duration> {
        self.options
            .blocking
            .then_some(self.options.blocking_wait)
    }

    async fn acquire_inner(&self, token: String, wait: Option<Duration>) -> LockResult<bool> {
        let started = Instant::now();
        let deadline = wait.map(|wait| started + wait);

        loop {
            if self
                .store
                .set_if_absent(&self.key, &token, Some(self.options.lease))
                .await?
            {
                tracing::debug!(lock = %self.name, "ロックを取得しました");
                self.token.set(token);
                return Ok(true);
            }

            match deadline {
                None => return Ok(false),
                Some(deadline) if Instant::now() > deadline => {
                    tracing::debug!(
                        lock = %self.name,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "ロック待機がタイムアウトしました"
                    );
                    return Ok(false);
                }
                Some(_) => tokio::time::sleep(self.options.poll_interval).await,
            }
        }
    }

    /// Releases the lock if the store still holds this handle's token.
    ///
    /// The cached token is cleared once the store has answered. A store error
    /// keeps it, so the release can be retried.
    pub async fn release(&self) -> LockResult<()> {
        let Some(token) = self.token.get() else {
            return Err(LockError::LockNotOwned(self.name.clone()));
        };

        let released = if self.store.supports_compare_and_delete() {
            self.store.compare_and_delete(&self.key, &token).await?
        } else {
            self.release_watched(&token).await?
        };
        self.token.clear_if(&token);

        if released {
            tracing::debug!(lock = %self.name, "ロックを解放しました");
            Ok(())
        } else {
            tracing::debug!(lock = %self.name, "解放時にロックを保持していませんでした");
            Err(LockError::LockNotOwned(self.name.clone()))
        }
    }

    async fn release_watched(&self, token: &str) -> LockResult<bool> {
        loop {
            match self.store.watched_delete(&self.key, token).await? {
                WatchOutcome::Committed => return Ok(true),
                WatchOutcome::Mismatch => return Ok(false),
                WatchOutcome::Conflict => {
                    tracing::trace!(lock = %self.name, "WATCH 競合のため解放を再試行します");
                }
            }
        }
    }

    /// Resets the expiry to `additional` while this handle still owns the lock.
    pub async fn extend(&self, additional: Duration) -> LockResult<()> {
        if additional < MIN_DURATION {
            return Err(LockError::InvalidOptions(
                "extension must be at least 1ms".into(),
            ));
        }
        self.reset_expiry(additional).await
    }

    /// Resets the expiry to the configured lease.
    pub async fn reacquire(&self) -> LockResult<()> {
        self.reset_expiry(self.options.lease).await
    }

    async fn reset_expiry(&self, ttl: Duration) -> LockResult<()> {
        let Some(token) = self.token.get() else {
            return Err(LockError::LockNotOwned(self.name.clone()));
        };

        if self.store.compare_and_expire(&self.key, &token, ttl).await? {
            tracing::debug!(lock = %self.name, ttl_ms = ttl.as_millis() as u64, "ロックの有効期限を更新しました");
            Ok(())
        } else {
            // リモート側では既に失効しているため、ハンドルも未取得状態に戻す。
            self.token.clear_if(&token);
            Err(LockError::LockNotOwned(self.name.clone()))
        }
    }

    /// Whether the store currently holds this handle's token. Best effort:
    /// the answer can be stale as soon as it is returned.
    pub async fn owned(&self) -> LockResult<bool> {
        let Some(token) = self.token.get() else {
            return Ok(false);
        };
        let current = self.store.get(&self.key).await?;
        Ok(current.as_deref() == Some(token.as_str()))
    }

    /// Whether anyone currently holds the lock.
    pub async fn locked(&self) -> LockResult<bool> {
        Ok(self.store.get(&self.key).await?.is_some())
    }

    /// Runs `body` while holding the lock.
    ///
    /// The lock is released once `body` completes, including when its output
    /// is an error and when it panics (the panic is resumed afterwards).
    pub async fn scoped<F, Fut, T>(&self, body: F) -> LockResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let started = Instant::now();
        if !self.acquire().await? {
            return Err(LockError::AcquireTimeout {
                name: self.name.clone(),
                waited: started.elapsed(),
            });
        }

        let outcome = AssertUnwindSafe(body()).catch_unwind().await;
        let released = self.release().await;

        match outcome {
            Ok(value) => {
                released?;
                Ok(value)
            }
            Err(panic) => {
                if let Err(err) = released {
                    tracing::warn!(lock = %self.name, error = %err, "パニック後のロック解放に失敗しました");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}
