use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::key::KeyNamer;
use crate::lease::MIN_DURATION;
use crate::store::{KeyTtl, LockStore, WatchOutcome};
use crate::token::new_token;
use crate::{LockError, LockResult};

pub const DEFAULT_LEGACY_LEASE: Duration = Duration::from_secs(10);
pub const DEFAULT_LEGACY_WAIT: Duration = Duration::from_secs(10);
pub const DEFAULT_LEGACY_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// 識別子ベースのレガシーロック。
///
/// 取得時に生成したトークンを呼び出し側が保持し、解放時に渡す方式。
/// 取得失敗はエラーではなく `None` で返す。新規コードでは
/// [`LeaseLock`](crate::LeaseLock) を使うこと。
#[derive(Clone)]
pub struct LegacyLock {
    store: Arc<dyn LockStore>,
    keys: KeyNamer,
    retry_interval: Duration,
}

impl LegacyLock {
    pub fn new(store: Arc<dyn LockStore>, keys: KeyNamer) -> Self {
        Self {
            store,
            keys,
            retry_interval: DEFAULT_LEGACY_RETRY_INTERVAL,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// `wait` が経過するまでポーリングしてロックを取得する。
    ///
    /// 成功時はトークンを返す。期限内に取得できなければ `Ok(None)`。
    /// 有効期限のないキー（期限設定前にクラッシュした取得者が残したもの）を
    /// 見つけた場合は、所有者を変えずに `lease` の期限だけを設定する。
    pub async fn acquire(
        &self,
        name: &str,
        lease: Duration,
        wait: Duration,
    ) -> LockResult<Option<String>> {
        if lease < MIN_DURATION {
            return Err(LockError::InvalidOptions(
                "lease must be at least 1ms".into(),
            ));
        }

        let key = self.keys.key(name);
        let token = new_token();
        let deadline = Instant::now() + wait;

        while Instant::now() < deadline {
            if self.store.set_if_absent(&key, &token, None).await? {
                self.store.expire(&key, lease).await?;
                tracing::debug!(lock = name, "レガシーロックを取得しました");
                return Ok(Some(token));
            }

            if self.store.ttl(&key).await? == KeyTtl::Persistent {
                tracing::warn!(
                    lock = name,
                    lease_ms = lease.as_millis() as u64,
                    "有効期限のないロックキーに期限を設定しました"
                );
                self.store.expire(&key, lease).await?;
            }

            tokio::time::sleep(self.retry_interval).await;
        }

        tracing::debug!(lock = name, ?wait, "レガシーロックの取得がタイムアウトしました");
        Ok(None)
    }

    /// トークンが一致する場合のみロックキーを削除する。
    ///
    /// WATCH 中にキーが書き換えられた場合は読み直して再試行する。
    /// 一致しなければ `Ok(false)`。
    pub async fn release(&self, name: &str, token: &str) -> LockResult<bool> {
        let key = self.keys.key(name);
        loop {
            match self.store.watched_delete(&key, token).await? {
                WatchOutcome::Committed => {
                    tracing::debug!(lock = name, "レガシーロックを解放しました");
                    return Ok(true);
                }
                WatchOutcome::Mismatch => {
                    tracing::debug!(lock = name, "レガシーロックは既に他の保持者のものです");
                    return Ok(false);
                }
                WatchOutcome::Conflict => {
                    tracing::trace!(lock = name, "WATCH 競合のため解放を再試行します");
                }
            }
        }
    }
}
