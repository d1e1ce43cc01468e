use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, ErrorKind, Pipeline, RedisError, Script};

use crate::config::RedisConfig;
use crate::store::{KeyTtl, LockStore, StoreResult, WatchOutcome};
use crate::StoreError;

/// Redis-backed lock store.
///
/// Plain commands go through a shared multiplexed connection. `WATCH` is
/// connection-scoped, so every optimistic transaction opens its own
/// connection and drops it when the round is over.
#[derive(Clone)]
pub struct RedisLockStore {
    client: Client,
    conn: MultiplexedConnection,
    native_scripts: bool,
}

impl RedisLockStore {
    /// Create a new RedisLockStore from a Redis URL.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(map_redis_error)?;
        Self::from_client(client).await
    }

    /// Create a new RedisLockStore from the `redis` section of [`LockConfig`](crate::LockConfig).
    pub async fn from_config(config: &RedisConfig) -> Result<Self, StoreError> {
        Ok(Self::new(&config.url)
            .await?
            .with_native_scripts(config.native_scripts))
    }

    /// Create a new RedisLockStore from an existing client.
    pub async fn from_client(client: Client) -> Result<Self, StoreError> {
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)?;
        Ok(Self {
            client,
            conn,
            native_scripts: true,
        })
    }

    /// Enable or disable the Lua scripts used for compare-and-delete and
    /// compare-and-expire. When disabled both go through `WATCH`/`MULTI`/`EXEC`.
    pub fn with_native_scripts(mut self, enabled: bool) -> Self {
        self.native_scripts = enabled;
        self
    }

    pub fn native_scripts(&self) -> bool {
        self.native_scripts
    }

    /// Runs one WATCH round: the transaction built by `queue` is only
    /// executed while `key` still holds `expected`.
    async fn watched_write<F>(&self, key: &str, expected: &str, queue: F) -> StoreResult<WatchOutcome>
    where
        F: FnOnce(&mut Pipeline),
    {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)?;

        let _: () = redis::cmd("WATCH")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        let current: Option<String> = conn.get(key).await.map_err(map_redis_error)?;
        if current.as_deref() != Some(expected) {
            let _: () = redis::cmd("UNWATCH")
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)?;
            return Ok(WatchOutcome::Mismatch);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        queue(&mut pipe);
        // EXEC が nil を返した場合（監視キーが変更された）は None になる。
        let committed: Option<(i64,)> = pipe
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        Ok(match committed {
            Some(_) => WatchOutcome::Committed,
            None => WatchOutcome::Conflict,
        })
    }
}

/// Lua script for safe lock release.
/// Only deletes the key if the stored value matches the token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Lua script for safe lock extension.
/// Only resets the TTL if the stored value matches the token.
const EXTEND_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

#[async_trait]
impl LockStore for RedisLockStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.map_err(map_redis_error)?;
        Ok(value)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        lease: Option<Duration>,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.clone();

        // SET key value NX [PX milliseconds]
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(lease) = lease {
            cmd.arg("PX").arg(duration_millis(lease));
        }
        let result: Option<String> = cmd.query_async(&mut conn).await.map_err(map_redis_error)?;
        Ok(result.is_some())
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let mut conn = self.conn.clone();
        let raw: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(KeyTtl::from_millis(raw))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let updated: bool = conn
            .pexpire(key, duration_millis(ttl))
            .await
            .map_err(map_redis_error)?;
        Ok(updated)
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.del(key).await.map_err(map_redis_error)?;
        Ok(count)
    }

    fn supports_compare_and_delete(&self) -> bool {
        self.native_scripts
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        if !self.native_scripts {
            return Err(StoreError::Unsupported("COMPARE_AND_DELETE"));
        }
        let mut conn = self.conn.clone();
        let result: i64 = Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(result == 1)
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let millis = duration_millis(ttl);

        if self.native_scripts {
            let mut conn = self.conn.clone();
            let result: i64 = Script::new(EXTEND_SCRIPT)
                .key(key)
                .arg(expected)
                .arg(millis)
                .invoke_async(&mut conn)
                .await
                .map_err(map_redis_error)?;
            return Ok(result == 1);
        }

        loop {
            let outcome = self
                .watched_write(key, expected, |pipe| {
                    pipe.cmd("PEXPIRE").arg(key).arg(millis);
                })
                .await?;
            match outcome {
                WatchOutcome::Committed => return Ok(true),
                WatchOutcome::Mismatch => return Ok(false),
                WatchOutcome::Conflict => {
                    tracing::trace!(key, "WATCH 競合のため PEXPIRE を再試行します");
                }
            }
        }
    }

    async fn watched_delete(&self, key: &str, expected: &str) -> StoreResult<WatchOutcome> {
        self.watched_write(key, expected, |pipe| {
            pipe.cmd("DEL").arg(key);
        })
        .await
    }
}

// Redis の有効期限は符号付き 64bit のミリ秒。上限を超える値は i64::MAX に丸める。
fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn map_redis_error(err: RedisError) -> StoreError {
    if err.kind() == ErrorKind::IoError
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Command(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_io_error_to_unavailable() {
        let err = map_redis_error(RedisError::from((
            redis::ErrorKind::IoError,
            "connection refused",
        )));
        match err {
            StoreError::Unavailable(msg) => {
                assert!(msg.contains("connection refused"));
            }
            _ => panic!("Expected Unavailable error"),
        }
    }

    #[test]
    fn test_map_response_error_to_command() {
        let err = map_redis_error(RedisError::from((
            redis::ErrorKind::ResponseError,
            "WRONGTYPE",
        )));
        assert!(matches!(err, StoreError::Command(_)));
    }

    #[test]
    fn test_release_script_contains_get_and_del() {
        assert!(RELEASE_SCRIPT.contains("redis.call(\"get\""));
        assert!(RELEASE_SCRIPT.contains("redis.call(\"del\""));
    }

    #[test]
    fn test_extend_script_contains_get_and_pexpire() {
        assert!(EXTEND_SCRIPT.contains("redis.call(\"get\""));
        assert!(EXTEND_SCRIPT.contains("redis.call(\"pexpire\""));
    }

    #[test]
    fn test_duration_millis() {
        assert_eq!(duration_millis(Duration::from_secs(10)), 10_000);
        assert_eq!(duration_millis(Duration::from_millis(1)), 1);
    }

    #[test]
    fn test_duration_millis_clamps_instead_of_wrapping() {
        assert_eq!(duration_millis(Duration::MAX), i64::MAX);
        assert_eq!(
            duration_millis(Duration::from_millis(u64::MAX)),
            i64::MAX
        );
    }
}
