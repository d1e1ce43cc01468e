use std::time::Duration;

use serde::Deserialize;

use crate::key::DEFAULT_KEY_PREFIX;
use crate::lease::LockOptions;
use crate::legacy::{DEFAULT_LEGACY_LEASE, DEFAULT_LEGACY_RETRY_INTERVAL, DEFAULT_LEGACY_WAIT};
use crate::token::TokenScope;
use crate::ConfigError;

/// ロック設定。省略したフィールドはデフォルト値になる。
///
/// ```yaml
/// key_prefix: lock
/// lease:
///   lease_ms: 10000
///   blocking: true
///   blocking_wait_ms: 5000
///   poll_interval_ms: 100
///   token_scope: local
/// legacy:
///   lease_ms: 10000
///   wait_ms: 10000
///   retry_interval_ms: 10
/// redis:
///   url: redis://127.0.0.1:6379
///   native_scripts: true
/// ```
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LockConfig {
    pub key_prefix: String,
    pub lease: LeaseConfig,
    pub legacy: LegacyConfig,
    pub redis: Option<RedisConfig>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            lease: LeaseConfig::default(),
            legacy: LegacyConfig::default(),
            redis: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LeaseConfig {
    pub lease_ms: u64,
    pub blocking: bool,
    pub blocking_wait_ms: u64,
    pub poll_interval_ms: u64,
    pub token_scope: TokenScope,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        let options = LockOptions::default();
        Self {
            lease_ms: options.lease.as_millis() as u64,
            blocking: options.blocking,
            blocking_wait_ms: options.blocking_wait.as_millis() as u64,
            poll_interval_ms: options.poll_interval.as_millis() as u64,
            token_scope: options.token_scope,
        }
    }
}

impl LeaseConfig {
    pub fn to_options(&self) -> LockOptions {
        LockOptions {
            lease: Duration::from_millis(self.lease_ms),
            blocking: self.blocking,
            blocking_wait: Duration::from_millis(self.blocking_wait_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            token_scope: self.token_scope,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LegacyConfig {
    pub lease_ms: u64,
    pub wait_ms: u64,
    pub retry_interval_ms: u64,
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            lease_ms: DEFAULT_LEGACY_LEASE.as_millis() as u64,
            wait_ms: DEFAULT_LEGACY_WAIT.as_millis() as u64,
            retry_interval_ms: DEFAULT_LEGACY_RETRY_INTERVAL.as_millis() as u64,
        }
    }
}

impl LegacyConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    /// false にすると Lua スクリプトを使わず WATCH/MULTI/EXEC で比較削除する。
    #[serde(default = "default_native_scripts")]
    pub native_scripts: bool,
}

fn default_native_scripts() -> bool {
    true
}

/// YAML ファイルを読み込み LockConfig を返す。
pub fn load(path: &str) -> Result<LockConfig, ConfigError> {
    let data = std::fs::read_to_string(path)?;
    let config: LockConfig = serde_yaml::from_str(&data)?;
    Ok(config)
}

/// 設定値のバリデーション。
pub fn validate(config: &LockConfig) -> Result<(), ConfigError> {
    if config.key_prefix.is_empty() {
        return Err(ConfigError::Validation("key_prefix is required".into()));
    }
    config
        .lease
        .to_options()
        .validate()
        .map_err(|e| ConfigError::Validation(format!("lease: {}", e)))?;
    if config.legacy.lease_ms == 0 {
        return Err(ConfigError::Validation(
            "legacy.lease_ms must be > 0".into(),
        ));
    }
    if config.legacy.retry_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "legacy.retry_interval_ms must be > 0".into(),
        ));
    }
    if let Some(redis) = &config.redis {
        if redis.url.is_empty() {
            return Err(ConfigError::Validation("redis.url is required".into()));
        }
    }
    Ok(())
}
