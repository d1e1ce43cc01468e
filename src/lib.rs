//! k1s0-kv-lock: 共有キーバリューストア上の単一所有者分散ロック。
//!
//! 2 種類のロックを提供する。
//!
//! - レガシー（識別子ベース）: [`LockClient::acquire_lock`] / [`LockClient::release_lock`]。
//!   取得失敗は `None`、解放失敗は `false` で返す。
//! - リースベース: [`LockClient::lock`] で作る [`LeaseLock`] ハンドル。
//!   所有していないロックの解放・延長は [`LockError::LockNotOwned`] になる。
//!
//! ストアは [`LockStore`] トレイトで抽象化され、[`InMemoryLockStore`] と
//! `redis` feature の `RedisLockStore` が実装を持つ。

pub mod client;
pub mod config;
pub mod error;
pub mod key;
pub mod lease;
pub mod legacy;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod store;
pub mod token;

pub use client::LockClient;
pub use config::LockConfig;
pub use error::{ConfigError, LockError, LockResult, StoreError};
pub use key::{format_lock_key, KeyNamer, DEFAULT_KEY_PREFIX};
pub use lease::{LeaseLock, LockOptions, MIN_DURATION};
pub use legacy::LegacyLock;
pub use memory::InMemoryLockStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisLockStore;
pub use store::{KeyTtl, LockStore, StoreResult, WatchOutcome};
pub use token::{new_token, TokenScope};

#[cfg(feature = "mock")]
pub use store::MockLockStore;
