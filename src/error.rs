use std::time::Duration;

use thiserror::Error;

pub type LockResult<T> = Result<T, LockError>;

/// ストア（Redis 等）との通信で発生するエラー。ロック層では回復せずそのまま伝播する。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ストアに接続できません: {0}")]
    Unavailable(String),
    #[error("ストアコマンドが失敗しました: {0}")]
    Command(String),
    #[error("ストアがサポートしていないコマンドです: {0}")]
    Unsupported(&'static str),
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("ロックを取得できませんでした: {name} ({waited:?} 待機)")]
    AcquireTimeout { name: String, waited: Duration },
    #[error("ロックを保持していません: {0}")]
    LockNotOwned(String),
    #[error("ロックオプションが不正です: {0}")]
    InvalidOptions(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LockError {
    /// 期限切れ・他者による再取得など、運用上想定されるエラーかどうか。
    pub fn is_not_owned(&self) -> bool {
        matches!(self, LockError::LockNotOwned(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),
    #[error("validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_converts_into_lock_error() {
        let err: LockError = StoreError::Unavailable("connection refused".into()).into();
        assert!(matches!(err, LockError::Store(StoreError::Unavailable(_))));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_is_not_owned() {
        assert!(LockError::LockNotOwned("a-lock".into()).is_not_owned());
        assert!(!LockError::InvalidOptions("x".into()).is_not_owned());
    }
}
