use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;
use uuid::Uuid;

/// 取得ごとに新しいロックトークンを生成する。
pub fn new_token() -> String {
    Uuid::new_v4().to_string()
}

/// Controls who can see the token cached by a lease lock handle.
///
/// Handles are cloned to hand them to other tasks. With `Local` every clone
/// starts with its own empty slot, so only the clone that acquired can
/// release. With `Shared` all clones read and write one slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    #[default]
    Local,
    Shared,
}

/// Token cache of a single handle (or of a group of clones for `Shared`).
#[derive(Debug)]
pub(crate) struct TokenSlot {
    scope: TokenScope,
    cell: Arc<Mutex<Option<String>>>,
}

impl TokenSlot {
    pub(crate) fn new(scope: TokenScope) -> Self {
        Self {
            scope,
            cell: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn get(&self) -> Option<String> {
        self.cell
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set(&self, token: String) {
        *self.cell.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    /// 指定トークンがまだキャッシュされている場合のみクリアする。
    pub(crate) fn clear_if(&self, token: &str) {
        let mut cell = self.cell.lock().unwrap_or_else(PoisonError::into_inner);
        if cell.as_deref() == Some(token) {
            *cell = None;
        }
    }
}

impl Clone for TokenSlot {
    fn clone(&self) -> Self {
        match self.scope {
            TokenScope::Shared => Self {
                scope: self.scope,
                cell: Arc::clone(&self.cell),
            },
            TokenScope::Local => Self::new(self.scope),
        }
    }
}
