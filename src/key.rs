/// ロックキーのデフォルト名前空間。
pub const DEFAULT_KEY_PREFIX: &str = "lock";

/// Maps caller-supplied lock names onto namespaced store keys.
///
/// Both lock variants go through the same namer, so a name always resolves to
/// the same key on acquire and on release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamer {
    prefix: String,
}

impl KeyNamer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn key(&self, name: &str) -> String {
        format_lock_key(&self.prefix, name)
    }
}

impl Default for KeyNamer {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

/// Helper function to format lock keys.
pub fn format_lock_key(prefix: &str, name: &str) -> String {
    format!("{}:{}", prefix, name)
}
