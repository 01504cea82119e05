//! Cache key management utilities.

/// Separator between the cache name and the caller's key.
pub const KEY_SEPARATOR: char = ':';

/// Namespace for all keys written by one cache instance.
///
/// Every backend key is `name:key`, so two caches sharing one server never
/// collide as long as their names differ.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeySpace {
    name: String,
}

impl KeySpace {
    pub fn new(name: impl Into<String>) -> Self {
        KeySpace { name: name.into() }
    }

    /// Cache name used as the prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build the composite key for a caller-supplied key.
    pub fn compose(&self, key: &str) -> String {
        format!("{}{}{}", self.name, KEY_SEPARATOR, key)
    }

    /// Build composite keys for a batch.
    pub fn compose_all<S: AsRef<str>>(&self, keys: &[S]) -> Vec<String> {
        keys.iter().map(|k| self.compose(k.as_ref())).collect()
    }

    /// Build the key of one lock replica.
    ///
    /// Replicas live under `name:lock:{replica}:key`; a lock is held when a
    /// majority of them carry the holder's token.
    pub fn lock_key(&self, key: &str, replica: usize) -> String {
        format!("{}:lock:{}:{}", self.name, replica, key)
    }

    /// Strip this namespace from a composite key.
    pub fn strip<'a>(&self, composite: &'a str) -> Option<&'a str> {
        composite
            .strip_prefix(self.name.as_str())
            .and_then(|rest| rest.strip_prefix(KEY_SEPARATOR))
    }
}
