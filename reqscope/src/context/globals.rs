//! Per-application-context globals.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Ad-hoc storage scoped to one application context.
///
/// Values live exactly as long as the context that owns them.
#[derive(Debug, Default)]
pub struct Globals {
    data: RwLock<HashMap<String, serde_json::Value>>,
}

impl Globals {
    /// Creates an empty globals mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.data.read().get(key).cloned()
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// Sets a value, returning the one it replaced.
    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) -> Option<serde_json::Value> {
        self.data.write().insert(key.into(), value)
    }

    /// Returns the value for `key`, inserting `default` first if absent.
    pub fn set_default(&self, key: impl Into<String>, default: serde_json::Value) -> serde_json::Value {
        self.data
            .write()
            .entry(key.into())
            .or_insert(default)
            .clone()
    }

    /// Removes and returns a value.
    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.data.write().remove(key)
    }

    /// Returns a copy of all values.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        self.data.read().clone()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Returns all keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get() {
        let g = Globals::new();
        assert!(g.is_empty());
        assert_eq!(g.set("user", json!("alice")), None);
        assert_eq!(g.set("user", json!("bob")), Some(json!("alice")));
        assert_eq!(g.get("user"), Some(json!("bob")));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_set_default_keeps_existing() {
        let g = Globals::new();
        assert_eq!(g.set_default("count", json!(1)), json!(1));
        assert_eq!(g.set_default("count", json!(2)), json!(1));
    }

    #[test]
    fn test_remove() {
        let g = Globals::new();
        g.set("db", json!({"open": true}));
        assert!(g.contains_key("db"));
        assert_eq!(g.remove("db"), Some(json!({"open": true})));
        assert!(!g.contains_key("db"));
        assert!(g.keys().is_empty());
    }
}
