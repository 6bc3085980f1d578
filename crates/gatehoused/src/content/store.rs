//! In-memory key/value tree used as the bundled database.

use std::collections::BTreeMap;

use serde_json::Value;

/// Values keyed by slash-separated paths.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MemoryStore {
    values: BTreeMap<String, Value>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the value at `path`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.values.get(&normalise_path(path))
    }

    /// Writes `value` at `path`, returning the previous value.
    pub fn set(&mut self, path: &str, value: Value) -> Option<Value> {
        self.values.insert(normalise_path(path), value)
    }

    /// Number of stored paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Canonical form: leading slash, no trailing or repeated slashes.
fn normalise_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("Run/State", "/Run/State")]
    #[case("//Run//State/", "/Run/State")]
    #[case("", "/")]
    fn normalises_paths(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalise_path(raw), expected);
    }

    #[rstest]
    fn set_then_get_across_spellings() {
        let mut store = MemoryStore::new();
        assert_eq!(store.set("/Run/State", json!(3)), None);
        assert_eq!(store.get("Run/State/"), Some(&json!(3)));
        assert_eq!(store.set("Run/State", json!(1)), Some(json!(3)));
        assert_eq!(store.len(), 1);
    }
}
