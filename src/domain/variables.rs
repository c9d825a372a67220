//! Variable bindings supplied to a chain run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A mapping from variable name to an arbitrary JSON value.
///
/// The original system accepted both symbolic and textual keys for the same
/// variable; here the key space is a single string form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Variables(HashMap<String, Value>);

impl Variables {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Builder-style insert, handy when constructing bindings inline.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// String form of a variable, if present and textual.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// A copy of these bindings with `input` bound to the current chain
    /// value, used when rendering prompt-step templates.
    pub fn with_input(&self, input: &Value) -> Self {
        let mut merged = self.clone();
        merged.insert("input", input.clone());
        merged
    }
}

impl From<HashMap<String, Value>> for Variables {
    fn from(map: HashMap<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Variables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_and_get() {
        let vars = Variables::new().with("name", "Alice").with("count", 3);
        assert_eq!(vars.get_str("name"), Some("Alice"));
        assert_eq!(vars.get("count"), Some(&json!(3)));
        assert!(vars.get("missing").is_none());
    }

    #[test]
    fn test_with_input_overlays_current_value() {
        let vars = Variables::new().with("name", "Alice");
        let merged = vars.with_input(&json!("hello"));

        assert_eq!(merged.get_str("input"), Some("hello"));
        assert_eq!(merged.get_str("name"), Some("Alice"));
        // Original is untouched.
        assert!(!vars.contains("input"));
    }

    #[test]
    fn test_from_iterator() {
        let vars: Variables = [("a", json!(1)), ("b", json!(2))].into_iter().collect();
        assert_eq!(vars.len(), 2);
    }
}
