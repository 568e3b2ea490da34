//! Configuration node classification.
//!
//! Each configuration value is classified once, when the pipe's template is
//! built, instead of being re-inspected on every read.

use serde_json::{Map, Value};

use crate::cast::value_text;
use crate::record::{SUBKEY, TERMINAL};

/// One configuration value, by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Scalar or list, used as is
    Literal(Value),
    /// Read this dotted path off the current item
    Subkey(String),
    /// Pull the next item of a named wire and read `path` from it
    Terminal { name: String, path: Option<String> },
    /// Dictized mapping; may hold a `value` sentinel
    Record(Map<String, Value>),
    /// Un-dictized mapping
    Raw(Map<String, Value>),
}

impl Node {
    /// Classify a configuration value.
    ///
    /// `dictized` controls whether mappings take part in wiring. Subkey
    /// references are honoured either way.
    pub fn classify(value: &Value, dictized: bool) -> Node {
        let Value::Object(map) = value else {
            return Node::Literal(value.clone());
        };

        if let Some(path) = map.get(SUBKEY) {
            return Node::Subkey(value_text(path));
        }

        if !dictized {
            return Node::Raw(map.clone());
        }

        match map.get(TERMINAL) {
            Some(name) => Node::Terminal {
                name: value_text(name),
                path: map.get("path").and_then(Value::as_str).map(str::to_string),
            },
            None => Node::Record(map.clone()),
        }
    }

    /// The node as written in the configuration.
    pub fn to_value(&self) -> Value {
        match self {
            Node::Literal(value) => value.clone(),
            Node::Subkey(path) => {
                let mut map = Map::new();
                map.insert(SUBKEY.to_string(), Value::String(path.clone()));
                Value::Object(map)
            }
            Node::Terminal { name, path } => {
                let mut map = Map::new();
                map.insert(TERMINAL.to_string(), Value::String(name.clone()));
                if let Some(path) = path {
                    map.insert("path".to_string(), Value::String(path.clone()));
                }
                Value::Object(map)
            }
            Node::Record(map) | Node::Raw(map) => Value::Object(map.clone()),
        }
    }

    /// True for nodes whose value depends on the item or a wire.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Node::Subkey(_) | Node::Terminal { .. })
    }
}

/// Whether a raw configuration contains a `subkey` or `terminal` reference anywhere.
pub fn contains_reference(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.contains_key(SUBKEY) || map.contains_key(TERMINAL) || map.values().any(contains_reference)
        }
        Value::Array(items) => items.iter().any(contains_reference),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_shapes() {
        assert_eq!(Node::classify(&json!("x"), true), Node::Literal(json!("x")));
        assert_eq!(Node::classify(&json!([1, 2]), true), Node::Literal(json!([1, 2])));
        assert_eq!(Node::classify(&json!({"subkey": "a.b"}), false), Node::Subkey("a.b".into()));
        assert_eq!(
            Node::classify(&json!({"terminal": "rates", "path": "eur"}), true),
            Node::Terminal { name: "rates".into(), path: Some("eur".into()) }
        );
        assert!(matches!(Node::classify(&json!({"value": 1}), true), Node::Record(_)));
        assert!(matches!(Node::classify(&json!({"terminal": "rates"}), false), Node::Raw(_)));
    }

    #[test]
    fn test_to_value_round_trips_references() {
        for raw in [json!({"subkey": "title"}), json!({"terminal": "t", "path": "p"}), json!({"a": 1}), json!(3)] {
            assert_eq!(Node::classify(&raw, true).to_value(), raw);
        }
    }

    #[test]
    fn test_contains_reference_is_deep() {
        assert!(!contains_reference(&json!({"rule": [{"find": "a", "replace": "b"}]})));
        assert!(contains_reference(&json!({"rule": [{"find": {"subkey": "w"}}]})));
        assert!(contains_reference(&json!({"rate": {"terminal": "rates"}})));
        assert!(Node::classify(&json!({"subkey": "w"}), true).is_dynamic());
    }
}
