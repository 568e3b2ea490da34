//! Declarative configuration resolution.
//!
//! A pipe's configuration is resolved against the current item before the
//! pipe body runs. Each configuration value is first classified into a
//! [`Node`] (literal, subkey reference, terminal reference, record or raw
//! mapping), then resolved:
//!
//! ```text
//! {"find": "hello"}                 → literal          → "hello"
//! {"find": {"subkey": "word"}}      → read item.word   → item["word"]
//! {"rate": {"terminal": "rates"}}   → pull next item   → next(rates)["content"]
//! {"x": {"value": 3}}               → unwrap           → 3
//! ```
//!
//! - `node`: configuration node classification
//! - `conf`: resolved, objectified configuration ([`Conf`])
//! - `template`: compiled per-pipe configuration, static or dynamic

pub mod conf;
pub mod node;
pub mod template;

pub use conf::Conf;
pub use node::Node;
pub use template::{Resolved, Template};

use serde_json::{Map, Value};

use crate::cast::Kind;
use crate::error::{PipeError, PipeResult};
use crate::record::{pull_terminal, Record, SENTINELS};
use crate::wire::Wires;

/// How a configuration is shaped once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    /// Cast applied to configuration values
    pub ptype: Kind,
    /// Cast lazily on typed access instead of eagerly at resolution
    pub objectify: bool,
    /// Treat nested mappings as records (wiring-aware)
    pub pdictize: bool,
}

impl Default for Shape {
    fn default() -> Self {
        Self {
            ptype: Kind::Pass,
            objectify: true,
            pdictize: true,
        }
    }
}

/// Resolve a single configuration node against `item`.
///
/// 1. subkey references read the item (forwarding `wires`),
/// 2. with `force`, the node is taken literally,
/// 3. records resolve their own `value`/`terminal` sentinels,
/// 4. anything else is the literal or `default`.
///
/// An un-dictized mapping without `force` is a [`PipeError::Structural`]
/// error: the caller handed over a configuration it never meant to be read.
pub fn resolve_value(
    item: &Record,
    node: &Node,
    force: bool,
    default: Option<Value>,
    wires: &Wires,
) -> PipeResult<Option<Value>> {
    let resolved = match node {
        Node::Subkey(path) => item.get_wired(Some(path), wires)?,
        _ if force => Some(node.to_value()),
        Node::Terminal { name, path } => pull_terminal(name, path.as_deref(), Some(wires))?,
        Node::Record(map) => Record::from(map.clone()).get_wired(None, wires)?,
        Node::Raw(_) => {
            return Err(PipeError::Structural(
                "configuration mapping must be dictized to be resolved".to_string(),
            ))
        }
        Node::Literal(Value::Null) => None,
        Node::Literal(value) => Some(value.clone()),
    };
    Ok(resolved.or(default))
}

/// Resolve a whole configuration against `item`.
///
/// A non-mapping configuration, or a mapping whose only key is a wiring
/// sentinel, is one node and resolves to [`Conf::value`]. Otherwise every key
/// resolves independently and the result is merged over `defaults`.
pub fn resolve_config(
    item: &Record,
    raw: &Value,
    defaults: &Map<String, Value>,
    shape: Shape,
    wires: &Wires,
) -> PipeResult<Conf> {
    let empty = Map::new();
    let map = match raw {
        Value::Null => &empty,
        Value::Object(map) if !is_single_node(map) => map,
        _ => {
            let node = Node::classify(raw, shape.pdictize);
            let value = resolve_value(item, &node, false, None, wires)?;
            return Ok(Conf::single(value, shape));
        }
    };

    let mut resolved = defaults.clone();
    for (key, value) in map {
        let node = Node::classify(value, shape.pdictize);
        if let Some(value) = resolve_value(item, &node, false, None, wires)? {
            resolved.insert(key.clone(), value);
        }
    }
    Ok(Conf::fields(resolved, shape))
}

/// Resolve a list-shaped configuration key (`rule`, `part`, `attrs`, ...).
///
/// A lone mapping is treated as a one-element list; each element resolves
/// independently.
pub fn resolve_rules(item: &Record, pieces: Option<&Value>, shape: Shape, wires: &Wires) -> PipeResult<Vec<Conf>> {
    let pieces: Vec<&Value> = match pieces {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(list)) => list.iter().collect(),
        Some(other) => vec![other],
    };

    let no_defaults = Map::new();
    pieces
        .into_iter()
        .map(|piece| resolve_config(item, piece, &no_defaults, shape, wires))
        .collect()
}

fn is_single_node(map: &Map<String, Value>) -> bool {
    map.len() == 1 && map.keys().any(|k| SENTINELS.contains(&k.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cast::Typed;
    use crate::wire::Terminal;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn test_static_config_resolves_identically() {
        let raw = json!({"find": "hello", "replace": {"value": "bye"}});
        let a = resolve_config(&record(json!({"x": 1})), &raw, &Map::new(), Shape::default(), &Wires::new()).unwrap();
        let b = resolve_config(&record(json!({"x": 2})), &raw, &Map::new(), Shape::default(), &Wires::new()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.get("replace"), Some(&json!("bye")));
    }

    #[test]
    fn test_subkey_config_re_resolves_per_item() {
        let raw = json!({"find": {"subkey": "word"}});
        let a = resolve_config(&record(json!({"word": "one"})), &raw, &Map::new(), Shape::default(), &Wires::new()).unwrap();
        let b = resolve_config(&record(json!({"word": "two"})), &raw, &Map::new(), Shape::default(), &Wires::new()).unwrap();
        assert_eq!(a.text("find").as_deref(), Some("one"));
        assert_eq!(b.text("find").as_deref(), Some("two"));
    }

    #[test]
    fn test_whole_conf_single_node_shortcut() {
        let item = record(json!({"currency": "EUR"}));
        let conf = resolve_config(&item, &json!({"subkey": "currency"}), &Map::new(), Shape::default(), &Wires::new()).unwrap();
        assert_eq!(conf.value(), Some(&json!("EUR")));

        let literal = resolve_config(&item, &json!("USD"), &Map::new(), Shape::default(), &Wires::new()).unwrap();
        assert_eq!(literal.value(), Some(&json!("USD")));
    }

    #[test]
    fn test_defaults_lose_to_resolved_values() {
        let mut defaults = Map::new();
        defaults.insert("param".into(), json!("every"));
        defaults.insert("find".into(), json!("fallback"));

        let item = record(json!({}));
        let raw = json!({"find": {"subkey": "missing"}, "param": "first"});
        let conf = resolve_config(&item, &raw, &defaults, Shape::default(), &Wires::new()).unwrap();
        assert_eq!(conf.get("param"), Some(&json!("first")));
        // a subkey that resolves to nothing keeps the default
        assert_eq!(conf.get("find"), Some(&json!("fallback")));
    }

    #[test]
    fn test_raw_mapping_is_structural_misuse() {
        let shape = Shape { pdictize: false, ..Shape::default() };
        let raw = json!({"nested": {"a": 1}});
        let err = resolve_config(&record(json!({})), &raw, &Map::new(), shape, &Wires::new());
        assert!(matches!(err, Err(PipeError::Structural(_))));

        // subkey references still resolve, and force takes the mapping literally
        let node = Node::classify(&json!({"a": 1}), false);
        let forced = resolve_value(&record(json!({})), &node, true, None, &Wires::new()).unwrap();
        assert_eq!(forced, Some(json!({"a": 1})));
    }

    #[test]
    fn test_terminal_config_pulls_once_per_resolution() {
        let wires = Wires::new().with(Terminal::from_records(
            "rates",
            vec![record(json!({"content": 1.1})), record(json!({"content": 1.2}))],
        ));
        let raw = json!({"rate": {"terminal": "rates"}});
        let item = record(json!({}));
        let first = resolve_config(&item, &raw, &Map::new(), Shape::default(), &wires).unwrap();
        let second = resolve_config(&item, &raw, &Map::new(), Shape::default(), &wires).unwrap();
        assert_eq!(first.get("rate"), Some(&json!(1.1)));
        assert_eq!(second.get("rate"), Some(&json!(1.2)));
        assert!(resolve_config(&item, &raw, &Map::new(), Shape::default(), &wires).is_err());
    }

    #[test]
    fn test_rules_listize_a_lone_mapping() {
        let item = record(json!({"w": "hi"}));
        let rules = resolve_rules(&item, Some(&json!({"find": {"subkey": "w"}})), Shape::default(), &Wires::new()).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].text("find").as_deref(), Some("hi"));

        let parts = resolve_rules(&item, Some(&json!([{"subkey": "w"}, " there"])), Shape::default(), &Wires::new()).unwrap();
        let joined: Vec<String> = parts.iter().map(|p| p.value().map(crate::cast::value_text).unwrap_or_default()).collect();
        assert_eq!(joined, vec!["hi", " there"]);
    }

    #[test]
    fn test_eager_cast_when_not_objectified() {
        let shape = Shape { ptype: Kind::Int, objectify: false, pdictize: true };
        let conf = resolve_config(&record(json!({})), &json!({"count": "7", "bad": "x"}), &Map::new(), shape, &Wires::new()).unwrap();
        assert_eq!(conf.get("count"), Some(&json!(7)));
        assert_eq!(conf.get("bad"), Some(&json!(0)));

        let lazy = resolve_config(&record(json!({})), &json!({"count": "7"}), &Map::new(), Shape { objectify: true, ..shape }, &Wires::new()).unwrap();
        assert_eq!(lazy.get("count"), Some(&json!("7")));
        assert_eq!(lazy.typed("count"), Typed::Int(7));
    }
}
