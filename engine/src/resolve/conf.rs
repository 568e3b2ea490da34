//! Resolved configuration.
//!
//! A [`Conf`] is what a pipe body sees: either a mapping of resolved keys or,
//! when the whole configuration was one wired value, that single value.
//! With `objectify`, the declared `ptype` is applied when a value is read
//! through a typed accessor; otherwise it was applied at resolution.
//!
//! Pipes that want named fields deserialize the mapping into their own
//! struct with [`Conf::parse`].

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

use super::Shape;
use crate::cast::{truthy, value_text, Kind, Typed};

#[derive(Debug, Clone, PartialEq)]
enum Body {
    Single(Option<Value>),
    Fields(Map<String, Value>),
}

/// Objectified configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Conf {
    body: Body,
    ptype: Kind,
}

impl Default for Conf {
    fn default() -> Self {
        Self::fields(Map::new(), Shape::default())
    }
}

impl Conf {
    /// A configuration that resolved as one node.
    pub fn single(value: Option<Value>, shape: Shape) -> Self {
        let value = match value {
            Some(v) if !shape.objectify => Some(eager(shape.ptype, v)),
            other => other,
        };
        Self {
            body: Body::Single(value),
            ptype: shape.ptype,
        }
    }

    /// A configuration of independently resolved keys.
    pub fn fields(mut map: Map<String, Value>, shape: Shape) -> Self {
        if !shape.objectify {
            for value in map.values_mut() {
                *value = eager(shape.ptype, value.take());
            }
        }
        Self {
            body: Body::Fields(map),
            ptype: shape.ptype,
        }
    }

    pub fn ptype(&self) -> Kind {
        self.ptype
    }

    /// Raw resolved value of `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match &self.body {
            Body::Fields(map) => map.get(key).filter(|v| !v.is_null()),
            Body::Single(_) => None,
        }
    }

    /// The value of a single-node configuration.
    pub fn value(&self) -> Option<&Value> {
        match &self.body {
            Body::Single(value) => value.as_ref(),
            Body::Fields(_) => None,
        }
    }

    /// `key` cast to the declared `ptype`.
    pub fn typed(&self, key: &str) -> Typed {
        self.typed_as(key, self.ptype)
    }

    /// `key` cast to an explicit kind.
    pub fn typed_as(&self, key: &str, kind: Kind) -> Typed {
        kind.cast(self.get(key).unwrap_or(&Value::Null))
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).map(value_text)
    }

    pub fn text_or(&self, key: &str, default: &str) -> String {
        self.text(key).unwrap_or_else(|| default.to_string())
    }

    pub fn int_or(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .and_then(|v| Kind::Int.try_cast(v))
            .map(|t| t.as_int())
            .unwrap_or(default)
    }

    /// `key` as a decimal; `NaN` when absent or not numeric.
    pub fn decimal(&self, key: &str) -> f64 {
        self.typed_as(key, Kind::Decimal).as_decimal()
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(value @ Value::String(_)) => match Kind::Bool.try_cast(value) {
                Some(Typed::Bool(b)) => b,
                _ => default,
            },
            Some(value) => truthy(value),
            None => default,
        }
    }

    /// Deserialize into a pipe's typed configuration struct.
    ///
    /// A configuration that does not fit `T` is logged and replaced by
    /// `T::default()`.
    pub fn parse<T>(&self) -> T
    where
        T: DeserializeOwned + Default,
    {
        match serde_json::from_value(self.to_value()) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, "configuration does not fit, using defaults");
                T::default()
            }
        }
    }

    /// The resolved mapping; empty for a single-node configuration.
    pub fn as_map(&self) -> Map<String, Value> {
        match &self.body {
            Body::Fields(map) => map.clone(),
            Body::Single(_) => Map::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        match &self.body {
            Body::Fields(map) => Value::Object(map.clone()),
            Body::Single(value) => value.clone().unwrap_or(Value::Null),
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.body {
            Body::Fields(map) => map.is_empty(),
            Body::Single(value) => value.is_none(),
        }
    }
}

impl From<Map<String, Value>> for Conf {
    fn from(map: Map<String, Value>) -> Self {
        Self::fields(map, Shape::default())
    }
}

fn eager(ptype: Kind, value: Value) -> Value {
    match ptype {
        Kind::Pass => value,
        kind => kind.cast(&value).to_value(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn conf(value: Value) -> Conf {
        match value {
            Value::Object(map) => Conf::from(map),
            other => Conf::single(Some(other), Shape::default()),
        }
    }

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Rule {
        find: String,
        #[serde(default)]
        replace: String,
    }

    #[test]
    fn test_typed_accessors() {
        let c = conf(json!({"n": "12", "zero": 0, "bad": "x", "on": "yes", "rate": "1.5"}));
        assert_eq!(c.int_or("n", 1), 12);
        assert_eq!(c.int_or("zero", 1), 0);
        assert_eq!(c.int_or("bad", 1), 1);
        assert_eq!(c.int_or("missing", 1), 1);
        assert!(c.bool_or("on", false));
        assert_eq!(c.decimal("rate"), 1.5);
        assert!(c.decimal("missing").is_nan());
        assert_eq!(c.text_or("missing", "d"), "d");
    }

    #[test]
    fn test_parse_into_struct_falls_back() {
        let good = conf(json!({"find": "a", "replace": "b"}));
        assert_eq!(good.parse::<Rule>(), Rule { find: "a".into(), replace: "b".into() });

        let bad = conf(json!({"find": 3}));
        assert_eq!(bad.parse::<Rule>(), Rule::default());
    }

    #[test]
    fn test_single_conf_has_no_fields() {
        let c = conf(json!("EUR"));
        assert_eq!(c.value(), Some(&json!("EUR")));
        assert_eq!(c.get("EUR"), None);
        assert!(c.as_map().is_empty());
        assert_eq!(c.to_value(), json!("EUR"));
    }

    #[test]
    fn test_lazy_ptype_on_typed_access() {
        let shape = Shape { ptype: Kind::Decimal, ..Shape::default() };
        let c = Conf::fields(json!({"x": "2.5"}).as_object().cloned().unwrap(), shape);
        assert_eq!(c.get("x"), Some(&json!("2.5")));
        assert_eq!(c.typed("x"), Typed::Decimal(2.5));
    }
}
