//! Compiled per-pipe configuration.
//!
//! A [`Template`] is built once when a pipe is instantiated. It splits off the
//! extracted rule list, remembers the registration defaults and shape, and
//! decides whether the configuration is static or dynamic:
//!
//! | Configuration                          | Resolution                  |
//! |----------------------------------------|-----------------------------|
//! | no `subkey`/`terminal` anywhere        | once, then shared           |
//! | any `subkey` or `terminal` reference   | against every item          |

use once_cell::sync::OnceCell;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::node::contains_reference;
use super::{resolve_config, resolve_rules, Conf, Shape};
use crate::error::PipeResult;
use crate::record::Record;
use crate::wire::Wires;

/// A configuration resolved against one item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolved {
    pub conf: Conf,
    /// Resolved elements of the extracted list (empty when nothing is extracted)
    pub rules: Vec<Conf>,
}

#[derive(Debug)]
pub struct Template {
    conf: Value,
    rules: Option<Value>,
    listize: bool,
    defaults: Map<String, Value>,
    shape: Shape,
    dynamic: bool,
    cached: OnceCell<Arc<Resolved>>,
}

impl Template {
    /// Compile a raw configuration.
    ///
    /// With `extract`, the named key is taken out of `raw` and resolved as a
    /// rule list; the rest of `raw` is still resolved as the pipe's conf.
    pub fn new(
        raw: Value,
        extract: Option<&str>,
        listize: bool,
        defaults: Map<String, Value>,
        shape: Shape,
    ) -> Self {
        let dynamic = contains_reference(&raw);
        let (conf, rules) = match (raw, extract) {
            (Value::Object(mut map), Some(key)) => {
                let rules = map.remove(key);
                (Value::Object(map), rules)
            }
            (raw, _) => (raw, None),
        };

        Self {
            conf,
            rules,
            listize,
            defaults,
            shape,
            dynamic,
            cached: OnceCell::new(),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Resolve against `item`, reusing the cached result for static configurations.
    pub fn resolve(&self, item: &Record, wires: &Wires) -> PipeResult<Arc<Resolved>> {
        if self.dynamic {
            return self.resolve_now(item, wires).map(Arc::new);
        }
        self.cached
            .get_or_try_init(|| self.resolve_now(item, wires).map(Arc::new))
            .cloned()
    }

    fn resolve_now(&self, item: &Record, wires: &Wires) -> PipeResult<Resolved> {
        let conf = resolve_config(item, &self.conf, &self.defaults, self.shape, wires)?;
        let rules = match &self.rules {
            Some(Value::Array(_)) | None => resolve_rules(item, self.rules.as_ref(), self.shape, wires)?,
            Some(single) if self.listize => resolve_rules(item, Some(single), self.shape, wires)?,
            Some(single) => vec![resolve_config(item, single, &Map::new(), self.shape, wires)?],
        };
        Ok(Resolved { conf, rules })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn test_static_template_resolves_once() {
        let template = Template::new(
            json!({"rule": {"find": "a", "replace": "b"}, "flag": true}),
            Some("rule"),
            true,
            Map::new(),
            Shape::default(),
        );
        assert!(!template.is_dynamic());

        let first = template.resolve(&record(json!({"n": 1})), &Wires::new()).unwrap();
        let second = template.resolve(&record(json!({"n": 2})), &Wires::new()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.rules.len(), 1);
        assert_eq!(first.conf.get("flag"), Some(&json!(true)));
        assert_eq!(first.conf.get("rule"), None);
    }

    #[test]
    fn test_dynamic_template_resolves_per_item() {
        let template = Template::new(
            json!({"rule": [{"find": {"subkey": "w"}}]}),
            Some("rule"),
            true,
            Map::new(),
            Shape::default(),
        );
        assert!(template.is_dynamic());

        let a = template.resolve(&record(json!({"w": "x"})), &Wires::new()).unwrap();
        let b = template.resolve(&record(json!({"w": "y"})), &Wires::new()).unwrap();
        assert_eq!(a.rules[0].text("find").as_deref(), Some("x"));
        assert_eq!(b.rules[0].text("find").as_deref(), Some("y"));
    }

    #[test]
    fn test_defaults_apply_to_conf() {
        let mut defaults = Map::new();
        defaults.insert("delimiter".into(), json!(","));
        let template = Template::new(Value::Null, None, false, defaults, Shape::default());
        let resolved = template.resolve(&Record::new(), &Wires::new()).unwrap();
        assert_eq!(resolved.conf.text("delimiter").as_deref(), Some(","));
        assert!(resolved.rules.is_empty());
    }
}
