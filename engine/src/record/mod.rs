//! Dotted-path records.
//!
//! A [`Record`] is the item flowing through every pipe: an ordered JSON
//! mapping whose keys may be addressed with dotted paths (`author.name`).
//!
//! Three keys are reserved wiring sentinels:
//!
//! | Key        | Meaning when found on a resolved mapping              |
//! |------------|-------------------------------------------------------|
//! | `subkey`   | configuration reads this field off the current item   |
//! | `value`    | the mapping stands for this literal; reads unwrap it  |
//! | `terminal` | pull the next item from the named wire                |
//!
//! Records are copy-on-write from the caller's point of view: [`Record::set`]
//! returns a new record and leaves the receiver untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ops::Index;
use tracing::debug;

use crate::cast::value_text;
use crate::error::PipeResult;
use crate::wire::Wires;

pub const SUBKEY: &str = "subkey";
pub const VALUE: &str = "value";
pub const TERMINAL: &str = "terminal";

/// All reserved wiring sentinels.
pub const SENTINELS: [&str; 3] = [SUBKEY, VALUE, TERMINAL];

/// Field read off a terminal's item when the reference names no `path`.
pub const DEFAULT_TERMINAL_PATH: &str = "content";

static NULL: Value = Value::Null;

/// An item: ordered mapping with dotted-path access.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap a JSON value; `None` unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Read a dotted path without wiring: terminal references resolve to nothing.
    pub fn get(&self, path: &str) -> Option<Value> {
        self.lookup(Some(path), None).ok().flatten()
    }

    /// Read a dotted path, falling back to `default`.
    pub fn get_or(&self, path: &str, default: Value) -> Value {
        self.get(path).unwrap_or(default)
    }

    /// Read a dotted path, pulling from `wires` when the value is a terminal reference.
    ///
    /// With no path, the record itself is resolved: a record holding a
    /// `terminal` pulls from its wire, one holding `value` unwraps to it.
    ///
    /// Pulling consumes one item from the wire. Reading past the end of a
    /// wire is an error; every other miss is `Ok(None)`.
    pub fn get_wired(&self, path: Option<&str>, wires: &Wires) -> PipeResult<Option<Value>> {
        self.lookup(path, Some(wires))
    }

    fn lookup(&self, path: Option<&str>, wires: Option<&Wires>) -> PipeResult<Option<Value>> {
        let Some(path) = path.filter(|p| !p.is_empty()) else {
            return resolve_sentinels(Value::Object(self.0.clone()), wires);
        };

        let mut segments = path.split('.');
        let first = segments.next().unwrap_or(path);
        let mut current = match self.0.get(first).or_else(|| self.0.get(VALUE)) {
            Some(value) => resolve_sentinels(value.clone(), wires)?,
            None => None,
        };
        for segment in segments {
            current = match current {
                Some(value) => step(&value, segment, wires)?,
                None => break,
            };
        }
        Ok(current)
    }

    /// Copy-on-write assignment: a new record with `path` set to `value`.
    pub fn set(&self, path: &str, value: Value) -> Record {
        let mut copy = self.clone();
        copy.set_mut(path, value);
        copy
    }

    /// Assign in place, creating intermediate mappings as needed.
    pub fn set_mut(&mut self, path: &str, value: Value) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = segments.pop().unwrap_or(path);

        let mut current = &mut self.0;
        for segment in segments {
            let next = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !next.is_object() {
                *next = Value::Object(Map::new());
            }
            current = match next {
                Value::Object(map) => map,
                _ => return,
            };
        }
        current.insert(last.to_string(), value);
    }

    /// Remove a dotted key; no-op when absent.
    pub fn delete(&mut self, path: &str) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(last) = segments.pop() else {
            return;
        };

        let mut current = &mut self.0;
        for segment in segments {
            current = match current.get_mut(segment) {
                Some(Value::Object(map)) => map,
                _ => return,
            };
        }
        current.remove(last);
    }

    /// Copy-on-write removal.
    pub fn without(&self, path: &str) -> Record {
        let mut copy = self.clone();
        copy.delete(path);
        copy
    }

    /// Bulk assignment.
    ///
    /// When a key and one of its dotted descendants are both present
    /// (`author` and `author.name`), the deeper key wins and the shallower
    /// one is skipped.
    pub fn update<I, K>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let entries: Vec<(String, Value)> = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();

        for (key, value) in entries {
            let prefix = format!("{}.", key);
            if keys.iter().any(|other| other.starts_with(&prefix)) {
                continue;
            }
            self.set_mut(&key, value);
        }
    }
}

/// One navigation step, resolving sentinels on whatever it lands on.
///
/// Mappings: direct key, else the sibling `value` key. Lists: a numeric
/// segment indexes, any other segment is applied to every element.
fn step(value: &Value, segment: &str, wires: Option<&Wires>) -> PipeResult<Option<Value>> {
    let found = match value {
        Value::Object(map) => map.get(segment).or_else(|| map.get(VALUE)).cloned(),
        Value::Array(items) => match segment.parse::<usize>() {
            Ok(index) => items.get(index).cloned(),
            Err(_) => {
                let mut mapped = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(value) = step(item, segment, wires)? {
                        mapped.push(value);
                    }
                }
                return Ok(Some(Value::Array(mapped)));
            }
        },
        _ => None,
    };

    match found {
        Some(value) => resolve_sentinels(value, wires),
        None => Ok(None),
    }
}

fn resolve_sentinels(value: Value, wires: Option<&Wires>) -> PipeResult<Option<Value>> {
    match value {
        Value::Object(ref map) if map.contains_key(TERMINAL) => {
            let name = map.get(TERMINAL).map(value_text).unwrap_or_default();
            let path = map.get("path").and_then(Value::as_str);
            pull_terminal(&name, path, wires)
        }
        Value::Object(mut map) if map.contains_key(VALUE) => {
            let inner = map.remove(VALUE).unwrap_or(Value::Null);
            resolve_sentinels(inner, wires)
        }
        Value::Null => Ok(None),
        other => Ok(Some(other)),
    }
}

/// Pull one record off the named wire and read `path` (default `content`) from it.
pub(crate) fn pull_terminal(name: &str, path: Option<&str>, wires: Option<&Wires>) -> PipeResult<Option<Value>> {
    match wires.and_then(|w| w.get(name)) {
        Some(terminal) => {
            let pulled = terminal.pull()?;
            Ok(pulled.get(path.unwrap_or(DEFAULT_TERMINAL_PATH)))
        }
        None => {
            debug!(terminal = %name, "no wire supplied for terminal reference");
            Ok(None)
        }
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        record.into_value()
    }
}

impl Index<&str> for Record {
    type Output = Value;

    /// Top-level key access (no dotted paths); `null` when absent.
    fn index(&self, key: &str) -> &Value {
        self.0.get(key).unwrap_or(&NULL)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut record = Record::new();
        record.update(iter);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipeError;
    use crate::wire::Terminal;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let item = record(json!({"title": "x", "author": {"name": "ann"}}));
        for (path, value) in [
            ("title", json!("y")),
            ("author.name", json!("bob")),
            ("author.email", json!("bob@example.com")),
            ("a.b.c", json!([1, 2])),
        ] {
            assert_eq!(item.set(path, value.clone()).get(path), Some(value));
        }
    }

    #[test]
    fn test_set_is_copy_on_write() {
        let item = record(json!({"title": "x"}));
        let updated = item.set("title", json!("y"));
        assert_eq!(item["title"], "x");
        assert_eq!(updated["title"], "y");
    }

    #[test]
    fn test_update_prefers_specific_keys() {
        let mut item = record(json!({"a": {"c": 1}}));
        item.update(vec![("a", json!("literal")), ("a.b", json!(2))]);
        assert_eq!(item.to_value(), json!({"a": {"c": 1, "b": 2}}));
    }

    #[test]
    fn test_value_sentinel_unwraps() {
        let item = record(json!({"price": {"value": 10}, "meta": {"x": {"value": "v"}}}));
        assert_eq!(item.get("price"), Some(json!(10)));
        assert_eq!(item.get("meta.x"), Some(json!("v")));

        // missing key falls back to the sibling `value`
        let wrapped = record(json!({"value": "v", "x": 1}));
        assert_eq!(wrapped.get("missing"), Some(json!("v")));
    }

    #[test]
    fn test_value_sentinel_unwraps_mid_path() {
        let item = record(json!({"price": {"value": {"amount": 5, "currency": "EUR"}}}));
        assert_eq!(item.get("price.amount"), Some(json!(5)));
        assert_eq!(item.get("price.currency"), Some(json!("EUR")));
    }

    #[test]
    fn test_terminal_pulls_mid_path() {
        let wires = Wires::new().with(Terminal::from_records(
            "quotes",
            vec![record(json!({"content": {"eur": 0.9, "gbp": 0.8}}))],
        ));
        let item = record(json!({"rates": {"terminal": "quotes"}}));

        assert_eq!(item.get_wired(Some("rates.eur"), &wires).unwrap(), Some(json!(0.9)));
        assert!(matches!(
            item.get_wired(Some("rates.gbp"), &wires),
            Err(PipeError::TerminalExhausted(name)) if name == "quotes"
        ));
        assert_eq!(item.get("rates.eur"), None);
    }

    #[test]
    fn test_list_fans_out_remaining_path() {
        let item = record(json!({"authors": [{"name": "a"}, {"name": "b"}]}));
        assert_eq!(item.get("authors.name"), Some(json!(["a", "b"])));
        assert_eq!(item.get("authors.1.name"), Some(json!("b")));
    }

    #[test]
    fn test_missing_paths() {
        let item = record(json!({"title": "x", "empty": null}));
        assert_eq!(item.get("nope"), None);
        assert_eq!(item.get("title.deeper"), None);
        assert_eq!(item.get("empty"), None);
        assert_eq!(item.get_or("nope", json!("default")), json!("default"));
    }

    #[test]
    fn test_delete_is_silent_when_absent() {
        let mut item = record(json!({"a": {"b": 1, "c": 2}}));
        item.delete("a.b");
        item.delete("a.zzz");
        item.delete("x.y.z");
        assert_eq!(item.to_value(), json!({"a": {"c": 2}}));
    }

    #[test]
    fn test_terminal_pulls_from_wire() {
        let wires = Wires::new().with(Terminal::from_records(
            "rates",
            vec![record(json!({"content": 1.5, "alt": {"eur": 0.9}})), record(json!({"content": 2.5}))],
        ));
        let item = record(json!({"rate": {"terminal": "rates"}, "alt": {"terminal": "rates", "path": "alt.eur"}}));

        assert_eq!(item.get_wired(Some("alt"), &wires).unwrap(), Some(json!(0.9)));
        assert_eq!(item.get_wired(Some("rate"), &wires).unwrap(), Some(json!(2.5)));

        let exhausted = item.get_wired(Some("rate"), &wires);
        assert!(matches!(exhausted, Err(PipeError::TerminalExhausted(name)) if name == "rates"));
    }

    #[test]
    fn test_absent_wire_resolves_to_nothing() {
        let item = record(json!({"rate": {"terminal": "missing"}}));
        assert_eq!(item.get_wired(Some("rate"), &Wires::new()).unwrap(), None);
        assert_eq!(item.get("rate"), None);
    }

    #[test]
    fn test_get_without_path_resolves_self() {
        let conf = record(json!({"value": "hello"}));
        assert_eq!(conf.get_wired(None, &Wires::new()).unwrap(), Some(json!("hello")));
    }
}
