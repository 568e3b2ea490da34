//! Built-in pipes and the registry that names them.
//!
//! | Module      | Pipes                                                                |
//! |-------------|----------------------------------------------------------------------|
//! | `sources`   | `itembuilder`, `fetchdata`, `csvpipe`                                |
//! | `text`      | `strreplace`, `regex`, `strtransform`, `strconcat`, `substr`, `tokenizer`, `rename` |
//! | `numeric`   | `typecast`, `simplemath`, `dateformat`, `currencyformat`, `exchangerate` |
//! | `operators` | `count`, `sum`, `sort`, `truncate`, `tail`, `reverse`, `uniq`, `filter` |

pub mod numeric;
pub mod operators;
pub mod sources;
pub mod text;

use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::cache::Services;
use crate::dispatch::{Aggregator, Body, Composer, Options, Overrides, Pipe, PipeKind, Processor};
use crate::error::{PipeError, PipeResult};
use crate::record::VALUE;
use crate::wire::Wires;

static BUILTIN: Lazy<Registry> = Lazy::new(Registry::builtin);

/// A registered body with its declared options.
#[derive(Clone)]
pub struct Registration {
    pub body: Body,
    pub options: Options,
}

impl Registration {
    pub fn kind(&self) -> PipeKind {
        PipeKind::of(&self.body, &self.options)
    }
}

/// Pipes by name.
#[derive(Clone, Default)]
pub struct Registry {
    entries: BTreeMap<String, Registration>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in pipe.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        sources::register(&mut registry);
        text::register(&mut registry);
        numeric::register(&mut registry);
        operators::register(&mut registry);
        registry
    }

    /// Shared, immutable built-in registry.
    pub fn global() -> &'static Registry {
        &BUILTIN
    }

    pub fn register(&mut self, name: impl Into<String>, body: Body, options: Options) {
        self.entries.insert(name.into(), Registration { body, options });
    }

    pub fn processor(&mut self, name: &str, options: Options, body: impl Processor + 'static) {
        self.register(name, Body::processor(body), options);
    }

    pub fn aggregator(&mut self, name: &str, options: Options, body: impl Aggregator + 'static) {
        self.register(name, Body::aggregator(body), options);
    }

    pub fn composer(&mut self, name: &str, options: Options, body: impl Composer + 'static) {
        self.register(name, Body::composer(body), options);
    }

    pub fn get(&self, name: &str) -> Option<&Registration> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names with their kinds, sorted by name.
    pub fn kinds(&self) -> Vec<(&str, PipeKind)> {
        self.entries.iter().map(|(name, reg)| (name.as_str(), reg.kind())).collect()
    }

    /// Reject unknown names and configuration the pipe's own check refuses.
    pub fn check(&self, name: &str, conf: &Value) -> PipeResult<()> {
        let registration = self
            .get(name)
            .ok_or_else(|| PipeError::UnknownPipe(name.to_string()))?;

        match registration.options.check {
            Some(check) => check(conf).map_err(|reason| PipeError::InvalidConf {
                pipe: name.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Build a pipe; unknown names and bad literal tags are rejected here,
    /// before anything runs.
    pub fn build(
        &self,
        name: &str,
        conf: Value,
        overrides: Overrides,
        wires: Wires,
        services: &Services,
    ) -> PipeResult<Pipe> {
        self.check(name, &conf)?;
        let registration = self
            .get(name)
            .ok_or_else(|| PipeError::UnknownPipe(name.to_string()))?;

        Ok(Pipe::new(
            name,
            registration.body.clone(),
            registration.options.clone(),
            conf,
            overrides,
            wires,
            services.clone(),
        ))
    }
}

/// Check that a literal tag names a `T`.
///
/// The tag is the whole conf when it is a string, else the first of `keys`
/// (or `value`) holding a string. Wired tags (`subkey`, `terminal`) only
/// exist per item and are left to the pipe body.
pub(crate) fn literal_tag<T: DeserializeOwned>(conf: &Value, keys: &[&str]) -> Result<(), String> {
    let tag = match conf {
        Value::String(_) => Some(conf),
        Value::Object(map) => keys
            .iter()
            .copied()
            .chain(std::iter::once(VALUE))
            .filter_map(|key| map.get(key))
            .find(|v| v.is_string()),
        _ => None,
    };

    match tag {
        Some(tag) => serde_json::from_value::<T>(tag.clone()).map(|_| ()).map_err(|err| err.to_string()),
        None => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers shared by the pipe tests.

    use serde_json::Value;

    use crate::cache::Services;
    use crate::dispatch::{Feed, Overrides};
    use crate::record::Record;
    use crate::wire::Wires;

    use super::Registry;

    pub fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    /// Run a processor over each item, collecting plain values.
    pub fn process(name: &str, conf: Value, overrides: Overrides, items: Vec<Value>) -> Vec<Value> {
        process_wired(name, conf, overrides, Wires::new(), items)
    }

    pub fn process_wired(name: &str, conf: Value, overrides: Overrides, wires: Wires, items: Vec<Value>) -> Vec<Value> {
        let pipe = Registry::global()
            .build(name, conf, overrides, wires, &Services::default())
            .unwrap();
        items
            .into_iter()
            .flat_map(|item| pipe.process_item(record(item)).unwrap())
            .map(|r| r.unwrap().into_value())
            .collect()
    }

    /// Run an operator over the whole stream, collecting plain values.
    pub fn operate(name: &str, conf: Value, overrides: Overrides, items: Vec<Value>) -> Vec<Value> {
        let pipe = Registry::global()
            .build(name, conf, overrides, Wires::new(), &Services::default())
            .unwrap();
        let feed: Feed = Box::new(items.into_iter().map(|v| Ok(record(v))));
        pipe.operate(feed).unwrap().map(|r| r.unwrap().into_value()).collect()
    }
}
