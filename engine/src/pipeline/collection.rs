//! Several source pipes fetched and merged into one stream.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

use super::chain::Chain;
use crate::cache::Services;
use crate::concurrency::{Scheduler, SourceTask};
use crate::error::PipeResult;
use crate::pipes::Registry;
use crate::record::Record;

/// One source: a source pipe name, where to read, and any extra configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    #[serde(rename = "type")]
    pub pipe: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub conf: Value,
}

impl SourceSpec {
    pub fn new(pipe: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            pipe: pipe.into(),
            url: Some(url.into()),
            conf: Value::Null,
        }
    }

    /// `conf` with `url` merged in.
    fn configuration(&self) -> Value {
        let mut conf = match &self.conf {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        if let Some(url) = &self.url {
            conf.insert("url".to_string(), Value::String(url.clone()));
        }
        Value::Object(conf)
    }
}

/// Merges the output of several sources.
///
/// Under a parallel scheduler the sources are fetched concurrently and the
/// relative order of their items is not kept.
pub struct Collection<S: Scheduler> {
    scheduler: S,
    services: Services,
    registry: Arc<Registry>,
    sources: Vec<SourceSpec>,
}

impl<S: Scheduler> Collection<S> {
    pub fn new(scheduler: S, services: Services) -> Self {
        Self {
            scheduler,
            services,
            registry: Arc::new(Registry::global().clone()),
            sources: Vec::new(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn source(mut self, spec: SourceSpec) -> Self {
        self.sources.push(spec);
        self
    }

    pub fn sources(mut self, specs: impl IntoIterator<Item = SourceSpec>) -> Self {
        self.sources.extend(specs);
        self
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Build every source pipe, then fetch and merge.
    ///
    /// All names are checked before anything is fetched.
    pub fn fetch(self) -> PipeResult<S::Stream> {
        let tasks = self
            .sources
            .iter()
            .map(|spec| -> PipeResult<SourceTask> {
                let pipe = self.registry.build(
                    &spec.pipe,
                    spec.configuration(),
                    Default::default(),
                    Default::default(),
                    &self.services,
                )?;
                Ok(Box::new(move || pipe.process_item(Record::new())))
            })
            .collect::<PipeResult<Vec<_>>>()?;

        info!(sources = tasks.len(), "fetching sources");
        Ok(self.scheduler.fan_in(tasks))
    }

    /// Fetch and continue as a chain.
    pub fn into_chain(self) -> PipeResult<Chain<S>> {
        let scheduler = self.scheduler.clone();
        let services = self.services.clone();
        let registry = Arc::clone(&self.registry);
        let stream = self.fetch()?;
        Ok(Chain::from_stream(scheduler, services, stream).with_registry(registry))
    }
}
