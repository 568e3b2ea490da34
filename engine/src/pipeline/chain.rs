//! Fluent chaining of pipes over one scheduler.

use futures::stream::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::cache::Services;
use crate::concurrency::{Blocking, Cooperative, Scheduler};
use crate::dispatch::{CountMode, Overrides, Pipe, SkipIf, SkipRule};
use crate::error::PipeResult;
use crate::pipes::Registry;
use crate::record::Record;
use crate::wire::{Terminal, Wires};

/// Chain run on plain iterators, optionally over a worker pool.
pub type SyncPipe = Chain<Blocking>;

/// Chain run on tokio.
pub type AsyncPipe = Chain<Cooperative>;

/// One use of a named pipe: its configuration and per-call options.
#[derive(Debug, Clone)]
pub struct Step {
    name: String,
    conf: Value,
    overrides: Overrides,
    wires: Wires,
}

impl Step {
    pub fn new(name: impl Into<String>, conf: Value) -> Self {
        Self {
            name: name.into(),
            conf,
            overrides: Overrides::default(),
            wires: Wires::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn conf(mut self, conf: Value) -> Self {
        self.conf = conf;
        self
    }

    pub fn field(mut self, path: impl Into<String>) -> Self {
        self.overrides.field = Some(path.into());
        self
    }

    pub fn assign(mut self, key: impl Into<String>) -> Self {
        self.overrides.assign = Some(key.into());
        self
    }

    pub fn emit(mut self, emit: bool) -> Self {
        self.overrides.emit = Some(emit);
        self
    }

    pub fn count(mut self, count: CountMode) -> Self {
        self.overrides.count = Some(count);
        self
    }

    pub fn skip_if(mut self, rules: Vec<SkipRule>) -> Self {
        self.overrides.skip_if = SkipIf::Rules(rules);
        self
    }

    pub fn skip_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.overrides.skip_if = SkipIf::when(predicate);
        self
    }

    /// Replace all per-call options at once.
    pub fn overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Make a terminal readable from this step's configuration.
    pub fn wire(mut self, terminal: Terminal) -> Self {
        self.wires.insert(terminal);
        self
    }

    pub fn wires(mut self, wires: Wires) -> Self {
        self.wires = wires;
        self
    }

    pub(crate) fn build(self, registry: &Registry, services: &Services) -> PipeResult<Pipe> {
        registry.build(&self.name, self.conf, self.overrides, self.wires, services)
    }
}

/// A stream of items with pipes applied so far.
///
/// ```rust,ignore
/// let items = SyncPipe::new("itembuilder", json!({"attrs": {"key": "content", "value": "hi"}}))?
///     .pipe("strtransform", json!({"transformation": "upper"}))?
///     .list()?;
/// ```
pub struct Chain<S: Scheduler> {
    scheduler: S,
    services: Services,
    registry: Arc<Registry>,
    stream: S::Stream,
}

impl<S: Scheduler + Default> Chain<S> {
    /// Start from a source pipe.
    pub fn new(name: &str, conf: Value) -> PipeResult<Self> {
        Self::source(S::default(), Services::default(), Step::new(name, conf))
    }

    /// Start from existing items.
    pub fn from_records(records: Vec<Record>) -> Self {
        Self::seeded(S::default(), Services::default(), records)
    }
}

impl<S: Scheduler> Chain<S> {
    pub fn from_stream(scheduler: S, services: Services, stream: S::Stream) -> Self {
        Self {
            scheduler,
            services,
            registry: Arc::new(Registry::global().clone()),
            stream,
        }
    }

    pub fn seeded(scheduler: S, services: Services, records: Vec<Record>) -> Self {
        let stream = scheduler.from_records(records);
        Self::from_stream(scheduler, services, stream)
    }

    /// Run `step` once with no input item.
    pub fn source(scheduler: S, services: Services, step: Step) -> PipeResult<Self> {
        Self::seeded(scheduler, services, vec![Record::new()]).step(step)
    }

    /// Resolve later steps against `registry` instead of the built-ins.
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Chain to the pipe called `name`.
    pub fn pipe(self, name: &str, conf: Value) -> PipeResult<Self> {
        self.step(Step::new(name, conf))
    }

    /// Chain to a fully configured step; unknown pipe names fail here.
    pub fn step(self, step: Step) -> PipeResult<Self> {
        let Self {
            scheduler,
            services,
            registry,
            stream,
        } = self;

        let pipe = Arc::new(step.build(&registry, &services)?);
        debug!(pipe = %pipe.name(), kind = %pipe.kind(), "chained");
        let stream = pipe.apply(stream, &scheduler);
        Ok(Self {
            scheduler,
            services,
            registry,
            stream,
        })
    }

    /// The resulting stream, not yet consumed.
    pub fn output(self) -> S::Stream {
        self.stream
    }
}

impl Chain<Blocking> {
    /// Drain the chain; the first failed item aborts.
    pub fn list(self) -> PipeResult<Vec<Value>> {
        self.stream.map(|item| item.map(Record::into_value)).collect()
    }
}

impl Chain<Cooperative> {
    /// Drain the chain; the first failed item aborts.
    pub async fn list(self) -> PipeResult<Vec<Value>> {
        let items: Vec<PipeResult<Record>> = self.stream.collect().await;
        items.into_iter().map(|item| item.map(Record::into_value)).collect()
    }
}
