//! Pipeline definition files.
//!
//! A definition is a JSON document describing a whole run:
//!
//! ```json
//! {
//!   "description": "greetings",
//!   "runtime": {"mode": "sync", "parallel": true},
//!   "input": [{"content": "hello world"}],
//!   "steps": [
//!     {"pipe": "strreplace", "conf": {"rule": {"find": "hello", "replace": "bye"}}},
//!     {"pipe": "simplemath", "field": "n", "conf": {"other": {"terminal": "factors"}}}
//!   ],
//!   "terminals": {
//!     "factors": {"input": [{"content": 2}]}
//!   }
//! }
//! ```
//!
//! Pipe names, terminal references, skip rule ops and literal pipe tags
//! (`op`, `transformation`, `type`) are checked when the definition is
//! loaded, before anything runs.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::chain::{Chain, Step};
use super::collection::{Collection, SourceSpec};
use crate::cache::{ResponseCache, Services, DEFAULT_TTL};
use crate::concurrency::{worker_count, Blocking, Cooperative, Scheduler, WorkerPool, DEFAULT_LENGTH, DEFAULT_MULTIPLIER};
use crate::dispatch::Overrides;
use crate::error::{DefinitionError, DefinitionResult, PipeError, PipeResult};
use crate::pipes::Registry;
use crate::record::{Record, TERMINAL};
use crate::wire::{Terminal, Wires};

// =============================================================================
// Runtime options
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sync,
    Async,
}

/// How a definition is run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    pub mode: ExecutionMode,

    /// Fan processors and sources out over workers / tasks
    pub parallel: bool,

    /// Fixed pool size; sized from the stream otherwise
    pub workers: Option<usize>,

    /// Workers per CPU when sizing a pool
    pub multiplier: usize,

    /// Keep input order under parallel execution
    pub ordered: bool,

    /// Cooperative tasks in flight; unbounded when unset
    pub connections: Option<usize>,

    pub cache_ttl_secs: u64,

    /// Build one worker pool and share it across every step
    pub reuse_pool: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sync,
            parallel: false,
            workers: None,
            multiplier: DEFAULT_MULTIPLIER,
            ordered: false,
            connections: None,
            cache_ttl_secs: DEFAULT_TTL.as_secs(),
            reuse_pool: false,
        }
    }
}

impl RuntimeOptions {
    pub fn services(&self) -> Services {
        Services::new(ResponseCache::new(Duration::from_secs(self.cache_ttl_secs)))
    }

    /// Blocking scheduler, with the shared pool when one is requested.
    pub fn blocking(&self) -> PipeResult<(Blocking, Option<WorkerPool>)> {
        if !self.parallel {
            return Ok((Blocking::sequential(), None));
        }

        let scheduler = Blocking::parallel().ordered(self.ordered).multiplier(self.multiplier);
        if !self.reuse_pool && self.workers.is_none() {
            return Ok((scheduler, None));
        }

        let workers = self
            .workers
            .unwrap_or_else(|| worker_count(DEFAULT_LENGTH, self.multiplier));
        let pool = WorkerPool::new(workers)?;
        Ok((scheduler.with_pool(pool.clone()), Some(pool)))
    }

    pub fn cooperative(&self) -> Cooperative {
        if !self.parallel {
            return Cooperative::serial();
        }
        let scheduler = Cooperative::parallel().ordered(self.ordered);
        match self.connections {
            Some(limit) => scheduler.connections(limit),
            None => scheduler,
        }
    }
}

// =============================================================================
// Definition
// =============================================================================

/// One step of a definition: a pipe name, its configuration and overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub pipe: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub conf: Value,
    #[serde(flatten)]
    pub overrides: Overrides,
}

impl StepSpec {
    pub fn new(pipe: impl Into<String>, conf: Value) -> Self {
        Self {
            pipe: pipe.into(),
            conf,
            overrides: Overrides::default(),
        }
    }

    fn to_step(&self, wires: &Wires) -> Step {
        Step::new(self.pipe.clone(), self.conf.clone())
            .overrides(self.overrides.clone())
            .wires(wires.clone())
    }
}

/// Where items come from and what is done to them.
///
/// Sources win over literal input; with neither, the first step runs once
/// against an empty item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Branch {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub input: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceSpec>,
    pub steps: Vec<StepSpec>,
}

impl Branch {
    fn names(&self) -> impl Iterator<Item = &str> {
        self.sources
            .iter()
            .map(|s| s.pipe.as_str())
            .chain(self.steps.iter().map(|s| s.pipe.as_str()))
    }

    fn start<S: Scheduler>(&self, scheduler: S, services: Services) -> PipeResult<Chain<S>> {
        if !self.sources.is_empty() {
            return Collection::new(scheduler, services)
                .sources(self.sources.iter().cloned())
                .into_chain();
        }

        let records: Vec<Record> = if self.input.is_empty() {
            vec![Record::new()]
        } else {
            self.input.iter().cloned().filter_map(Record::from_value).collect()
        };
        Ok(Chain::seeded(scheduler, services, records))
    }

    fn build<S: Scheduler>(&self, scheduler: S, services: Services, wires: &Wires) -> PipeResult<Chain<S>> {
        self.steps
            .iter()
            .try_fold(self.start(scheduler, services)?, |chain, step| chain.step(step.to_step(wires)))
    }
}

/// A complete, runnable pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Definition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub runtime: RuntimeOptions,
    #[serde(flatten)]
    pub main: Branch,
    /// Named branches whose output is read through `{"terminal": name}`
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub terminals: BTreeMap<String, Branch>,
}

impl Definition {
    /// Load and validate a definition file.
    pub fn from_file(path: &Path) -> DefinitionResult<Self> {
        info!(path = %path.display(), "loading definition");
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> DefinitionResult<Self> {
        let definition: Definition = serde_json::from_str(content)?;
        definition.validate(Registry::global())?;
        Ok(definition)
    }

    /// Every pipe must be registered, accept its literal configuration, and
    /// every terminal reference must be defined.
    pub fn validate(&self, registry: &Registry) -> DefinitionResult<()> {
        let branches = std::iter::once(&self.main).chain(self.terminals.values());
        for branch in branches {
            if let Some(unknown) = branch.names().find(|name| !registry.contains(name)) {
                return Err(PipeError::UnknownPipe(unknown.to_string()).into());
            }

            for step in &branch.steps {
                registry.check(&step.pipe, &step.conf)?;

                let mut referenced = Vec::new();
                terminal_refs(&step.conf, &mut referenced);
                if let Some(missing) = referenced.into_iter().find(|name| !self.terminals.contains_key(name)) {
                    return Err(DefinitionError::UndefinedTerminal(missing));
                }
            }
        }
        Ok(())
    }

    /// Run on the blocking scheduler.
    pub fn run_sync(&self) -> DefinitionResult<Vec<Value>> {
        let services = self.runtime.services();
        let (scheduler, pool) = self.runtime.blocking()?;

        // branches may read terminals defined before them, by name
        let mut wires = Wires::new();
        for (name, branch) in &self.terminals {
            debug!(terminal = %name, "wiring terminal");
            let feed = branch.build(scheduler.clone(), services.clone(), &wires)?.output();
            wires.insert(Terminal::new(name.clone(), feed));
        }

        let items = self.main.build(scheduler, services, &wires)?.list()?;
        if let Some(pool) = pool {
            pool.shutdown();
        }
        info!(items = items.len(), "definition finished");
        Ok(items)
    }

    /// Run on the cooperative scheduler; terminals are drained first.
    pub async fn run_async(&self) -> DefinitionResult<Vec<Value>> {
        let services = self.runtime.services();
        let scheduler = self.runtime.cooperative();

        let mut wires = Wires::new();
        for (name, branch) in &self.terminals {
            debug!(terminal = %name, "wiring terminal");
            let stream = branch.build(scheduler.clone(), services.clone(), &wires)?.output();
            wires.insert(Terminal::collect(name.clone(), stream).await);
        }

        let items = self.main.build(scheduler, services, &wires)?.list().await?;
        info!(items = items.len(), "definition finished");
        Ok(items)
    }
}

/// Names of every `{"terminal": name}` reference in a configuration.
fn terminal_refs(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(name)) = map.get(TERMINAL) {
                found.push(name.clone());
            }
            map.values().for_each(|v| terminal_refs(v, found));
        }
        Value::Array(items) => items.iter().for_each(|v| terminal_refs(v, found)),
        _ => {}
    }
}

/// A small definition exercising a source, processors and an operator.
pub fn example_definition() -> Definition {
    let mut tokenize = StepSpec::new("tokenizer", json!({"delimiter": " "}));
    tokenize.overrides.field = Some("greeting".to_string());
    tokenize.overrides.assign = Some("word".to_string());

    let mut replace = StepSpec::new("strreplace", json!({"rule": {"find": "hello", "replace": "bye"}}));
    replace.overrides.assign = Some("greeting".to_string());

    Definition {
        description: Some("Replace greetings, split them into words and count each word".to_string()),
        runtime: RuntimeOptions::default(),
        main: Branch {
            input: vec![
                json!({"content": "hello world"}),
                json!({"content": "hello rust world"}),
            ],
            sources: Vec::new(),
            steps: vec![
                replace,
                tokenize,
                StepSpec::new("count", json!({"count_key": "word"})),
            ],
        },
        terminals: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_definition_runs_both_ways() {
        let definition = example_definition();
        let expected = vec![json!({"bye": 2}), json!({"rust": 1}), json!({"world": 2})];
        assert_eq!(definition.run_sync().unwrap(), expected);

        let runtime = tokio::runtime::Runtime::new().unwrap();
        assert_eq!(runtime.block_on(definition.run_async()).unwrap(), expected);
    }

    #[test]
    fn test_round_trips_through_json() {
        let text = serde_json::to_string(&example_definition()).unwrap();
        let parsed = Definition::from_json(&text).unwrap();
        assert_eq!(parsed.main.steps.len(), 3);
        assert_eq!(parsed.main.steps[1].overrides.assign.as_deref(), Some("word"));
    }

    #[test]
    fn test_unknown_pipe_rejected_at_load() {
        let err = Definition::from_json(r#"{"steps": [{"pipe": "nonesuch"}]}"#).unwrap_err();
        assert!(matches!(err, DefinitionError::Pipe(PipeError::UnknownPipe(name)) if name == "nonesuch"));
    }

    #[test]
    fn test_unknown_skip_op_rejected_at_load() {
        let text = r#"{"steps": [{"pipe": "strtransform", "skip_if": {"field": "a", "op": "bogus"}}]}"#;
        assert!(matches!(Definition::from_json(text), Err(DefinitionError::Json(_))));
    }

    #[test]
    fn test_unknown_math_op_rejected_at_load() {
        let text = r#"{"steps": [{"pipe": "simplemath", "conf": {"op": "bogus", "other": 2}}]}"#;
        assert!(matches!(
            Definition::from_json(text),
            Err(DefinitionError::Pipe(PipeError::InvalidConf { pipe, .. })) if pipe == "simplemath"
        ));
    }

    #[test]
    fn test_unknown_transformation_rejected_at_load() {
        let text = r#"{"steps": [{"pipe": "strtransform", "conf": {"transformation": "shout"}}]}"#;
        assert!(matches!(
            Definition::from_json(text),
            Err(DefinitionError::Pipe(PipeError::InvalidConf { .. }))
        ));
    }

    #[test]
    fn test_undefined_terminal_rejected_at_load() {
        let text = r#"{"steps": [{"pipe": "simplemath", "conf": {"other": {"terminal": "missing"}}}]}"#;
        assert!(matches!(
            Definition::from_json(text),
            Err(DefinitionError::UndefinedTerminal(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_terminals_feed_main_branch() {
        let text = r#"{
            "input": [{"content": 1}, {"content": 2}],
            "steps": [{"pipe": "simplemath", "assign": "scaled",
                       "conf": {"op": "multiply", "other": {"terminal": "factors", "path": "f"}}}],
            "terminals": {
                "factors": {"steps": [{"pipe": "itembuilder", "conf": {"attrs": {"key": "f", "value": 10}}}],
                            "input": []}
            }
        }"#;
        let definition = Definition::from_json(text).unwrap();
        // one factor item, two reads
        assert!(matches!(
            definition.run_sync(),
            Err(DefinitionError::Pipe(PipeError::TerminalExhausted(_)))
        ));
    }

    #[test]
    fn test_parallel_runtime_with_shared_pool() {
        let mut definition = example_definition();
        definition.runtime = RuntimeOptions {
            parallel: true,
            ordered: true,
            workers: Some(2),
            reuse_pool: true,
            ..RuntimeOptions::default()
        };
        let out = definition.run_sync().unwrap();
        assert_eq!(out, vec![json!({"bye": 2}), json!({"rust": 1}), json!({"world": 2})]);
    }

    #[test]
    fn test_sources_win_over_input() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, br#"[{"content": "from file"}]"#).unwrap();
        let text = json!({
            "input": [{"content": "ignored"}],
            "sources": [{"type": "fetchdata", "url": file.path().to_string_lossy()}],
            "steps": [{"pipe": "strtransform", "conf": "upper"}]
        })
        .to_string();
        let out = Definition::from_json(&text).unwrap().run_sync().unwrap();
        assert_eq!(out, vec![json!({"content": "from file", "strtransform": "FROM FILE"})]);
    }
}
