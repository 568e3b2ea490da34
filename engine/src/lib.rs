//! # pipemash - composable pipes over key-value records
//!
//! Items are JSON objects addressed with dotted paths. Pipes transform a
//! stream of items one at a time (processors, sources) or as a whole
//! (aggregators, composers); their configuration is resolved against each
//! item before the pipe body runs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Sources   │────▶│  Dispatch   │────▶│  Scheduler  │────▶│   Output    │
//! │ (json, csv) │     │ (conf+body) │     │ (sync/async)│     │   (items)   │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pipemash::SyncPipe;
//! use serde_json::json;
//!
//! let items = SyncPipe::new("itembuilder", json!({"attrs": [{"key": "content", "value": "hello world"}]}))?
//!     .pipe("strreplace", json!({"rule": {"find": "hello", "replace": "bye"}}))?
//!     .list()?;
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types
//! - [`record`] - Dotted-path records
//! - [`cast`] - `ftype`/`ptype` casting
//! - [`wire`] - Terminal wiring between pipes
//! - [`resolve`] - Configuration resolution
//! - [`dispatch`] - Processor and operator dispatch
//! - [`concurrency`] - Worker pools and cooperative tasks
//! - [`cache`] - Response cache and shared services
//! - [`pipes`] - Built-in pipes and the registry
//! - [`pipeline`] - Chains, collections and definition files
//! - [`logging`] - tracing setup

// Core modules
pub mod error;
pub mod logging;

// Data model
pub mod cast;
pub mod record;
pub mod wire;

// Resolution and dispatch
pub mod dispatch;
pub mod resolve;

// Execution
pub mod cache;
pub mod concurrency;

// Pipes
pub mod pipeline;
pub mod pipes;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConcurrencyError,
    ConcurrencyResult,
    DefinitionError,
    DefinitionResult,
    PipeError,
    PipeResult,
};

// =============================================================================
// Re-exports - Data model
// =============================================================================

pub use cast::{Kind, Typed};
pub use record::Record;
pub use wire::{Terminal, Wires};

// =============================================================================
// Re-exports - Resolution
// =============================================================================

pub use resolve::{resolve_config, resolve_rules, resolve_value, Conf, Node, Resolved, Shape, Template};

// =============================================================================
// Re-exports - Dispatch
// =============================================================================

pub use dispatch::{
    Aggregator,
    Body,
    Call,
    Composer,
    Context,
    CountMode,
    Feed,
    OpInput,
    Options,
    Outcome,
    Overrides,
    Pipe,
    PipeKind,
    Processor,
    RuleOp,
    SkipIf,
    SkipRule,
};

// =============================================================================
// Re-exports - Execution
// =============================================================================

pub use cache::{ResponseCache, Services};
pub use concurrency::{Blocking, Cooperative, Scheduler, WorkerPool};

// =============================================================================
// Re-exports - Pipes and pipelines
// =============================================================================

pub use pipes::Registry;
pub use pipeline::{
    example_definition,
    AsyncPipe,
    Chain,
    Collection,
    Definition,
    RuntimeOptions,
    SourceSpec,
    Step,
    SyncPipe,
};
