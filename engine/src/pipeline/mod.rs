//! Assembling pipes into runnable pipelines.
//!
//! - `chain`: fluent [`Chain`] over a scheduler ([`SyncPipe`], [`AsyncPipe`])
//! - `collection`: several sources fetched and merged ([`Collection`])
//! - `definition`: JSON pipeline definitions ([`Definition`])

pub mod chain;
pub mod collection;
pub mod definition;

pub use chain::{AsyncPipe, Chain, Step, SyncPipe};
pub use collection::{Collection, SourceSpec};
pub use definition::{example_definition, Branch, Definition, ExecutionMode, RuntimeOptions, StepSpec};
