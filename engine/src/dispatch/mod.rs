//! Pipe dispatch.
//!
//! Turns a plain body into a pipe. Two dispatchers share one contract:
//!
//! | Kind                    | Body trait      | Unit of work   | Output                         |
//! |-------------------------|-----------------|----------------|--------------------------------|
//! | source / processor      | [`Processor`]   | one item       | merged items or emitted values |
//! | aggregator              | [`Aggregator`]  | whole stream   | exactly one item               |
//! | composer                | [`Composer`]    | whole stream   | one item per produced value    |
//!
//! The operator kind is declared when the body is registered.
//!
//! - `options`: registration options, per-call overrides, skip rules
//! - `processor`: the item-wise state machine
//! - `operator`: the stream-wise views ([`OpInput`])
//! - `pipe`: a built [`Pipe`] and its scheduling entry point

pub mod operator;
pub mod options;
pub mod pipe;
pub mod processor;

pub use operator::{Aggregator, Composer, Context, OpInput, Values};
pub use options::{ConfCheck, CountMode, Options, Overrides, Predicate, RuleOp, SkipIf, SkipRule};
pub use pipe::{Body, Pipe, PipeKind};
pub use processor::{Call, Outcome, Output, Processor};

use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::PipeResult;
use crate::record::Record;

/// Lazy, forward-only stream of items (blocking side).
pub type Feed = Box<dyn Iterator<Item = PipeResult<Record>> + Send>;

/// Stream of items on the cooperative side.
pub type AsyncFeed = BoxStream<'static, PipeResult<Record>>;

/// Lazy stream of body results.
pub type ValueFeed = Box<dyn Iterator<Item = PipeResult<Value>> + Send>;
