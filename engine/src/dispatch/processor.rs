//! Item-wise dispatch.
//!
//! Every item passes through the same five states:
//!
//! ```text
//! EXTRACT_FIELD → EXTRACT_CONFIG → EVALUATE_SKIP → INVOKE_BODY → ASSIGN_OR_EMIT
//! ```
//!
//! The body is always invoked, skipped or not; it sees the skip flag and
//! decides what to return. A caller's skip cannot be undone by the body.

use serde_json::Value;
use std::iter;

use super::{CountMode, Feed, ValueFeed};
use crate::cache::Services;
use crate::cast::Typed;
use crate::error::PipeResult;
use crate::record::Record;
use crate::resolve::Conf;
use crate::wire::Wires;

/// Everything a processor body is called with.
pub struct Call<'a> {
    /// Extracted, cast field (`Typed::Nothing` for sources)
    pub field: Typed,
    pub conf: &'a Conf,
    /// Resolved extracted rules
    pub rules: &'a [Conf],
    pub skip: bool,
    /// The unmodified input item
    pub item: &'a Record,
    pub assign: &'a str,
    pub wires: &'a Wires,
    pub services: &'a Services,
}

/// What a body produced.
pub enum Output {
    One(Value),
    Many(Vec<Value>),
    Stream(ValueFeed),
}

/// Body result: output plus the body's own skip signal.
pub struct Outcome {
    pub output: Output,
    pub skip: bool,
}

impl Outcome {
    pub fn one(value: impl Into<Value>) -> Self {
        Self {
            output: Output::One(value.into()),
            skip: false,
        }
    }

    pub fn many(values: Vec<Value>) -> Self {
        Self {
            output: Output::Many(values),
            skip: false,
        }
    }

    pub fn stream<I>(values: I) -> Self
    where
        I: Iterator<Item = PipeResult<Value>> + Send + 'static,
    {
        Self {
            output: Output::Stream(Box::new(values)),
            skip: false,
        }
    }

    /// Hand the unmodified item back, marked as skipped.
    pub fn passthrough(item: &Record) -> Self {
        Self {
            output: Output::One(item.to_value()),
            skip: true,
        }
    }

    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }
}

/// An item-wise pipe body.
pub trait Processor: Send + Sync {
    fn process(&self, call: Call<'_>) -> PipeResult<Outcome>;
}

impl<F> Processor for F
where
    F: Fn(Call<'_>) -> PipeResult<Outcome> + Send + Sync,
{
    fn process(&self, call: Call<'_>) -> PipeResult<Outcome> {
        self(call)
    }
}

/// How [`assign_or_emit`] shapes output.
pub(crate) struct Placement {
    pub emit: bool,
    pub assign: String,
    pub count: Option<CountMode>,
}

/// ASSIGN_OR_EMIT: turn a body's output into items.
///
/// Emitted (or skipped) output becomes items directly; anything else is
/// merged into `item` under `assign`, one merged item per value.
pub(crate) fn assign_or_emit(item: Record, output: Output, skip: bool, placement: Placement) -> Feed {
    let values = into_values(output);
    let Placement { emit, assign, count } = placement;

    if emit || skip {
        return Box::new(values.map(move |v| v.map(|v| into_item(v, &assign))));
    }

    match count {
        Some(CountMode::First) => {
            let mut values = values;
            let first = match values.next() {
                Some(Err(err)) => return Box::new(iter::once(Err(err))),
                Some(Ok(v)) => v,
                None => Value::Null,
            };
            Box::new(iter::once(Ok(item.set(&assign, first))))
        }
        Some(CountMode::All) => {
            let collected: PipeResult<Vec<Value>> = values.collect();
            Box::new(iter::once(collected.map(|all| item.set(&assign, Value::Array(all)))))
        }
        None => {
            let mut values = values;
            // peek two: one value or many, each is merged on its own;
            // empty output still yields the item, with `assign` null
            let head: Vec<PipeResult<Value>> = values.by_ref().take(2).collect();
            match head.len() {
                0 => Box::new(iter::once(Ok(item.set(&assign, Value::Null)))),
                1 => Box::new(head.into_iter().map(move |v| v.map(|v| item.set(&assign, v)))),
                _ => Box::new(
                    head.into_iter()
                        .chain(values)
                        .map(move |v| v.map(|v| item.set(&assign, v))),
                ),
            }
        }
    }
}

fn into_values(output: Output) -> ValueFeed {
    match output {
        Output::One(value) => Box::new(iter::once(Ok(value))),
        Output::Many(values) => Box::new(values.into_iter().map(Ok)),
        Output::Stream(values) => values,
    }
}

/// Mapping values become items; anything else is wrapped as `{assign: v}`.
pub(crate) fn into_item(value: Value, assign: &str) -> Record {
    match value {
        Value::Object(map) => Record::from(map),
        other => Record::new().set(assign, other),
    }
}
