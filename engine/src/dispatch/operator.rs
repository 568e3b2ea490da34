//! Stream-wise dispatch.
//!
//! An operator body receives the whole stream as an [`OpInput`] and consumes
//! it through exactly one view:
//!
//! | View        | Yields                                                |
//! |-------------|-------------------------------------------------------|
//! | `records()` | the items themselves                                  |
//! | `values()`  | the configured field of each item, cast to `ftype`    |
//! | `pairs()`   | each item with its own resolved configuration         |
//!
//! Every view takes `self`, so a body cannot interleave two of them.
//!
//! An upstream error ends the view early; the dispatcher re-emits it after
//! whatever the body produced from the items before it.

use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

use super::Feed;
use crate::cache::Services;
use crate::cast::{Kind, Typed};
use crate::error::{PipeError, PipeResult};
use crate::record::Record;
use crate::resolve::{Conf, Resolved, Template};
use crate::wire::Wires;

/// Values produced by a composer.
pub type Values = Box<dyn Iterator<Item = Value> + Send>;

/// Call context shared by both operator kinds.
pub struct Context<'a> {
    pub assign: &'a str,
    pub wires: &'a Wires,
    pub services: &'a Services,
}

/// Operator producing exactly one value from the whole stream.
pub trait Aggregator: Send + Sync {
    fn aggregate(&self, input: OpInput, conf: &Conf, ctx: &Context<'_>) -> PipeResult<Value>;
}

/// Operator producing a transformed stream.
pub trait Composer: Send + Sync {
    fn compose(&self, input: OpInput, conf: &Conf, ctx: &Context<'_>) -> PipeResult<Values>;
}

/// First upstream error seen by a view.
#[derive(Clone, Default)]
pub(crate) struct ErrorSlot(Arc<Mutex<Option<PipeError>>>);

impl ErrorSlot {
    fn stash(&self, err: PipeError) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        slot.get_or_insert(err);
    }

    pub(crate) fn take(&self) -> Option<PipeError> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// The stream handed to an operator body.
pub struct OpInput {
    feed: Feed,
    field: Option<String>,
    ftype: Kind,
    template: Arc<Template>,
    wires: Wires,
    slot: ErrorSlot,
}

impl OpInput {
    pub(crate) fn new(
        feed: Feed,
        field: Option<String>,
        ftype: Kind,
        template: Arc<Template>,
        wires: Wires,
        slot: ErrorSlot,
    ) -> Self {
        Self {
            feed,
            field,
            ftype,
            template,
            wires,
            slot,
        }
    }

    /// The items, unchanged.
    pub fn records(self) -> impl Iterator<Item = Record> + Send {
        let slot = self.slot;
        self.feed.map_while(move |item| match item {
            Ok(item) => Some(item),
            Err(err) => {
                slot.stash(err);
                None
            }
        })
    }

    /// The configured field of each item, cast to the declared `ftype`.
    ///
    /// Without a field, the whole item is cast.
    pub fn values(self) -> impl Iterator<Item = Typed> + Send {
        let field = self.field.clone();
        let ftype = self.ftype;
        self.records().map(move |item| {
            let raw = match &field {
                Some(path) => item.get(path).unwrap_or(Value::Null),
                None => item.into_value(),
            };
            ftype.cast(&raw)
        })
    }

    /// Each item paired with its configuration resolved against it.
    pub fn pairs(self) -> impl Iterator<Item = (Record, Arc<Resolved>)> + Send {
        let template = Arc::clone(&self.template);
        let wires = self.wires.clone();
        let slot = self.slot.clone();
        self.records().map_while(move |item| match template.resolve(&item, &wires) {
            Ok(resolved) => Some((item, resolved)),
            Err(err) => {
                slot.stash(err);
                None
            }
        })
    }
}
