//! A built pipe: registered body + compiled configuration + call overrides.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::iter;
use std::sync::Arc;
use tracing::debug;

use super::operator::{Aggregator, Composer, Context, ErrorSlot, OpInput, Values};
use super::processor::{assign_or_emit, into_item, Call, Placement, Processor};
use super::{Feed, Options, Overrides};
use crate::cache::Services;
use crate::cast::Typed;
use crate::concurrency::Scheduler;
use crate::error::{PipeError, PipeResult};
use crate::record::Record;
use crate::resolve::Template;
use crate::wire::Wires;

/// A registered pipe body, by declared kind.
#[derive(Clone)]
pub enum Body {
    Processor(Arc<dyn Processor>),
    Aggregator(Arc<dyn Aggregator>),
    Composer(Arc<dyn Composer>),
}

impl Body {
    pub fn processor(body: impl Processor + 'static) -> Self {
        Body::Processor(Arc::new(body))
    }

    pub fn aggregator(body: impl Aggregator + 'static) -> Self {
        Body::Aggregator(Arc::new(body))
    }

    pub fn composer(body: impl Composer + 'static) -> Self {
        Body::Composer(Arc::new(body))
    }
}

/// Pipe kind, as declared at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipeKind {
    Source,
    Processor,
    Aggregator,
    Composer,
}

impl PipeKind {
    pub fn of(body: &Body, options: &Options) -> Self {
        match body {
            Body::Processor(_) if options.is_source() => PipeKind::Source,
            Body::Processor(_) => PipeKind::Processor,
            Body::Aggregator(_) => PipeKind::Aggregator,
            Body::Composer(_) => PipeKind::Composer,
        }
    }

    pub fn is_operator(self) -> bool {
        matches!(self, PipeKind::Aggregator | PipeKind::Composer)
    }
}

impl fmt::Display for PipeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipeKind::Source => "source",
            PipeKind::Processor => "processor",
            PipeKind::Aggregator => "aggregator",
            PipeKind::Composer => "composer",
        };
        f.write_str(name)
    }
}

pub struct Pipe {
    name: String,
    kind: PipeKind,
    body: Body,
    options: Options,
    overrides: Overrides,
    template: Arc<Template>,
    wires: Wires,
    services: Services,
}

impl Pipe {
    /// Compile a pipe; the configuration template is built here, once.
    pub fn new(
        name: impl Into<String>,
        body: Body,
        options: Options,
        conf: Value,
        overrides: Overrides,
        wires: Wires,
        services: Services,
    ) -> Self {
        let template = Template::new(
            conf,
            options.extract.as_deref(),
            options.listize,
            options.defaults.clone(),
            options.shape(),
        );
        Self {
            name: name.into(),
            kind: PipeKind::of(&body, &options),
            body,
            options,
            overrides,
            template: Arc::new(template),
            wires,
            services,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PipeKind {
        self.kind
    }

    /// Key output is assigned under; the pipe's name unless overridden.
    pub fn assign(&self) -> &str {
        self.overrides.assign.as_deref().unwrap_or(&self.name)
    }

    /// Sources and operators emit by default, processors assign.
    pub fn emits(&self) -> bool {
        self.overrides
            .emit
            .or(self.options.emit)
            .unwrap_or(self.kind != PipeKind::Processor)
    }

    fn field(&self) -> Option<&str> {
        self.overrides.field.as_deref().or(self.options.field.as_deref())
    }

    /// Run the processor state machine over one item.
    pub fn process_item(&self, item: Record) -> PipeResult<Feed> {
        let Body::Processor(body) = &self.body else {
            return Err(PipeError::Structural(format!("'{}' is not an item-wise pipe", self.name)));
        };

        // EXTRACT_FIELD
        let field = if self.options.is_source() {
            Typed::Nothing
        } else {
            let raw = match self.field() {
                Some(path) => item.get(path).unwrap_or(Value::Null),
                None => item.to_value(),
            };
            self.options.ftype.cast(&raw)
        };

        // EXTRACT_CONFIG
        let resolved = self.template.resolve(&item, &self.wires)?;

        // EVALUATE_SKIP
        let skip = self.overrides.skip_if.evaluate(&item);

        // INVOKE_BODY
        let assign = self.assign();
        debug!(pipe = %self.name, skip, "invoking processor");
        let outcome = body.process(Call {
            field,
            conf: &resolved.conf,
            rules: &resolved.rules,
            skip,
            item: &item,
            assign,
            wires: &self.wires,
            services: &self.services,
        })?;

        // ASSIGN_OR_EMIT
        let placement = Placement {
            emit: self.emits(),
            assign: assign.to_string(),
            count: self.overrides.count,
        };
        Ok(assign_or_emit(item, outcome.output, skip || outcome.skip, placement))
    }

    /// Run an operator body over the whole stream.
    pub fn operate(&self, feed: Feed) -> PipeResult<Feed> {
        // stream-level conf never pulls terminals; per-item wiring goes through `pairs()`
        let resolved = self.template.resolve(&Record::new(), &Wires::new())?;
        let slot = ErrorSlot::default();
        let input = OpInput::new(
            feed,
            self.field().map(str::to_string),
            self.options.ftype,
            Arc::clone(&self.template),
            self.wires.clone(),
            slot.clone(),
        );
        let ctx = Context {
            assign: self.assign(),
            wires: &self.wires,
            services: &self.services,
        };

        debug!(pipe = %self.name, kind = %self.kind, "invoking operator");
        let values: Values = match &self.body {
            Body::Aggregator(body) => Box::new(iter::once(body.aggregate(input, &resolved.conf, &ctx)?)),
            Body::Composer(body) => body.compose(input, &resolved.conf, &ctx)?,
            Body::Processor(_) => {
                return Err(PipeError::Structural(format!("'{}' is not a stream-wise pipe", self.name)))
            }
        };

        let emit = self.emits();
        let assign = self.assign().to_string();
        let items = values.map(move |v| {
            Ok(if emit {
                into_item(v, &assign)
            } else {
                Record::new().set(&assign, v)
            })
        });
        let trailing = iter::once_with(move || slot.take()).flatten().map(Err);
        Ok(Box::new(items.chain(trailing)))
    }

    /// Apply this pipe to a stream under `scheduler`.
    pub fn apply<S: Scheduler>(self: Arc<Self>, input: S::Stream, scheduler: &S) -> S::Stream {
        if self.kind.is_operator() {
            scheduler.whole(input, move |feed| self.operate(feed))
        } else {
            scheduler.each(input, move |item| self.process_item(item))
        }
    }
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipe")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("options", &self.options)
            .field("overrides", &self.overrides)
            .finish_non_exhaustive()
    }
}
