//! Scheduling models.
//!
//! [`Pipe::apply`](crate::dispatch::Pipe::apply) is written once against
//! [`Scheduler`]; the two implementations decide how the work is run.
//!
//! ```text
//!              each (processor)              whole (operator)         fan_in (sources)
//! Blocking     lazy flat_map | pool map      lazy, on the caller      chain | pool map
//! Cooperative  serial | bounded | gather     spawn_blocking           serial | bounded | gather
//! ```

use futures::stream::{self, BoxStream, StreamExt};
use std::iter;
use std::sync::Arc;
use tracing::debug;

use super::coop::{bounded_map, collect, gather, serial_map};
use super::pool::WorkerPool;
use super::{estimate_length, DEFAULT_MULTIPLIER};
use crate::dispatch::{AsyncFeed, Feed};
use crate::error::{ConcurrencyResult, PipeResult};
use crate::record::Record;

/// Deferred source fetch used by [`Scheduler::fan_in`].
pub type SourceTask = Box<dyn FnOnce() -> PipeResult<Feed> + Send>;

/// How a chain runs its pipes.
pub trait Scheduler: Clone + Send + Sync + 'static {
    /// Stream type flowing between pipes.
    type Stream: Send + 'static;

    fn from_records(&self, records: Vec<Record>) -> Self::Stream;

    /// Apply an item-wise step to every item.
    fn each<F>(&self, input: Self::Stream, f: F) -> Self::Stream
    where
        F: Fn(Record) -> PipeResult<Feed> + Send + Sync + 'static;

    /// Apply a stream-wise step to the whole stream.
    fn whole<F>(&self, input: Self::Stream, f: F) -> Self::Stream
    where
        F: FnOnce(Feed) -> PipeResult<Feed> + Send + 'static;

    /// Run every source and merge their output.
    fn fan_in(&self, sources: Vec<SourceTask>) -> Self::Stream;
}

/// A failed step becomes one error item.
fn expand(result: PipeResult<Feed>) -> Feed {
    match result {
        Ok(feed) => feed,
        Err(err) => Box::new(iter::once(Err(err))),
    }
}

fn flatten_joined(joined: ConcurrencyResult<Vec<PipeResult<Record>>>) -> Vec<PipeResult<Record>> {
    match joined {
        Ok(items) => items,
        Err(err) => vec![Err(err.into())],
    }
}

// =============================================================================
// Blocking
// =============================================================================

/// Plain iterators, optionally fanned out over a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct Blocking {
    parallel: bool,
    ordered: bool,
    multiplier: usize,
    pool: Option<WorkerPool>,
}

impl Default for Blocking {
    fn default() -> Self {
        Self {
            parallel: false,
            ordered: false,
            multiplier: DEFAULT_MULTIPLIER,
            pool: None,
        }
    }
}

impl Blocking {
    pub fn sequential() -> Self {
        Self::default()
    }

    /// Run processors and sources on a worker pool; results arrive unordered
    /// unless [`Blocking::ordered`] is set.
    pub fn parallel() -> Self {
        Self {
            parallel: true,
            ..Self::default()
        }
    }

    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    pub fn multiplier(mut self, multiplier: usize) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    /// Reuse one pool for every stage; the caller shuts it down.
    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.parallel = true;
        self.pool = Some(pool);
        self
    }

    pub fn pool(&self) -> Option<&WorkerPool> {
        self.pool.as_ref()
    }

    /// Map on the shared pool, or on a pool sized for this stage and
    /// released afterwards.
    fn pool_map<T, F>(&self, len: usize, items: Vec<T>, f: F, ordered: bool) -> Feed
    where
        T: Send,
        F: Fn(T) -> Vec<PipeResult<Record>> + Send + Sync,
    {
        let (pool, owned) = match &self.pool {
            Some(pool) => (pool.clone(), false),
            None => match WorkerPool::sized(len, self.multiplier) {
                Ok(pool) => (pool, true),
                Err(err) => return Box::new(iter::once(Err(err.into()))),
            },
        };

        let results = pool.map(items, f, ordered);
        if owned {
            pool.shutdown();
        }
        Box::new(results.into_iter().flatten())
    }
}

impl Scheduler for Blocking {
    type Stream = Feed;

    fn from_records(&self, records: Vec<Record>) -> Feed {
        Box::new(records.into_iter().map(Ok))
    }

    fn each<F>(&self, input: Feed, f: F) -> Feed
    where
        F: Fn(Record) -> PipeResult<Feed> + Send + Sync + 'static,
    {
        if !self.parallel {
            return Box::new(input.flat_map(move |item| expand(item.and_then(&f))));
        }

        let scheduler = self.clone();
        Box::new(
            iter::once_with(move || {
                let len = estimate_length(&input);
                let items: Vec<PipeResult<Record>> = input.collect();
                debug!(estimated = len, items = items.len(), "parallel map");
                scheduler.pool_map(
                    len.max(items.len()),
                    items,
                    |item| expand(item.and_then(&f)).collect(),
                    scheduler.ordered,
                )
            })
            .flatten(),
        )
    }

    fn whole<F>(&self, input: Feed, f: F) -> Feed
    where
        F: FnOnce(Feed) -> PipeResult<Feed> + Send + 'static,
    {
        Box::new(iter::once_with(move || expand(f(input))).flatten())
    }

    fn fan_in(&self, sources: Vec<SourceTask>) -> Feed {
        if !self.parallel {
            return Box::new(sources.into_iter().flat_map(|task| expand(task())));
        }

        let scheduler = self.clone();
        Box::new(
            iter::once_with(move || {
                let len = sources.len();
                // sources are merged in completion order
                scheduler.pool_map(len, sources, |task: SourceTask| expand(task()).collect(), false)
            })
            .flatten(),
        )
    }
}

// =============================================================================
// Cooperative
// =============================================================================

/// tokio tasks and `futures` streams.
///
/// Serial by default. In parallel mode a connection limit bounds the number
/// of tasks in flight; without one every item is started at once.
#[derive(Debug, Clone, Default)]
pub struct Cooperative {
    parallel: bool,
    ordered: bool,
    connections: Option<usize>,
}

impl Cooperative {
    pub fn serial() -> Self {
        Self::default()
    }

    pub fn parallel() -> Self {
        Self {
            parallel: true,
            ..Self::default()
        }
    }

    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    pub fn connections(mut self, limit: usize) -> Self {
        self.connections = Some(limit.max(1));
        self
    }

    fn dispatch<T, F>(&self, input: BoxStream<'static, T>, run: F, ordered: bool) -> AsyncFeed
    where
        T: Send + 'static,
        F: Fn(T) -> Vec<PipeResult<Record>> + Send + Sync + 'static,
    {
        match (self.parallel, self.connections) {
            (false, _) => serial_map(input, run).flat_map(stream::iter).boxed(),
            (true, Some(limit)) => bounded_map(input, limit, ordered, run)
                .flat_map(|joined| stream::iter(flatten_joined(joined)))
                .boxed(),
            (true, None) => stream::once(async move {
                let items = collect(input).await;
                gather(items, run).await
            })
            .flat_map(|joined| {
                stream::iter(match joined {
                    Ok(groups) => groups.into_iter().flatten().collect(),
                    Err(err) => vec![Err(err.into())],
                })
            })
            .boxed(),
        }
    }
}

impl Scheduler for Cooperative {
    type Stream = AsyncFeed;

    fn from_records(&self, records: Vec<Record>) -> AsyncFeed {
        stream::iter(records.into_iter().map(Ok)).boxed()
    }

    fn each<F>(&self, input: AsyncFeed, f: F) -> AsyncFeed
    where
        F: Fn(Record) -> PipeResult<Feed> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let run = move |item: PipeResult<Record>| expand(item.and_then(|r| f(r))).collect::<Vec<_>>();
        self.dispatch(input, run, self.ordered)
    }

    fn whole<F>(&self, input: AsyncFeed, f: F) -> AsyncFeed
    where
        F: FnOnce(Feed) -> PipeResult<Feed> + Send + 'static,
    {
        stream::once(async move {
            let items = collect(input).await;
            let feed: Feed = Box::new(items.into_iter());
            tokio::task::spawn_blocking(move || expand(f(feed)).collect::<Vec<_>>()).await
        })
        .flat_map(|joined| stream::iter(flatten_joined(joined.map_err(Into::into))))
        .boxed()
    }

    fn fan_in(&self, sources: Vec<SourceTask>) -> AsyncFeed {
        let run = |task: SourceTask| expand(task()).collect::<Vec<_>>();
        self.dispatch(stream::iter(sources).boxed(), run, false)
    }
}
