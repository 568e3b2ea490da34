//! Concurrency adapter.
//!
//! Parallel map, cooperative reduce and gather, each with a blocking and a
//! cooperative implementation behind the same contract:
//!
//! - `pool`: rayon [`WorkerPool`] (explicit handle, explicit shutdown)
//! - `coop`: tokio helpers (`bounded_map`, `gather`, `serial_map`, `coop_reduce`)
//! - `scheduler`: the [`Scheduler`] trait, [`Blocking`] and [`Cooperative`]
//!
//! Pool sizing only ever uses an estimate of the stream length; it never
//! affects results.

pub mod coop;
pub mod pool;
pub mod scheduler;

pub use coop::{bounded_map, coop_reduce, gather, reduce, serial_map};
pub use pool::WorkerPool;
pub use scheduler::{Blocking, Cooperative, Scheduler, SourceTask};

use std::num::NonZeroUsize;
use std::thread::available_parallelism;

/// Length assumed when a stream gives no hint.
pub const DEFAULT_LENGTH: usize = 50;

/// Workers per CPU.
pub const DEFAULT_MULTIPLIER: usize = 2;

/// Best guess at how many items an iterator will yield.
///
/// Exact size when the iterator knows it, else its size hint, else
/// [`DEFAULT_LENGTH`].
pub fn estimate_length<I>(iter: &I) -> usize
where
    I: Iterator + ?Sized,
{
    match iter.size_hint() {
        (lower, Some(upper)) if lower == upper => upper,
        (_, Some(upper)) if upper > 0 => upper,
        (lower, None) if lower > 0 => lower,
        _ => DEFAULT_LENGTH,
    }
}

/// `min(len, cpus * multiplier)`, at least one.
pub fn worker_count(len: usize, multiplier: usize) -> usize {
    let cpus = available_parallelism().map(NonZeroUsize::get).unwrap_or(1);
    len.min(cpus * multiplier.max(1)).max(1)
}

/// `max(1, len / (workers * 4))`.
pub fn chunk_size(len: usize, workers: usize) -> usize {
    (len / (workers.max(1) * 4)).max(1)
}
