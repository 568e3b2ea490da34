//! Blocking worker pool.

use crossbeam_channel::unbounded;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;
use tracing::debug;

use super::{chunk_size, worker_count};
use crate::error::ConcurrencyResult;

/// Explicitly owned rayon pool. Clones share the same threads.
#[derive(Clone)]
pub struct WorkerPool {
    pool: Arc<ThreadPool>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> ConcurrencyResult<Self> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("pipemash-worker-{}", i))
            .build()?;
        debug!(workers, "worker pool started");
        Ok(Self {
            pool: Arc::new(pool),
            workers,
        })
    }

    /// A pool sized for `len` items: `min(len, cpus * multiplier)` workers.
    pub fn sized(len: usize, multiplier: usize) -> ConcurrencyResult<Self> {
        Self::new(worker_count(len, multiplier))
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Map `f` over `items` on the pool.
    ///
    /// Ordered results come back in input order. Unordered results come back
    /// in completion order, chunk by chunk.
    pub fn map<T, R, F>(&self, items: Vec<T>, f: F, ordered: bool) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Send + Sync,
    {
        let chunk = chunk_size(items.len(), self.workers);

        if ordered {
            return self
                .pool
                .install(|| items.into_par_iter().with_min_len(chunk).map(&f).collect());
        }

        let (tx, rx) = unbounded();
        let f = &f;
        self.pool.scope(|scope| {
            let mut items = items.into_iter();
            loop {
                let batch: Vec<T> = items.by_ref().take(chunk).collect();
                if batch.is_empty() {
                    break;
                }
                let tx = tx.clone();
                scope.spawn(move |_| {
                    for item in batch {
                        // the receiver outlives the scope
                        let _ = tx.send(f(item));
                    }
                });
            }
        });
        drop(tx);
        rx.into_iter().collect()
    }

    /// Release this handle; threads stop once the last clone is gone.
    pub fn shutdown(self) {
        debug!(workers = self.workers, shared = Arc::strong_count(&self.pool) > 1, "worker pool released");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("workers", &self.workers).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_map_keeps_input_order() {
        let pool = WorkerPool::new(4).unwrap();
        let out = pool.map((0..100).collect(), |x: i32| x * 2, true);
        assert_eq!(out, (0..100).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_unordered_map_returns_every_result() {
        let pool = WorkerPool::new(3).unwrap();
        let mut out = pool.map((0..50).collect(), |x: i32| x + 1, false);
        out.sort();
        assert_eq!(out, (1..=50).collect::<Vec<_>>());
    }

    #[test]
    fn test_sized_pool_never_exceeds_items() {
        let pool = WorkerPool::sized(1, 8).unwrap();
        assert_eq!(pool.workers(), 1);
        let empty: Vec<i32> = pool.map(Vec::new(), |x: i32| x, false);
        assert!(empty.is_empty());
        pool.shutdown();
    }
}
