//! Cooperative map, gather and reduce on tokio.
//!
//! Blocking work is moved off the scheduler with `spawn_blocking`; the
//! remaining steps yield between items so a long stream never monopolises
//! the runtime.

use futures::future::join_all;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::sync::Arc;
use tokio::task;

use crate::error::{ConcurrencyError, ConcurrencyResult};

/// Map with at most `limit` blocking tasks in flight.
pub fn bounded_map<S, T, R, F>(
    input: S,
    limit: usize,
    ordered: bool,
    f: F,
) -> BoxStream<'static, ConcurrencyResult<R>>
where
    S: Stream<Item = T> + Send + 'static,
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let tasks = input.map(move |item| {
        let f = Arc::clone(&f);
        async move { task::spawn_blocking(move || f(item)).await.map_err(ConcurrencyError::from) }
    });

    if ordered {
        tasks.buffered(limit.max(1)).boxed()
    } else {
        tasks.buffer_unordered(limit.max(1)).boxed()
    }
}

/// Start a blocking task for every item at once and wait for all of them.
///
/// Results are in input order.
pub async fn gather<T, R, F>(items: Vec<T>, f: F) -> ConcurrencyResult<Vec<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let handles = items.into_iter().map(|item| {
        let f = Arc::clone(&f);
        task::spawn_blocking(move || f(item))
    });

    join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.map_err(ConcurrencyError::from))
        .collect()
}

/// One item at a time on the calling task, yielding after each.
pub fn serial_map<S, T, R, F>(input: S, mut f: F) -> BoxStream<'static, R>
where
    S: Stream<Item = T> + Send + 'static,
    R: Send + 'static,
    F: FnMut(T) -> R + Send + 'static,
{
    input
        .then(move |item| {
            let out = f(item);
            async move {
                task::yield_now().await;
                out
            }
        })
        .boxed()
}

/// Fold a stream, yielding to the scheduler between steps.
pub async fn coop_reduce<S, T, A, F>(input: S, init: A, mut f: F) -> A
where
    S: Stream<Item = T>,
    F: FnMut(A, T) -> A,
{
    let mut input = Box::pin(input);
    let mut acc = init;
    while let Some(item) = input.next().await {
        acc = f(acc, item);
        task::yield_now().await;
    }
    acc
}

/// Blocking counterpart of [`coop_reduce`].
pub fn reduce<I, T, A, F>(items: I, init: A, f: F) -> A
where
    I: IntoIterator<Item = T>,
    F: FnMut(A, T) -> A,
{
    items.into_iter().fold(init, f)
}

/// Drain a stream into a vector, cooperatively.
pub async fn collect<S, T>(input: S) -> Vec<T>
where
    S: Stream<Item = T>,
{
    coop_reduce(input, Vec::new(), |mut acc, item| {
        acc.push(item);
        acc
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_bounded_map_ordered() {
        let out: Vec<_> = bounded_map(stream::iter(0..20), 4, true, |x: i32| x * 10).collect().await;
        let out: Vec<i32> = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(out, (0..20).map(|x| x * 10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_bounded_map_unordered_returns_everything() {
        let out: Vec<_> = bounded_map(stream::iter(0..20), 3, false, |x: i32| x).collect().await;
        let mut out: Vec<i32> = out.into_iter().map(Result::unwrap).collect();
        out.sort();
        assert_eq!(out, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_gather_propagates_task_failure() {
        let ok = gather(vec![1, 2, 3], |x: i32| x + 1).await.unwrap();
        assert_eq!(ok, vec![2, 3, 4]);

        let failed = gather(vec![1, 2], |x: i32| {
            if x == 2 {
                panic!("worker failed");
            }
            x
        })
        .await;
        assert!(matches!(failed, Err(ConcurrencyError::Join(_))));
    }

    #[tokio::test]
    async fn test_serial_map_and_reduce() {
        let mapped: Vec<i32> = serial_map(stream::iter(vec![1, 2, 3]), |x| x * x).collect().await;
        assert_eq!(mapped, vec![1, 4, 9]);

        let total = coop_reduce(stream::iter(mapped.clone()), 0, |acc, x| acc + x).await;
        assert_eq!(total, reduce(mapped, 0, |acc, x| acc + x));
    }
}
