//! Bounded fan-out of asynchronous tasks.
//!
//! Tasks start in submission order, at most `max` at a time, and settle
//! independently: a failed task yields its error as a value and never
//! cancels its siblings. Completion order is not submission order.

use std::future::Future;

use futures::stream::{self, Stream, StreamExt};

/// Limits the number of concurrently running futures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyLimiter {
    max: usize,
}

impl ConcurrencyLimiter {
    /// A limiter allowing `max` tasks in flight (at least one).
    pub fn new(max: usize) -> Self {
        Self { max: max.max(1) }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Stream task outputs as they complete.
    pub fn stream<I, F>(&self, tasks: I) -> impl Stream<Item = F::Output>
    where
        I: IntoIterator<Item = F>,
        F: Future,
    {
        stream::iter(tasks).buffer_unordered(self.max)
    }

    /// Run all tasks and collect their outputs in completion order.
    pub async fn run_all<I, F>(&self, tasks: I) -> Vec<F::Output>
    where
        I: IntoIterator<Item = F>,
        F: Future,
    {
        self.stream(tasks).collect().await
    }

    /// Run fallible tasks and partition their outcomes.
    pub async fn partition<I, F, T, E>(&self, tasks: I) -> (Vec<T>, Vec<E>)
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, E>>,
    {
        let mut successes = Vec::new();
        let mut failures = Vec::new();
        for outcome in self.run_all(tasks).await {
            match outcome {
                Ok(value) => successes.push(value),
                Err(err) => failures.push(err),
            }
        }
        (successes, failures)
    }
}
