//! Structured fan-out
//!
//! Runs independent calls concurrently and returns both the successful
//! results and a per-item error list, so callers decide whether to log or
//! escalate partial failures.

use std::fmt::Display;
use std::future::Future;

use futures::future::join_all;
use tracing::warn;

/// Outcome of a fan-out: successes in input order plus failed items
#[derive(Debug)]
pub struct FanOut<K, T> {
    pub succeeded: Vec<T>,
    pub failed: Vec<(K, anyhow::Error)>,
}

impl<K, T> FanOut<K, T> {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl<K: Display, T> FanOut<K, T> {
    /// Log each failure at warn level and return the successes
    pub fn into_logged(self, what: &str) -> Vec<T> {
        for (key, err) in &self.failed {
            warn!(item = %key, error = %err, "{} failed", what);
        }
        self.succeeded
    }
}

/// Run `call` for every item concurrently and collect the results.
///
/// Every call runs to completion; one failure never cancels the others.
pub async fn fan_out<K, I, F, Fut, T>(items: I, call: F) -> FanOut<K, T>
where
    I: IntoIterator<Item = K>,
    K: Clone,
    F: Fn(K) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let calls = items.into_iter().map(|key| {
        let fut = call(key.clone());
        async move { (key, fut.await) }
    });

    let mut outcome = FanOut {
        succeeded: Vec::new(),
        failed: Vec::new(),
    };

    for (key, result) in join_all(calls).await {
        match result {
            Ok(value) => outcome.succeeded.push(value),
            Err(err) => outcome.failed.push((key, err)),
        }
    }

    outcome
}
