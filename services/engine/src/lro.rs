//! Long-running operation polling
//!
//! Providers that answer a write with "accepted, check back later" are
//! awaited here so callers see a single blocking call.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{debug, info};

/// State reported by one poll of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState<T> {
    /// Still running; retry after the provider hint or the default interval
    Pending { retry_after: Option<Duration> },
    Done(T),
}

/// Polling bounds
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub max_attempts: u32,
    pub default_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            default_interval: Duration::from_secs(5),
        }
    }
}

/// Poll until the operation completes, fails, or runs out of attempts.
pub async fn await_completion<T, F, Fut>(config: &PollConfig, mut poll: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollState<T>>>,
{
    for attempt in 0..config.max_attempts {
        match poll().await? {
            PollState::Done(value) => {
                debug!(attempt, "Operation completed");
                return Ok(value);
            }
            PollState::Pending { retry_after } => {
                if attempt % 10 == 0 {
                    info!(attempt, "Waiting for operation to complete");
                }
                sleep(retry_after.unwrap_or(config.default_interval)).await;
            }
        }
    }

    anyhow::bail!(
        "Timed out waiting for operation after {} attempts",
        config.max_attempts
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> PollConfig {
        PollConfig {
            max_attempts: 5,
            default_interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_returns_when_done() {
        let mut polls = 0;
        let value = await_completion(&fast(), || {
            polls += 1;
            let state = if polls < 3 {
                PollState::Pending { retry_after: None }
            } else {
                PollState::Done("ok")
            };
            async move { Ok::<_, anyhow::Error>(state) }
        })
        .await
        .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(polls, 3);
    }

    #[tokio::test]
    async fn test_times_out() {
        let result: Result<()> = await_completion(&fast(), || async {
            Ok::<_, anyhow::Error>(PollState::Pending {
                retry_after: Some(Duration::from_millis(1)),
            })
        })
        .await;

        assert!(result.unwrap_err().to_string().contains("Timed out"));
    }

    #[tokio::test]
    async fn test_propagates_poll_errors() {
        let result: Result<()> = await_completion(&fast(), || async {
            Err::<PollState<()>, _>(anyhow::anyhow!("operation failed"))
        })
        .await;

        assert_eq!(result.unwrap_err().to_string(), "operation failed");
    }
}
