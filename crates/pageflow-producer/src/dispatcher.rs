//! Bounded exponential-backoff wrapper around a fallible write.
//!
//! Each attempt runs under its own timeout drawn from the backoff schedule
//! T₀, T₀·m, T₀·m², and so on. The growing timeout is the only pacing; no
//! sleep is inserted between attempts.

use pageflow_core::{Error, PipelineMetrics, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const DEFAULT_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_MULTIPLIER: f64 = 1.2;

/// Retrying write executor.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    attempts: u32,
    initial_timeout: Duration,
    multiplier: f64,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            initial_timeout: DEFAULT_INITIAL_TIMEOUT,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_initial_timeout(mut self, timeout: Duration) -> Self {
        self.initial_timeout = timeout;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Run `write_fn` with retries.
    ///
    /// Every attempt receives a fresh child token and runs under the current
    /// schedule timeout. Parent cancellation short-circuits with
    /// [`Error::Cancelled`]; exhausting all attempts returns
    /// [`Error::BackoffTimeout`]; otherwise the successful attempt's result
    /// is returned.
    pub async fn write<F, Fut>(&self, parent: &CancellationToken, mut write_fn: F) -> Result<()>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut attempt_timeout = self.initial_timeout;

        for attempt in 0..self.attempts {
            if parent.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let child = parent.child_token();
            let outcome = tokio::select! {
                biased;
                _ = parent.cancelled() => return Err(Error::Cancelled),
                outcome = tokio::time::timeout(attempt_timeout, write_fn(child.clone())) => outcome,
            };

            match outcome {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(err)) => {
                    warn!(attempt, error = %err, "write attempt failed");
                }
                Err(_) => {
                    child.cancel();
                    warn!(attempt, timeout = ?attempt_timeout, "write attempt timed out");
                }
            }

            if attempt + 1 < self.attempts {
                PipelineMetrics::increment_retry_attempts();
            }
            attempt_timeout = attempt_timeout.mul_f64(self.multiplier);
        }

        Err(Error::BackoffTimeout)
    }
}
