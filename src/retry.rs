use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::context::Context;
use crate::error::{TransactionError, TransactionResult};

/// Strategy for computing the wait between two attempts.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayMethod {
    /// Always waits the configured delay.
    #[default]
    Standard,

    /// Waits `delay * attempt` plus a random jitter of up to half the delay.
    Incremental,

    /// Doubles the wait after every failed attempt.
    Exponential,

    /// Caller-supplied function of the attempt number and the base delay.
    #[serde(skip)]
    Custom(fn(u32, Duration) -> Duration),
}

impl DelayMethod {
    /// Wait that follows failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32, delay: Duration) -> Duration {
        match self {
            Self::Standard => delay,
            Self::Incremental => {
                let base = delay.saturating_mul(attempt);
                let half = u64::try_from(delay.as_nanos() / 2).unwrap_or(u64::MAX);
                if half == 0 {
                    return base;
                }
                let jitter = rand::thread_rng().gen_range(0..half);
                base.saturating_add(Duration::from_nanos(jitter))
            }
            Self::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                delay.saturating_mul(factor)
            }
            Self::Custom(f) => f(attempt, delay),
        }
    }
}

/// Repeats a fallible operation with a delay between failed attempts.
///
/// A [`TransactionError::Stop`] returned by the operation ends the loop
/// immediately, and cancelling the context prevents further attempts.
#[derive(Debug, Clone)]
pub struct Retry {
    pub attempts: u32,
    pub delay: Duration,
    pub method: DelayMethod,
}

impl Default for Retry {
    /// Tries only once.
    fn default() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
            method: DelayMethod::Standard,
        }
    }
}

impl Retry {
    /// Creates a policy with the standard (constant) delay method.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            ..Self::default()
        }
    }

    /// Replaces the delay growth strategy.
    pub fn with_method(mut self, method: DelayMethod) -> Self {
        self.method = method;
        self
    }

    /// Calls `f` until it succeeds, returns a stop error, runs out of
    /// attempts, or `ctx` is done. The last error is returned on failure.
    pub async fn run<F, Fut>(&self, ctx: &Context, mut f: F) -> TransactionResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TransactionResult<()>>,
    {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }

        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match f().await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            if err.is_stop() {
                tracing::debug!(attempt, error = %err, "Stop error received, giving up");
                return Err(err);
            }
            if attempt >= attempts {
                return Err(err);
            }

            let wait = self.method.delay(attempt, self.delay);
            tracing::debug!(
                attempt,
                max_attempts = attempts,
                delay_ms = wait.as_millis() as u64,
                error = %err,
                "Attempt failed, retrying"
            );

            tokio::select! {
                biased;
                cause = ctx.done() => {
                    return Err(TransactionError::merge(err, Some(cause.into())));
                }
                _ = tokio::time::sleep(wait) => {}
            }
            attempt += 1;
        }
    }
}
