use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, DEFAULT_GRACE_PERIOD};
use crate::context::Context;
use crate::contract::{Pool, Tx};
use crate::error::{TransactionError, TransactionResult};
use crate::recover::{capture_panics, panic_error};
use crate::retry::Retry;

/// Future returned by a [`Step`], borrowing the open transaction.
pub type StepFuture<'a> = BoxFuture<'a, TransactionResult<()>>;

/// A unit of work run inside the open transaction.
///
/// Every step runs again on each attempt, so it must not assume that earlier
/// attempts left anything behind.
pub type Step<T> = Box<dyn for<'a> Fn(&'a mut T) -> StepFuture<'a> + Send + Sync>;

/// Boxes a closure as a [`Step`].
///
/// ```no_run
/// # use postgres_tx_retry::{step, Step, TransactionError};
/// # use sqlx::{Postgres, Transaction};
/// let create: Step<Transaction<'static, Postgres>> = step::<Transaction<'static, Postgres>, _>(|tx| {
///     Box::pin(async move {
///         sqlx::query("CREATE TABLE IF NOT EXISTS users (name TEXT)")
///             .execute(&mut **tx)
///             .await
///             .map(|_| ())
///             .map_err(TransactionError::from)
///     })
/// });
/// ```
pub fn step<T, F>(f: F) -> Step<T>
where
    F: for<'a> Fn(&'a mut T) -> StepFuture<'a> + Send + Sync + 'static,
{
    Box::new(f)
}

/// Runs a list of steps in one transaction, retrying the whole list on failure.
///
/// Each attempt begins a fresh transaction, runs the steps in order and
/// commits. The first failing step rolls the transaction back and the attempt
/// is retried according to the configured [`Retry`] policy. A step can end the
/// loop early by returning [`TransactionError::stop`].
pub struct RetryTransaction<P: Pool> {
    db: Option<Arc<P>>,
    retry: Retry,
    grace_period: Duration,
}

impl<P: Pool> RetryTransaction<P> {
    /// Create a new RetryTransaction. Fails if no connection is given.
    pub fn new(db: Option<Arc<P>>, config: Config) -> TransactionResult<Self> {
        let db = db.ok_or(TransactionError::EmptyDatabase)?;
        let mut retry = config.retry;
        retry.attempts = retry.attempts.max(1);
        Ok(Self {
            db: Some(db),
            retry,
            grace_period: config.grace_period,
        })
    }

    /// Create a RetryTransaction with the default config, trying only once.
    pub fn from_pool(pool: P) -> Self {
        Self {
            db: Some(Arc::new(pool)),
            retry: Retry::default(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Retry policy in effect, with the attempt count already normalized.
    pub fn retry_policy(&self) -> &Retry {
        &self.retry
    }

    /// Timeout of the context used for rollbacks after cancellation.
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Run `steps` in a transaction until an attempt commits, the attempts run
    /// out, a step returns a stop error, or `ctx` is done.
    pub async fn run(&self, ctx: &Context, steps: &[Step<P::Tx>]) -> TransactionResult<()> {
        let db = self.db.as_deref().ok_or(TransactionError::EmptyDatabase)?;

        let mut attempt = 0u32;
        self.retry
            .run(ctx, || {
                attempt += 1;
                run_attempt(db, ctx, steps, self.grace_period, attempt)
            })
            .await
    }
}

impl<P: Pool> Default for RetryTransaction<P> {
    /// An executor without a connection; every run fails with
    /// [`TransactionError::EmptyDatabase`].
    fn default() -> Self {
        Self {
            db: None,
            retry: Retry::default(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl<P: Pool> std::fmt::Debug for RetryTransaction<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryTransaction")
            .field("has_db", &self.db.is_some())
            .field("retry", &self.retry)
            .field("grace_period", &self.grace_period)
            .finish()
    }
}

/// Run `steps` in a single transaction without retrying.
pub async fn with_transaction<P: Pool>(
    ctx: &Context,
    db: &P,
    steps: &[Step<P::Tx>],
) -> TransactionResult<()> {
    run_attempt(db, ctx, steps, DEFAULT_GRACE_PERIOD, 1).await
}

async fn run_attempt<P: Pool>(
    db: &P,
    ctx: &Context,
    steps: &[Step<P::Tx>],
    grace_period: Duration,
    attempt: u32,
) -> TransactionResult<()> {
    tracing::debug!(attempt, steps = steps.len(), "Beginning transaction");
    let mut tx = db
        .begin(ctx)
        .await
        .map_err(|err| TransactionError::BeginFailed(Box::new(err)))?;

    for (index, step) in steps.iter().enumerate() {
        if let Some(cause) = ctx.err() {
            let grace = Context::with_timeout(grace_period);
            let rollback_err = rollback(tx, &grace, attempt).await.err();
            return Err(TransactionError::stop(TransactionError::merge(
                cause.into(),
                rollback_err,
            )));
        }

        let result = match AssertUnwindSafe(capture_panics(async { step(&mut tx).await }))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                let err = panic_error(payload);
                tracing::warn!(attempt, step = index, error = %err, "Step panicked");
                Err(err)
            }
        };

        if let Err(err) = result {
            let stop = err.is_stop() || err.is_cancellation();
            // A context cancelled by the step itself can't carry the rollback.
            let rollback_err = if ctx.is_done() {
                let grace = Context::with_timeout(grace_period);
                rollback(tx, &grace, attempt).await.err()
            } else {
                rollback(tx, ctx, attempt).await.err()
            };
            let err = TransactionError::merge(err.into_cause(), rollback_err);
            return Err(if stop {
                TransactionError::stop(err)
            } else {
                err
            });
        }
    }

    tx.commit(ctx)
        .await
        .map_err(|err| TransactionError::CommitFailed(Box::new(err)))?;
    tracing::debug!(attempt, "Transaction committed");
    Ok(())
}

async fn rollback<T: Tx>(tx: T, ctx: &Context, attempt: u32) -> TransactionResult<()> {
    match tx.rollback(ctx).await {
        Ok(()) => {
            tracing::debug!(attempt, "Transaction rolled back");
            Ok(())
        }
        Err(err) => {
            tracing::warn!(attempt, error = %err, "Rollback failed");
            Err(TransactionError::RollbackFailed(Box::new(err)))
        }
    }
}
