use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

use postgres_tx_retry::{step, Context, Pool, Step, TransactionError, TransactionResult, Tx};

/// Shared call counter for steps and fakes.
#[derive(Clone, Default)]
pub struct Counter(Arc<RwLock<usize>>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counter and returns the new value.
    pub fn incr(&self) -> usize {
        let mut count = self.0.write();
        *count += 1;
        *count
    }

    pub fn get(&self) -> usize {
        *self.0.read()
    }
}

/// Records every lifecycle call made against the fake database.
#[derive(Default)]
pub struct Calls {
    begins: Counter,
    commits: Counter,
    rollbacks: Counter,
    // Whether the context handed to each rollback was still live.
    rollback_contexts: RwLock<Vec<bool>>,
}

/// In-memory stand-in for a connection pool.
pub struct FakePool {
    calls: Arc<Calls>,
    failing_begins: RwLock<usize>,
    commit_fails: bool,
    rollback_fails: bool,
    cancel_on_begin: Option<Context>,
}

impl FakePool {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Calls::default()),
            failing_begins: RwLock::new(0),
            commit_fails: false,
            rollback_fails: false,
            cancel_on_begin: None,
        }
    }

    /// The first `count` begins fail.
    pub fn failing_begins(mut self, count: usize) -> Self {
        self.failing_begins = RwLock::new(count);
        self
    }

    pub fn failing_commits(mut self) -> Self {
        self.commit_fails = true;
        self
    }

    pub fn failing_rollbacks(mut self) -> Self {
        self.rollback_fails = true;
        self
    }

    /// Cancels `ctx` while the transaction is being opened.
    pub fn cancelling_on_begin(mut self, ctx: &Context) -> Self {
        self.cancel_on_begin = Some(ctx.clone());
        self
    }

    pub fn begins(&self) -> usize {
        self.calls.begins.get()
    }

    pub fn commits(&self) -> usize {
        self.calls.commits.get()
    }

    pub fn rollbacks(&self) -> usize {
        self.calls.rollbacks.get()
    }

    pub fn rollback_contexts(&self) -> Vec<bool> {
        self.calls.rollback_contexts.read().clone()
    }
}

#[async_trait]
impl Pool for FakePool {
    type Tx = FakeTx;

    async fn begin(&self, _ctx: &Context) -> TransactionResult<FakeTx> {
        self.calls.begins.incr();
        {
            let mut failing = self.failing_begins.write();
            if *failing > 0 {
                *failing -= 1;
                return Err(TransactionError::other("begin failed"));
            }
        }
        if let Some(ctx) = &self.cancel_on_begin {
            ctx.cancel();
        }
        Ok(FakeTx {
            calls: self.calls.clone(),
            commit_fails: self.commit_fails,
            rollback_fails: self.rollback_fails,
        })
    }
}

pub struct FakeTx {
    calls: Arc<Calls>,
    commit_fails: bool,
    rollback_fails: bool,
}

#[async_trait]
impl Tx for FakeTx {
    async fn commit(self, _ctx: &Context) -> TransactionResult<()> {
        self.calls.commits.incr();
        if self.commit_fails {
            return Err(TransactionError::other("commit failed"));
        }
        Ok(())
    }

    async fn rollback(self, ctx: &Context) -> TransactionResult<()> {
        self.calls.rollbacks.incr();
        self.calls.rollback_contexts.write().push(!ctx.is_done());
        if self.rollback_fails {
            return Err(TransactionError::other("rollback failed"));
        }
        Ok(())
    }
}

/// Builds a step that bumps `counter` and returns `outcome(call_number)`.
pub fn counted_step<F>(counter: &Counter, outcome: F) -> Step<FakeTx>
where
    F: Fn(usize) -> TransactionResult<()> + Send + Sync + 'static,
{
    let counter = counter.clone();
    step(move |_tx: &mut FakeTx| {
        let result = outcome(counter.incr());
        Box::pin(async move { result })
    })
}

/// Checks whether `needle` is the message of any error in the chain of `err`.
pub fn has_cause(err: &TransactionError, needle: &str) -> bool {
    err.contains(|e| matches!(e, TransactionError::Other(inner) if inner.to_string() == needle))
}
