use async_trait::async_trait;
use sqlx::{Database, Transaction};
use std::future::Future;

use crate::context::Context;
use crate::error::TransactionResult;

/// A source of database transactions.
///
/// Implemented for every [`sqlx::Pool`], so a `PgPool` works out of the box;
/// tests substitute their own implementation to observe begin, commit and
/// rollback calls.
#[async_trait]
pub trait Pool: Send + Sync {
    type Tx: Tx;

    /// Begin a new transaction. The context aborts the call when it is done.
    async fn begin(&self, ctx: &Context) -> TransactionResult<Self::Tx>;
}

/// An open transaction, consumed by exactly one of commit or rollback.
#[async_trait]
pub trait Tx: Send {
    async fn commit(self, ctx: &Context) -> TransactionResult<()>;

    async fn rollback(self, ctx: &Context) -> TransactionResult<()>;
}

/// Races a driver call against the context.
async fn guarded<T, F>(ctx: &Context, fut: F) -> TransactionResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    if let Some(err) = ctx.err() {
        return Err(err.into());
    }
    tokio::select! {
        res = fut => Ok(res?),
        err = ctx.done() => Err(err.into()),
    }
}

#[async_trait]
impl<DB: Database> Pool for sqlx::Pool<DB> {
    type Tx = Transaction<'static, DB>;

    async fn begin(&self, ctx: &Context) -> TransactionResult<Self::Tx> {
        guarded(ctx, sqlx::Pool::begin(self)).await
    }
}

#[async_trait]
impl<DB: Database> Tx for Transaction<'static, DB> {
    async fn commit(self, ctx: &Context) -> TransactionResult<()> {
        guarded(ctx, Transaction::commit(self)).await
    }

    async fn rollback(self, ctx: &Context) -> TransactionResult<()> {
        guarded(ctx, Transaction::rollback(self)).await
    }
}
