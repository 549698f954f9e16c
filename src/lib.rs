//! Postgres Retry Transaction Module
//!
//! This module runs a list of operations inside one PostgreSQL transaction and
//! retries the whole list on failure, rolling back between attempts.
//! It isolates the retry and rollback control flow from the code doing the work.

pub mod config;
pub mod context;
pub mod contract;
pub mod error;
mod recover;
pub mod retry;
pub mod transaction;

pub use config::{Config, DEFAULT_GRACE_PERIOD};
pub use context::{Context, ContextError};
pub use contract::{Pool, Tx};
pub use error::{TransactionError, TransactionResult};
pub use retry::{DelayMethod, Retry};
pub use transaction::{step, with_transaction, RetryTransaction, Step, StepFuture};
