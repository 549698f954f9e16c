use crate::context::ContextError;

/// Error type for transaction execution
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("no database connection is set")]
    EmptyDatabase,

    #[error("starting transaction: {0}")]
    BeginFailed(#[source] Box<TransactionError>),

    #[error("committing transaction: {0}")]
    CommitFailed(#[source] Box<TransactionError>),

    #[error("rolling back transaction: {0}")]
    RollbackFailed(#[source] Box<TransactionError>),

    /// A step panicked; `location` and `stack` describe the panic site.
    #[error("function caused a panic: {message}")]
    Panic {
        message: String,
        location: Option<String>,
        stack: String,
    },

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("{0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("{}", join_errors(.0))]
    Multiple(Vec<TransactionError>),

    /// Halts the retry loop regardless of the remaining attempts.
    #[error("{0}")]
    Stop(#[source] Box<TransactionError>),
}

/// Result type for transaction operations
pub type TransactionResult<T> = Result<T, TransactionError>;

fn join_errors(errors: &[TransactionError]) -> String {
    let parts: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!("{} errors occurred: [{}]", errors.len(), parts.join("; "))
}

impl TransactionError {
    /// Wraps an arbitrary error raised by a step.
    pub fn other<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Other(err.into())
    }

    /// Marks `err` as terminal: the executor rolls back and stops retrying.
    pub fn stop(err: impl Into<TransactionError>) -> Self {
        match err.into() {
            stop @ Self::Stop(_) => stop,
            err => Self::Stop(Box::new(err)),
        }
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stop(_))
    }

    /// Strips a stop marker, returning the underlying cause.
    pub fn into_cause(self) -> Self {
        match self {
            Self::Stop(inner) => inner.into_cause(),
            err => err,
        }
    }

    /// Reports whether a context cancellation or deadline is among the causes.
    pub fn is_cancellation(&self) -> bool {
        self.contains(|err| matches!(err, Self::Context(_)))
    }

    /// Walks this error and all of its causes, returning true if any matches.
    pub fn contains<F>(&self, pred: F) -> bool
    where
        F: Fn(&TransactionError) -> bool,
    {
        self.walk(&pred)
    }

    fn walk(&self, pred: &dyn Fn(&TransactionError) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        match self {
            Self::BeginFailed(inner)
            | Self::CommitFailed(inner)
            | Self::RollbackFailed(inner)
            | Self::Stop(inner) => inner.walk(pred),
            Self::Multiple(errors) => errors.iter().any(|err| err.walk(pred)),
            _ => false,
        }
    }

    /// Combines `err` with an optional follow-up error, keeping both.
    pub fn merge(err: TransactionError, other: Option<TransactionError>) -> TransactionError {
        let Some(other) = other else {
            return err;
        };
        let mut errors = match err {
            Self::Multiple(errors) => errors,
            err => vec![err],
        };
        match other {
            Self::Multiple(more) => errors.extend(more),
            other => errors.push(other),
        }
        Self::Multiple(errors)
    }
}
