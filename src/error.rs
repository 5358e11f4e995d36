//! Crate-wide error taxonomy.
//!
//! Every component exposes a small, closed set of error *kinds* rather than
//! letting transport or parsing errors leak upward unclassified. This mirrors
//! the taxonomy an agent or the gateway needs to branch on: retry locally,
//! fall back to another model, or surface to the client.

/// Crate-wide error kind.
///
/// Components that need a more specific error (e.g. the LLM client's
/// `ModelUnavailable(model_name)`) wrap this via [`OrchestraError::ModelUnavailable`]
/// rather than inventing a parallel hierarchy.
#[derive(Debug, thiserror::Error)]
pub enum OrchestraError {
    /// A bounded operation exceeded its time budget.
    #[error("operation timed out")]
    Timeout,

    /// Network reset, DNS failure, or connection refused against a backend.
    #[error("transport error: {0}")]
    Transport(String),

    /// The requested model is not loaded or has been removed. Not retried
    /// on the same model; triggers fallback at the agent boundary.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Client input out of range. Surfaced as 422 at the gateway; never
    /// reaches the orchestration core.
    #[error("validation error: {0}")]
    Validation(String),

    /// Originated from a client disconnect or explicit interrupt. Not an
    /// error for health metrics; still terminates the session with a `done`
    /// event.
    #[error("cancelled")]
    Cancelled,

    /// Programmer bugs, invariant violations. Logged with full context; the
    /// session ends.
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestraError {
    /// Whether a client may reasonably retry this class of error.
    pub fn retryable(&self) -> bool {
        matches!(self, OrchestraError::Timeout | OrchestraError::Transport(_))
    }

    /// Short machine-readable kind tag, used in the `error` SSE payload's
    /// `kind` field (see the gateway's event schema).
    pub fn kind_tag(&self) -> &'static str {
        match self {
            OrchestraError::Timeout => "timeout",
            OrchestraError::Transport(_) => "transport",
            OrchestraError::ModelUnavailable(_) => "model_unavailable",
            OrchestraError::Validation(_) => "validation",
            OrchestraError::Cancelled => "cancelled",
            OrchestraError::Internal(_) => "internal",
        }
    }
}

impl From<reqwest::Error> for OrchestraError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            OrchestraError::Timeout
        } else {
            OrchestraError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for OrchestraError {
    fn from(e: serde_json::Error) -> Self {
        OrchestraError::Internal(format!("json: {e}"))
    }
}

impl From<tokio::time::error::Elapsed> for OrchestraError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        OrchestraError::Timeout
    }
}

/// Error returned by the connection pool (C1) specifically, kept separate
/// from [`OrchestraError`] because "not initialized" is a programmer error
/// distinct from any runtime transport failure.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("connection pool not initialized")]
    NotInitialized,
    #[error(transparent)]
    Transport(#[from] OrchestraError),
}
