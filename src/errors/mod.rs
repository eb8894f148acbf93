use thiserror::Error;

/// Typed error hierarchy for switchboard.
///
/// Use at module boundaries (store I/O, provider calls, config validation,
/// approval gates). Internal/leaf functions can continue using
/// `anyhow::Result` — the `Internal` variant allows seamless conversion via
/// the `?` operator.
#[derive(Debug, Error)]
pub enum SwitchboardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("Rate limit exceeded")]
    RateLimit { retry_after: Option<u64> },

    #[error("Authentication failed: {0}")]
    Auth(String),

    /// An inbound event was intentionally ignored by the policy engine.
    /// Not a failure — logged and dropped, never propagated as an error
    /// to the caller.
    #[error("Dropped by policy: {0}")]
    PolicyDrop(String),

    /// Delivery to the channel adapter failed but the caller asked for
    /// best-effort delivery: downgraded to a warning by the reply dispatcher.
    #[error("Transport error: {message}")]
    Transport { message: String, retryable: bool },

    #[error("Agent run failed: {0}")]
    AgentRun(String),

    #[error("Exec denied: {0}")]
    ApprovalDenied(String),

    #[error("Store corrupted: {0}")]
    StoreCorruption(String),

    #[error("Cron job error: {0}")]
    CronJob(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SwitchboardError {
    /// Whether this error is transient and the operation should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } | Self::Transport { retryable, .. } => *retryable,
            Self::RateLimit { .. } | Self::Internal(_) => true,
            Self::Auth(_)
            | Self::Config(_)
            | Self::PolicyDrop(_)
            | Self::AgentRun(_)
            | Self::ApprovalDenied(_)
            | Self::StoreCorruption(_)
            | Self::CronJob(_) => false,
        }
    }
}
