use thiserror::Error;

/// Unified error type for the entire Mimic client.
#[derive(Error, Debug)]
pub enum MimicError {
    // ── Scheduling errors ──────────────────────────────────────
    #[error("behaviour unavailable: {0}")]
    UnavailableBehaviour(String),

    #[error("behaviour '{current}' is already running, use force to replace it")]
    Busy { current: String },

    #[error("behaviour '{behaviour}' did not stop within {timeout_ms}ms")]
    TerminationTimeout { behaviour: String, timeout_ms: u64 },

    #[error("behaviour failed: {behaviour}: {reason}")]
    Behaviour { behaviour: String, reason: String },

    #[error("behaviour manager is not running")]
    ManagerStopped,

    // ── Cleanup errors ─────────────────────────────────────────
    #[error("cleanup task failed: {label}: {reason}")]
    CleanupTask { label: String, reason: String },

    #[error("cleanup stack: {0}")]
    CleanupStack(String),

    // ── Remote control errors ──────────────────────────────────
    #[error("remote connection error: {0}")]
    RemoteConnection(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("malformed remote message: {0}")]
    MessageDecode(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl MimicError {
    /// Errors that the remote loop answers with a backoff retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MimicError::RemoteConnection(_) | MimicError::Authentication(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MimicError>;
