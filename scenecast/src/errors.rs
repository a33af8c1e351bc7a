//! Error types for the scenecast engine.
//!
//! Stage failures are classified into a fixed taxonomy at the stage
//! boundary and carried as values; they never escape the runner as
//! panics or ad-hoc error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a stage failure.
///
/// Every failure inside a stage is mapped onto exactly one of these kinds
/// before the runner decides whether to retry, roll back, or fall back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Remote service reported capacity or auth exhaustion.
    Quota,
    /// Generated artifact fails to parse or lint as its stage requires.
    Syntax,
    /// Transient connectivity or DNS failure.
    Network,
    /// Expected file missing, unreadable, or unwritable.
    Filesystem,
    /// Remote service returned a well-formed error status.
    RemoteApi,
    /// Renderer or media subprocess exited non-zero.
    Render,
    /// Stage result violates its declared schema.
    Format,
    /// Wall-clock budget exhausted.
    Timeout,
    /// External cancellation received.
    Cancelled,
    /// Anything else.
    Unknown,
}

impl ErrorKind {
    /// Returns the stable string form used in logs and persisted records.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quota => "quota",
            Self::Syntax => "syntax",
            Self::Network => "network",
            Self::Filesystem => "filesystem",
            Self::RemoteApi => "remote-api",
            Self::Render => "render",
            Self::Format => "format",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure from a single stage attempt.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct StageError {
    /// The failure classification.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl StageError {
    /// Creates a new stage error.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a quota error.
    #[must_use]
    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Quota, message)
    }

    /// Creates a syntax error.
    #[must_use]
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    /// Creates a filesystem error.
    #[must_use]
    pub fn filesystem(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Filesystem, message)
    }

    /// Creates a remote-api error.
    #[must_use]
    pub fn remote_api(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RemoteApi, message)
    }

    /// Creates a render error.
    #[must_use]
    pub fn render(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Render, message)
    }

    /// Creates a format error.
    #[must_use]
    pub fn format(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Format, message)
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Creates an unknown error.
    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Whether the runner may retry after this error.
    ///
    /// Logical errors from a remote service (quota exhaustion, auth denial,
    /// well-formed API errors) are retried only when the stage descriptor
    /// opts in; cancellation is never retried.
    #[must_use]
    pub fn is_retryable(&self, retry_remote_errors: bool) -> bool {
        match self.kind {
            ErrorKind::Cancelled => false,
            ErrorKind::Quota | ErrorKind::RemoteApi => retry_remote_errors,
            ErrorKind::Syntax
            | ErrorKind::Network
            | ErrorKind::Filesystem
            | ErrorKind::Render
            | ErrorKind::Format
            | ErrorKind::Timeout
            | ErrorKind::Unknown => true,
        }
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        Self::filesystem(err.to_string())
    }
}

/// Errors raised by the engine façade and the persistence layers.
///
/// These are infrastructure faults, not stage failures; stage failures are
/// absorbed by the runner and surface only through the job's error history.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Job not found in the job store.
    #[error("job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Job is not in a runnable state.
    #[error("job {id} is not runnable from status '{status}'")]
    NotRunnable {
        /// The job identifier.
        id: uuid::Uuid,
        /// The status that blocked acquisition.
        status: String,
    },

    /// Job store fault.
    #[error("job store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Checkpoint or artifact serialization fault.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem fault outside stage execution.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid engine configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_serde() {
        for kind in [
            ErrorKind::Quota,
            ErrorKind::Syntax,
            ErrorKind::Network,
            ErrorKind::Filesystem,
            ErrorKind::RemoteApi,
            ErrorKind::Render,
            ErrorKind::Format,
            ErrorKind::Timeout,
            ErrorKind::Cancelled,
            ErrorKind::Unknown,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            let back: ErrorKind = serde_json::from_str(&json).unwrap();
            assert_eq!(kind, back);
            assert_eq!(json.trim_matches('"'), kind.as_str());
        }
    }

    #[test]
    fn test_transient_kinds_are_retryable() {
        assert!(StageError::network("refused").is_retryable(false));
        assert!(StageError::timeout("budget").is_retryable(false));
        assert!(StageError::render("exit 1").is_retryable(false));
        assert!(StageError::syntax("bad scene").is_retryable(false));
    }

    #[test]
    fn test_remote_kinds_respect_opt_in() {
        assert!(!StageError::quota("429").is_retryable(false));
        assert!(StageError::quota("429").is_retryable(true));
        assert!(!StageError::remote_api("500").is_retryable(false));
        assert!(StageError::remote_api("500").is_retryable(true));
    }

    #[test]
    fn test_cancelled_never_retries() {
        assert!(!StageError::cancelled("user").is_retryable(true));
    }

    #[test]
    fn test_display_includes_kind() {
        let err = StageError::quota("rate limit hit");
        assert_eq!(err.to_string(), "quota: rate limit hit");
    }
}
