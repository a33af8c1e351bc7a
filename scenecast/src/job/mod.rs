//! Durable job records and their persistence layer.

pub mod store;

use crate::context::TokenUsage;
use crate::errors::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, not yet acquired by a worker.
    Pending,
    /// Acquired; stages are executing (or the worker crashed mid-run).
    Processing,
    /// All stages complete and the pre-merge gate passed.
    Done,
    /// A fatal stage exhausted its retries, or the job was cancelled.
    Error,
    /// Muxing completed but the output is explicitly degraded.
    Degraded,
}

impl JobStatus {
    /// Stable string form used in persistence and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Error => "error",
            Self::Degraded => "degraded",
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            "degraded" => Some(Self::Degraded),
            _ => None,
        }
    }

    /// Whether this status is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Degraded)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a job's append-only error history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Stage that failed.
    pub stage: u8,
    /// Failure classification.
    pub kind: ErrorKind,
    /// Detail message.
    pub detail: String,
    /// Attempt number within the stage (1-based).
    pub retry: u32,
    /// Whether the stage's fallback was (about to be) used.
    pub fallback_used: bool,
    /// Stage index of the checkpoint restored for rollback, if any.
    pub checkpoint_restored: Option<u8>,
    /// When the failure was observed.
    pub at: DateTime<Utc>,
}

/// The durable anchor of one pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Globally unique identifier, assigned at creation.
    pub id: Uuid,
    /// Raw Markdown input as deposited.
    pub markdown: String,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Stage currently (or last) executing.
    pub current_stage: u8,
    /// Set of completed stage indices, in completion order.
    pub stages_completed: Vec<u8>,
    /// Final output path, set only on terminal success or degraded success.
    pub output_path: Option<std::path::PathBuf>,
    /// Cumulative token counters.
    pub tokens: TokenUsage,
    /// Ordered, append-only error history.
    pub errors: Vec<ErrorRecord>,
    /// Job-wide retry counter.
    pub total_retries: u32,
    /// Whether the degraded flag was set during the run.
    pub degraded: bool,
    /// Claim lease held by the worker currently processing the job;
    /// cleared on terminal transition, lapses if the worker crashes.
    #[serde(default)]
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Summary text, persisted for display.
    pub summary: Option<String>,
    /// Duration of the final video in seconds.
    pub video_duration_secs: Option<f64>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Terminal transition time.
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Creates a fresh pending record.
    #[must_use]
    pub fn new(id: Uuid, markdown: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            markdown: markdown.into(),
            status: JobStatus::Pending,
            current_stage: 0,
            stages_completed: Vec::new(),
            output_path: None,
            tokens: TokenUsage::default(),
            errors: Vec::new(),
            total_retries: 0,
            degraded: false,
            lease_expires_at: None,
            summary: None,
            video_duration_secs: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}
