//! Engine configuration, loaded once at construction.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Output quality requested from the animation renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderQuality {
    /// Fastest render, lowest resolution.
    Low,
    /// Medium resolution.
    Medium,
    /// Production resolution.
    #[default]
    High,
}

impl RenderQuality {
    /// The renderer CLI flag for this quality tier.
    #[must_use]
    pub fn flag(self) -> &'static str {
        match self {
            Self::Low => "-ql",
            Self::Medium => "-qm",
            Self::High => "-qh",
        }
    }
}

/// Configuration for the pipeline engine.
///
/// All knobs are consumed once at engine construction; the running engine
/// holds no other process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on attempts for any single stage, capping the per-stage
    /// values from the registry.
    pub max_retries_per_stage: u32,
    /// Job-wide retry ceiling; exceeding it forces fatal termination.
    pub total_retry_ceiling: u32,
    /// Error count at which the job is flagged degraded.
    pub degraded_threshold: u32,
    /// Base backoff delay in seconds.
    pub backoff_base_secs: u64,
    /// Backoff delay cap in seconds.
    pub backoff_cap_secs: u64,
    /// Root directory for per-job work directories.
    pub workspace_root: PathBuf,
    /// Directory for checkpoint snapshots.
    pub checkpoint_dir: PathBuf,
    /// Job store location (sqlite path or `sqlite:` URI).
    pub job_store_uri: String,
    /// Voice identifier passed to the speech synthesiser.
    pub default_voice: String,
    /// Quality for the first render attempt.
    pub render_quality_primary: RenderQuality,
    /// Quality for the in-stage re-render after a primary failure.
    pub render_quality_fallback: RenderQuality,
    /// Markdown inputs are truncated past this many characters.
    pub markdown_truncation_chars: usize,
    /// Optional style-prompt file; the embedded default is used when unset.
    pub style_prompt_path: Option<PathBuf>,
    /// Maximum number of images fetched per job.
    pub max_images: usize,
    /// Concurrent fetches inside the image and audio stages.
    pub media_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries_per_stage: 3,
            total_retry_ceiling: 10,
            degraded_threshold: 5,
            backoff_base_secs: 2,
            backoff_cap_secs: 30,
            workspace_root: PathBuf::from("./data/work"),
            checkpoint_dir: PathBuf::from("./data/checkpoints"),
            job_store_uri: "./data/scenecast.db".to_string(),
            default_voice: "en-US-standard".to_string(),
            render_quality_primary: RenderQuality::High,
            render_quality_fallback: RenderQuality::Low,
            markdown_truncation_chars: 10_000,
            style_prompt_path: None,
            max_images: 4,
            media_concurrency: 4,
        }
    }
}

impl EngineConfig {
    /// Creates a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the workspace root.
    #[must_use]
    pub fn with_workspace_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace_root = path.into();
        self
    }

    /// Sets the checkpoint directory.
    #[must_use]
    pub fn with_checkpoint_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = path.into();
        self
    }

    /// Sets the job store location.
    #[must_use]
    pub fn with_job_store_uri(mut self, uri: impl Into<String>) -> Self {
        self.job_store_uri = uri.into();
        self
    }

    /// Sets the per-stage retry cap.
    #[must_use]
    pub fn with_max_retries_per_stage(mut self, retries: u32) -> Self {
        self.max_retries_per_stage = retries;
        self
    }

    /// Sets the job-wide retry ceiling.
    #[must_use]
    pub fn with_total_retry_ceiling(mut self, ceiling: u32) -> Self {
        self.total_retry_ceiling = ceiling;
        self
    }

    /// Sets the degraded-mode error threshold.
    #[must_use]
    pub fn with_degraded_threshold(mut self, threshold: u32) -> Self {
        self.degraded_threshold = threshold;
        self
    }

    /// Sets the backoff base and cap, in seconds.
    #[must_use]
    pub fn with_backoff(mut self, base_secs: u64, cap_secs: u64) -> Self {
        self.backoff_base_secs = base_secs;
        self.backoff_cap_secs = cap_secs;
        self
    }

    /// Sets the synthesiser voice.
    #[must_use]
    pub fn with_default_voice(mut self, voice: impl Into<String>) -> Self {
        self.default_voice = voice.into();
        self
    }

    /// Sets the render quality pair.
    #[must_use]
    pub fn with_render_qualities(mut self, primary: RenderQuality, fallback: RenderQuality) -> Self {
        self.render_quality_primary = primary;
        self.render_quality_fallback = fallback;
        self
    }

    /// Sets the Markdown truncation limit.
    #[must_use]
    pub fn with_markdown_truncation_chars(mut self, chars: usize) -> Self {
        self.markdown_truncation_chars = chars;
        self
    }

    /// Sets the style-prompt file.
    #[must_use]
    pub fn with_style_prompt_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.style_prompt_path = Some(path.into());
        self
    }

    /// Computes the backoff delay before the given attempt.
    ///
    /// The schedule is `min(cap, base * 2^(attempt - 2))` for attempt >= 2
    /// and zero for the first attempt. It is deterministic and monotone
    /// non-decreasing within a stage's retry sequence.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let exp = attempt - 2;
        let delay = self
            .backoff_base_secs
            .saturating_mul(2u64.saturating_pow(exp))
            .min(self.backoff_cap_secs);
        Duration::from_secs(delay)
    }
}
