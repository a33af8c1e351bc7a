//! The per-job execution context.
//!
//! The context is a flat record keyed by stage-output names, not a pointer
//! graph; it serializes directly and a checkpoint is exactly this record.
//! File paths inside it point into the job's work directory, which is
//! deterministic from the job identity.

use crate::gate::Checklist;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Timing for a single slide of the animation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideTiming {
    /// 1-based slide number.
    pub slide_no: u32,
    /// Slide duration in seconds.
    #[serde(rename = "duration")]
    pub duration_secs: f64,
    /// Slide title.
    pub title: String,
}

/// A planned image search, paired with the slide it illustrates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageQuery {
    /// Slide the image belongs to.
    pub slide_no: u32,
    /// Search query passed to the image search service.
    pub search_query: String,
    /// Alt text for the image.
    #[serde(default)]
    pub alt_text: String,
}

/// A layout hint for placing text and an image on one slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutHint {
    /// Slide the hint applies to.
    pub slide_no: u32,
    /// Text anchor position.
    #[serde(default = "LayoutHint::default_text_pos")]
    pub text_pos: [f32; 3],
    /// Fraction of the slide width reserved for text.
    #[serde(default = "LayoutHint::default_text_width")]
    pub text_width: f32,
    /// Image anchor position.
    #[serde(default = "LayoutHint::default_img_pos")]
    pub img_pos: [f32; 3],
    /// Image scale factor.
    #[serde(default = "LayoutHint::default_img_scale")]
    pub img_scale: f32,
}

impl LayoutHint {
    fn default_text_pos() -> [f32; 3] {
        [-3.0, 0.0, 0.0]
    }

    fn default_text_width() -> f32 {
        0.6
    }

    fn default_img_pos() -> [f32; 3] {
        [3.0, 0.0, 0.0]
    }

    fn default_img_scale() -> f32 {
        0.8
    }
}

/// A fetched, normalised image on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAsset {
    /// Slide the image belongs to.
    pub slide_no: u32,
    /// Path within the work directory.
    pub path: PathBuf,
    /// Pixel width after normalisation.
    pub width: u32,
    /// Pixel height after normalisation.
    pub height: u32,
    /// The query that produced this image.
    pub query: String,
}

/// One narration line, matched to a slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationLine {
    /// Slide the narration covers.
    pub slide_no: u32,
    /// Target spoken duration in seconds.
    #[serde(rename = "duration")]
    pub duration_secs: f64,
    /// The narration text.
    #[serde(rename = "narration_text")]
    pub text: String,
}

/// A synthesised audio clip on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioClip {
    /// Path within the work directory.
    pub path: PathBuf,
    /// Clip duration in seconds.
    pub duration_secs: f64,
}

/// A note that a stage's fallback producer was used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackNote {
    /// Stage index.
    pub stage: u8,
    /// Why the fallback was needed.
    pub reason: String,
}

/// Record of the duration repair applied before muxing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "seconds", rename_all = "snake_case")]
pub enum DurationRepair {
    /// Audio was padded with this many seconds of silence.
    PaddedAudio(f64),
    /// This many trailing seconds of audio were trimmed.
    TrimmedAudio(f64),
}

/// Cumulative LLM token counters for a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens consumed.
    pub input: u64,
    /// Completion tokens produced.
    pub output: u64,
    /// Total tokens.
    pub total: u64,
    /// Total tokens attributed per stage index.
    #[serde(default)]
    pub by_stage: BTreeMap<u8, u64>,
}

impl TokenUsage {
    /// Records usage from one LLM call made by the given stage.
    pub fn record(&mut self, stage: u8, input: u64, output: u64) {
        self.input += input;
        self.output += output;
        self.total += input + output;
        *self.by_stage.entry(stage).or_insert(0) += input + output;
    }
}

/// The transient state of a running job.
///
/// Outputs are write-once per stage within a successful run; a retry
/// replaces the failing attempt's writes by restoring the prior stage's
/// checkpoint before the next attempt begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobContext {
    /// The job this context belongs to.
    pub job_id: Uuid,
    /// The job's exclusive work directory.
    pub work_dir: PathBuf,
    /// Stage 0: system style prompt.
    #[serde(default)]
    pub style_prompt: String,
    /// Stage 1: canonical (validated, possibly truncated) Markdown.
    pub markdown: String,
    /// Stage 2: ~100-word summary.
    #[serde(default)]
    pub summary: String,
    /// Stage 3: base animation-scene source.
    #[serde(default)]
    pub base_script: String,
    /// Stage 3: per-slide timings.
    #[serde(default)]
    pub timings: Vec<SlideTiming>,
    /// Stage 4: planned image searches.
    #[serde(default)]
    pub image_plan: Vec<ImageQuery>,
    /// Stage 4: layout hints.
    #[serde(default)]
    pub layout_hints: Vec<LayoutHint>,
    /// Stage 5: fetched image assets.
    #[serde(default)]
    pub images: Vec<ImageAsset>,
    /// Stage 6: scene source enhanced with image directives.
    #[serde(default)]
    pub enhanced_script: String,
    /// Stage 7: rendered silent video.
    #[serde(default)]
    pub silent_video: Option<PathBuf>,
    /// Stage 8: narration lines.
    #[serde(default)]
    pub narration: Vec<NarrationLine>,
    /// Stage 9: synthesised audio clips.
    #[serde(default)]
    pub audio_clips: Vec<AudioClip>,
    /// Stage 9: concatenated audio track.
    #[serde(default)]
    pub audio_track: Option<PathBuf>,
    /// Stage 10: final muxed output.
    #[serde(default)]
    pub final_output: Option<PathBuf>,
    /// Cumulative token counters.
    #[serde(default)]
    pub tokens: TokenUsage,
    /// Errors observed so far (monotone).
    #[serde(default)]
    pub error_count: u32,
    /// Whether the degraded flag has been set.
    #[serde(default)]
    pub degraded: bool,
    /// Which stages fell back, and why.
    #[serde(default)]
    pub fallbacks_used: Vec<FallbackNote>,
    /// Duration repair applied before muxing, if any.
    #[serde(default)]
    pub duration_repair: Option<DurationRepair>,
    /// Pre-merge checklist, once evaluated.
    #[serde(default)]
    pub checklist: Option<Checklist>,
}

impl JobContext {
    /// Creates a fresh context bound to a work directory.
    #[must_use]
    pub fn new(job_id: Uuid, markdown: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            job_id,
            work_dir: work_dir.into(),
            style_prompt: String::new(),
            markdown: markdown.into(),
            summary: String::new(),
            base_script: String::new(),
            timings: Vec::new(),
            image_plan: Vec::new(),
            layout_hints: Vec::new(),
            images: Vec::new(),
            enhanced_script: String::new(),
            silent_video: None,
            narration: Vec::new(),
            audio_clips: Vec::new(),
            audio_track: None,
            final_output: None,
            tokens: TokenUsage::default(),
            error_count: 0,
            degraded: false,
            fallbacks_used: Vec::new(),
            duration_repair: None,
            checklist: None,
        }
    }

    /// Resolves a file name inside the work directory.
    #[must_use]
    pub fn file(&self, name: impl AsRef<Path>) -> PathBuf {
        self.work_dir.join(name)
    }

    /// The script the renderer should consume: the enhanced script when
    /// present, otherwise the base script.
    #[must_use]
    pub fn render_script(&self) -> &str {
        if self.enhanced_script.trim().is_empty() {
            &self.base_script
        } else {
            &self.enhanced_script
        }
    }
}
