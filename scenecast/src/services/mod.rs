//! External service capabilities.
//!
//! Every collaborator outside the engine (language model, image search,
//! HTTP fetch, speech synthesis, animation rendering, media tooling) is a
//! trait-style capability chosen at engine construction time. Switching a
//! provider is a configuration change, not a code change.

pub mod image_search;
pub mod llm;
pub mod media;
pub mod renderer;
pub mod tts;

pub use image_search::{HttpMediaFetcher, SerpImageSearch};
pub use llm::HttpLanguageModel;
pub use media::FfmpegToolkit;
pub use renderer::SubprocessRenderer;
pub use tts::HttpSpeechSynthesizer;

use crate::config::RenderQuality;
use crate::errors::StageError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A prompt sent to the language model.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// The full prompt text.
    pub prompt: String,
    /// Completion budget in tokens.
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
        }
    }
}

/// A completion returned by the language model.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Generated text.
    pub text: String,
    /// Prompt tokens consumed.
    pub input_tokens: u64,
    /// Completion tokens produced.
    pub output_tokens: u64,
}

/// Text-completion capability (stages 2, 3, 4, 8).
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Completes a prompt, reporting token usage.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, StageError>;
}

/// Image search capability (stage 5).
#[async_trait]
pub trait ImageSearch: Send + Sync {
    /// Returns image URLs for a query, best match first.
    async fn search(&self, query: &str) -> Result<Vec<String>, StageError>;
}

/// Raw byte fetch capability (stage 5).
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetches the bytes behind a URL.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StageError>;
}

/// Speech synthesis capability (stage 9).
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesises speech for `text` into `out`.
    async fn synthesise(&self, text: &str, voice: &str, out: &Path) -> Result<(), StageError>;
}

/// Animation rendering capability (stage 7).
///
/// Implementations spawn the renderer as a subprocess; dropping the
/// returned future must terminate the child promptly (cancellation is
/// propagated by dropping).
#[async_trait]
pub trait AnimationRenderer: Send + Sync {
    /// Renders `script` at `quality`, producing a video under `media_dir`.
    /// Returns the path of the produced video file.
    async fn render(
        &self,
        script: &Path,
        quality: RenderQuality,
        media_dir: &Path,
    ) -> Result<PathBuf, StageError>;
}

/// Probe result for a media file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    /// Container duration in seconds.
    pub duration_secs: f64,
    /// Whether an audio stream is present.
    pub has_audio: bool,
}

/// Audio/video tooling capability (stages 9, 10, and the pre-merge gate).
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Probes duration and stream layout.
    async fn probe(&self, path: &Path) -> Result<MediaInfo, StageError>;

    /// Concatenates audio clips, in order, into `out`.
    async fn concat_audio(&self, clips: &[PathBuf], out: &Path) -> Result<(), StageError>;

    /// Pads `input` with trailing silence up to `target_secs`.
    async fn pad_audio(&self, input: &Path, target_secs: f64, out: &Path)
        -> Result<(), StageError>;

    /// Trims `input` down to `target_secs`.
    async fn trim_audio(
        &self,
        input: &Path,
        target_secs: f64,
        out: &Path,
    ) -> Result<(), StageError>;

    /// Muxes `video` and `audio` into `out` with an explicit audio stream.
    async fn mux(&self, video: &Path, audio: &Path, out: &Path) -> Result<(), StageError>;
}

/// The bundle of capabilities the engine is constructed with.
#[derive(Clone)]
pub struct ServiceSet {
    /// Language model (stages 2, 3, 4, 8).
    pub llm: Arc<dyn LanguageModel>,
    /// Image search (stage 5).
    pub image_search: Arc<dyn ImageSearch>,
    /// Byte fetch (stage 5).
    pub fetcher: Arc<dyn MediaFetcher>,
    /// Speech synthesis (stage 9).
    pub tts: Arc<dyn SpeechSynthesizer>,
    /// Animation renderer (stage 7).
    pub renderer: Arc<dyn AnimationRenderer>,
    /// Audio/video tooling (stages 9, 10, gate).
    pub media: Arc<dyn MediaToolkit>,
}
