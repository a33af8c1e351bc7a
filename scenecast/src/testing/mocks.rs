//! Scripted mocks for the external service capabilities.

use crate::config::RenderQuality;
use crate::errors::StageError;
use crate::services::{
    AnimationRenderer, Completion, CompletionRequest, ImageSearch, LanguageModel, MediaFetcher,
    MediaInfo, MediaToolkit, ServiceSet, SpeechSynthesizer,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Canned completion for the summary stage.
pub const SUMMARY_COMPLETION: &str =
    "A concise overview of bridge inspection procedures, covering deck, \
     superstructure, and substructure checks along with reporting duties.";

/// Canned completion for the base-script stage: scene source + timings.
pub const SCRIPT_COMPLETION: &str = "Here is the scene:\n\
```scene\n\
scene BridgeInspection {\n\
  background white\n\
  slide 1 {\n\
    title \"Bridge Inspection\"\n\
    text \"Deck, superstructure, substructure.\"\n\
    wait 30\n\
  }\n\
}\n\
```\n\
\n\
```json\n\
{\"slides\": [{\"slide_no\": 1, \"duration\": 30, \"title\": \"Bridge Inspection\"}]}\n\
```";

/// Canned completion for the image-plan stage.
pub const PLAN_COMPLETION: &str = "images.json:\n\
```json\n\
[{\"slide_no\": 1, \"search_query\": \"suspension bridge diagram\", \"alt_text\": \"bridge\"}]\n\
```\n\
layouts.json:\n\
```json\n\
[{\"slide_no\": 1, \"text_pos\": [-3, 0, 0], \"text_width\": 0.6, \"img_pos\": [3, 0, 0], \"img_scale\": 0.8}]\n\
```";

/// Canned completion for the narration stage.
pub const NARRATION_COMPLETION: &str = "```json\n\
[{\"slide_no\": 1, \"duration\": 30, \"narration_text\": \"Welcome to this overview of bridge inspection.\"}]\n\
```";

/// Encodes a white PNG of the given dimensions.
#[must_use]
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        width,
        height,
        image::Rgb([255, 255, 255]),
    ));
    let mut bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Png,
    )
    .expect("png encoding cannot fail for an in-memory buffer");
    bytes
}

// ---------------------------------------------------------------------------
// Language model
// ---------------------------------------------------------------------------

/// A language model that replays a scripted queue of responses.
#[derive(Default)]
pub struct MockLanguageModel {
    queue: Mutex<VecDeque<Result<Completion, StageError>>>,
    prompts: Mutex<Vec<String>>,
}

impl MockLanguageModel {
    /// Creates a mock with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful completion with fixed token counts.
    pub fn push_text(&self, text: impl Into<String>) {
        self.queue.lock().push_back(Ok(Completion {
            text: text.into(),
            input_tokens: 100,
            output_tokens: 50,
        }));
    }

    /// Queues an error response.
    pub fn push_error(&self, err: StageError) {
        self.queue.lock().push_back(Err(err));
    }

    /// Queues the four happy-path completions, in pipeline order.
    pub fn script_happy_path(&self) {
        self.push_text(SUMMARY_COMPLETION);
        self.push_text(SCRIPT_COMPLETION);
        self.push_text(PLAN_COMPLETION);
        self.push_text(NARRATION_COMPLETION);
    }

    /// Number of completions served (including errors).
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }

    /// The prompts received, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, StageError> {
        self.prompts.lock().push(request.prompt);
        self.queue.lock().pop_front().unwrap_or_else(|| {
            Ok(Completion {
                text: "canned response".to_string(),
                input_tokens: 10,
                output_tokens: 5,
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Image search & fetch
// ---------------------------------------------------------------------------

/// Image search returning one stable URL per query unless scripted to fail.
#[derive(Default)]
pub struct MockImageSearch {
    failures: Mutex<HashMap<String, StageError>>,
    calls: Mutex<usize>,
}

impl MockImageSearch {
    /// Creates a mock that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the given query fail with the given error.
    pub fn fail_query(&self, query: impl Into<String>, err: StageError) {
        self.failures.lock().insert(query.into(), err);
    }

    /// Number of searches performed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl ImageSearch for MockImageSearch {
    async fn search(&self, query: &str) -> Result<Vec<String>, StageError> {
        *self.calls.lock() += 1;
        if let Some(err) = self.failures.lock().get(query) {
            return Err(err.clone());
        }
        Ok(vec![format!(
            "https://images.example/{}.png",
            query.replace(' ', "-")
        )])
    }
}

/// Fetcher returning an in-memory PNG for every URL.
#[derive(Default)]
pub struct MockMediaFetcher {
    calls: Mutex<usize>,
}

impl MockMediaFetcher {
    /// Creates the mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fetches performed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl MediaFetcher for MockMediaFetcher {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, StageError> {
        *self.calls.lock() += 1;
        Ok(png_bytes(64, 48))
    }
}

// ---------------------------------------------------------------------------
// Speech synthesis
// ---------------------------------------------------------------------------

/// Synthesiser writing a small placeholder clip unless scripted to fail.
#[derive(Default)]
pub struct MockSpeechSynthesizer {
    failures: Mutex<VecDeque<StageError>>,
    calls: Mutex<usize>,
}

impl MockSpeechSynthesizer {
    /// Creates the mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call fail with the given error.
    pub fn fail_next(&self, err: StageError) {
        self.failures.lock().push_back(err);
    }

    /// Number of clips synthesised (including failures).
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSpeechSynthesizer {
    async fn synthesise(&self, _text: &str, _voice: &str, out: &Path) -> Result<(), StageError> {
        *self.calls.lock() += 1;
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        tokio::fs::write(out, b"mock-audio-bytes")
            .await
            .map_err(|e| StageError::filesystem(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renderer writing a placeholder video, with scripted per-call failures
/// and an optional artificial delay (for cancellation tests).
#[derive(Default)]
pub struct MockRenderer {
    failures: Mutex<VecDeque<StageError>>,
    qualities: Mutex<Vec<RenderQuality>>,
    delay: Mutex<Option<Duration>>,
}

impl MockRenderer {
    /// Creates the mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next render call fail with the given error.
    pub fn push_failure(&self, err: StageError) {
        self.failures.lock().push_back(err);
    }

    /// Delays every render call, so cancellation can land mid-render.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// The quality of each render call, in order.
    #[must_use]
    pub fn qualities(&self) -> Vec<RenderQuality> {
        self.qualities.lock().clone()
    }

    /// Number of render calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.qualities.lock().len()
    }
}

#[async_trait]
impl AnimationRenderer for MockRenderer {
    async fn render(
        &self,
        _script: &Path,
        quality: RenderQuality,
        media_dir: &Path,
    ) -> Result<PathBuf, StageError> {
        self.qualities.lock().push(quality);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        tokio::fs::create_dir_all(media_dir)
            .await
            .map_err(|e| StageError::filesystem(e.to_string()))?;
        let video = media_dir.join("scene.mp4");
        tokio::fs::write(&video, b"mock-video-bytes")
            .await
            .map_err(|e| StageError::filesystem(e.to_string()))?;
        Ok(video)
    }
}

// ---------------------------------------------------------------------------
// Media toolkit
// ---------------------------------------------------------------------------

/// In-process media toolkit faking durations and stream layouts.
///
/// Durations are keyed by file name; files written by toolkit operations
/// are placeholders. Every operation is recorded in an op log.
pub struct MockMediaToolkit {
    durations: Mutex<HashMap<String, f64>>,
    audio_streams: Mutex<HashSet<String>>,
    ops: Mutex<Vec<String>>,
    default_duration: f64,
}

impl Default for MockMediaToolkit {
    fn default() -> Self {
        Self::new()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl MockMediaToolkit {
    /// Creates a toolkit whose unprobed files report 30 seconds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            durations: Mutex::new(HashMap::new()),
            audio_streams: Mutex::new(HashSet::new()),
            ops: Mutex::new(Vec::new()),
            default_duration: 30.0,
        }
    }

    /// Sets the probed duration for a file name.
    pub fn set_duration(&self, name: impl Into<String>, secs: f64) {
        self.durations.lock().insert(name.into(), secs);
    }

    /// Marks a file name as carrying an audio stream.
    pub fn mark_audio_stream(&self, name: impl Into<String>) {
        self.audio_streams.lock().insert(name.into());
    }

    /// The recorded operations, in order.
    #[must_use]
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().clone()
    }

    fn duration_of(&self, path: &Path) -> f64 {
        self.durations
            .lock()
            .get(&file_name(path))
            .copied()
            .unwrap_or(self.default_duration)
    }

    async fn touch(&self, path: &Path) -> Result<(), StageError> {
        tokio::fs::write(path, b"mock-media")
            .await
            .map_err(|e| StageError::filesystem(e.to_string()))
    }
}

#[async_trait]
impl MediaToolkit for MockMediaToolkit {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, StageError> {
        Ok(MediaInfo {
            duration_secs: self.duration_of(path),
            has_audio: self.audio_streams.lock().contains(&file_name(path)),
        })
    }

    async fn concat_audio(&self, clips: &[PathBuf], out: &Path) -> Result<(), StageError> {
        let total: f64 = clips.iter().map(|c| self.duration_of(c)).sum();
        self.touch(out).await?;
        self.durations.lock().insert(file_name(out), total);
        self.ops.lock().push(format!("concat {}", file_name(out)));
        Ok(())
    }

    async fn pad_audio(
        &self,
        _input: &Path,
        target_secs: f64,
        out: &Path,
    ) -> Result<(), StageError> {
        self.touch(out).await?;
        self.durations.lock().insert(file_name(out), target_secs);
        self.ops
            .lock()
            .push(format!("pad {} {target_secs}", file_name(out)));
        Ok(())
    }

    async fn trim_audio(
        &self,
        _input: &Path,
        target_secs: f64,
        out: &Path,
    ) -> Result<(), StageError> {
        self.touch(out).await?;
        self.durations.lock().insert(file_name(out), target_secs);
        self.ops
            .lock()
            .push(format!("trim {} {target_secs}", file_name(out)));
        Ok(())
    }

    async fn mux(&self, video: &Path, audio: &Path, out: &Path) -> Result<(), StageError> {
        self.touch(out).await?;
        let video_duration = self.duration_of(video);
        let out_name = file_name(out);
        self.durations.lock().insert(out_name.clone(), video_duration);
        self.audio_streams.lock().insert(out_name.clone());
        self.ops
            .lock()
            .push(format!("mux {} {}", file_name(audio), out_name));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bundles
// ---------------------------------------------------------------------------

/// One handle per mock, plus the [`ServiceSet`] view the engine consumes.
pub struct MockServices {
    /// Scripted language model.
    pub llm: Arc<MockLanguageModel>,
    /// Scripted image search.
    pub search: Arc<MockImageSearch>,
    /// PNG-producing fetcher.
    pub fetcher: Arc<MockMediaFetcher>,
    /// Clip-writing synthesiser.
    pub tts: Arc<MockSpeechSynthesizer>,
    /// Placeholder renderer.
    pub renderer: Arc<MockRenderer>,
    /// Duration-faking media toolkit.
    pub media: Arc<MockMediaToolkit>,
}

impl Default for MockServices {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServices {
    /// Creates one of each mock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            llm: Arc::new(MockLanguageModel::new()),
            search: Arc::new(MockImageSearch::new()),
            fetcher: Arc::new(MockMediaFetcher::new()),
            tts: Arc::new(MockSpeechSynthesizer::new()),
            renderer: Arc::new(MockRenderer::new()),
            media: Arc::new(MockMediaToolkit::new()),
        }
    }

    /// The [`ServiceSet`] view over these mocks.
    #[must_use]
    pub fn service_set(&self) -> ServiceSet {
        ServiceSet {
            llm: self.llm.clone(),
            image_search: self.search.clone(),
            fetcher: self.fetcher.clone(),
            tts: self.tts.clone(),
            renderer: self.renderer.clone(),
            media: self.media.clone(),
        }
    }
}

/// A service set wired entirely to fresh mocks.
#[must_use]
pub fn mock_service_set() -> ServiceSet {
    MockServices::new().service_set()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_language_model_replays_queue() {
        let llm = MockLanguageModel::new();
        llm.push_text("first");
        llm.push_error(StageError::quota("429"));

        let first = llm
            .complete(CompletionRequest::new("p1", 100))
            .await
            .unwrap();
        assert_eq!(first.text, "first");

        let second = llm.complete(CompletionRequest::new("p2", 100)).await;
        assert!(second.is_err());
        assert_eq!(llm.call_count(), 2);
        assert_eq!(llm.prompts(), vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn test_search_failures_are_per_query() {
        let search = MockImageSearch::new();
        search.fail_query("bad", StageError::network("dns"));

        assert!(search.search("good").await.is_ok());
        assert!(search.search("bad").await.is_err());
        assert_eq!(search.call_count(), 2);
    }

    #[test]
    fn test_png_bytes_decode() {
        let bytes = png_bytes(8, 6);
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!(img.width(), 8);
        assert_eq!(img.height(), 6);
    }

    #[tokio::test]
    async fn test_media_toolkit_tracks_ops() {
        let tmp = tempfile::tempdir().unwrap();
        let media = MockMediaToolkit::new();
        media.set_duration("in.mp3", 10.0);

        let out = tmp.path().join("out.mp3");
        media
            .pad_audio(&tmp.path().join("in.mp3"), 12.0, &out)
            .await
            .unwrap();

        let info = media.probe(&out).await.unwrap();
        assert!((info.duration_secs - 12.0).abs() < f64::EPSILON);
        assert_eq!(media.ops().len(), 1);
    }

    #[tokio::test]
    async fn test_mux_marks_audio_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let media = MockMediaToolkit::new();
        let out = tmp.path().join("final.mp4");

        media
            .mux(
                &tmp.path().join("video.mp4"),
                &tmp.path().join("audio.mp3"),
                &out,
            )
            .await
            .unwrap();

        let info = media.probe(&out).await.unwrap();
        assert!(info.has_audio);
    }
}
