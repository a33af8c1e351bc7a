//! The eleven pipeline stages.
//!
//! Each stage is a pure function of the context: it reads its declared
//! inputs, writes its declared outputs, and confines side effects to the
//! job's work directory. Fallback producers are deterministic and
//! dependency-free: they never touch the network and never fail.

pub mod extract;

mod base_script;
mod enhance_script;
mod fetch_images;
mod load_style;
mod mux;
mod narration;
mod plan_images;
mod render_video;
mod summarise;
mod synth_audio;
mod validate_input;

pub use base_script::SynthesiseBaseScript;
pub use enhance_script::EnhanceScript;
pub use fetch_images::FetchImages;
pub use load_style::LoadStylePrompts;
pub use mux::MuxAudioVideo;
pub use narration::SynthesiseNarration;
pub use plan_images::PlanImages;
pub use render_video::RenderVideo;
pub use summarise::SynthesiseSummary;
pub use synth_audio::SynthesiseAudio;
pub use validate_input::ValidateInput;

use crate::config::EngineConfig;
use crate::context::JobContext;
use crate::errors::StageError;
use crate::registry::StageDescriptor;
use crate::services::ServiceSet;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// One unit of pipeline work.
#[async_trait]
pub trait Stage: Send + Sync {
    /// The static descriptor this stage implements.
    fn descriptor(&self) -> &'static StageDescriptor;

    /// Executes the stage against the context.
    async fn execute(&self, ctx: &mut JobContext) -> Result<(), StageError>;

    /// Produces the deterministic substitute output after retries are
    /// exhausted. Only invoked for stages whose descriptor enables a
    /// fallback; must not fail and must not call external services.
    fn fallback(&self, _ctx: &mut JobContext) {}
}

/// Builds the ordered stage list the engine drives.
#[must_use]
pub fn build_stages(config: &EngineConfig, services: &ServiceSet) -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(LoadStylePrompts::new(config.style_prompt_path.clone())),
        Arc::new(ValidateInput::new(config.markdown_truncation_chars)),
        Arc::new(SynthesiseSummary::new(services.llm.clone())),
        Arc::new(SynthesiseBaseScript::new(services.llm.clone())),
        Arc::new(PlanImages::new(services.llm.clone())),
        Arc::new(FetchImages::new(
            services.image_search.clone(),
            services.fetcher.clone(),
            config.max_images,
            config.media_concurrency,
        )),
        Arc::new(EnhanceScript::new()),
        Arc::new(RenderVideo::new(
            services.renderer.clone(),
            config.render_quality_primary,
            config.render_quality_fallback,
        )),
        Arc::new(SynthesiseNarration::new(services.llm.clone())),
        Arc::new(SynthesiseAudio::new(
            services.tts.clone(),
            services.media.clone(),
            config.default_voice.clone(),
            config.media_concurrency,
        )),
        Arc::new(MuxAudioVideo::new(services.media.clone())),
    ]
}

/// Writes a work-directory artifact, classifying failures as filesystem
/// errors.
pub(crate) async fn write_artifact(path: &Path, contents: &[u8]) -> Result<(), StageError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| StageError::filesystem(format!("could not write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::mock_service_set;

    #[test]
    fn test_build_stages_matches_registry_order() {
        let config = EngineConfig::default();
        let services = mock_service_set();
        let stages = build_stages(&config, &services);

        assert_eq!(stages.len(), crate::registry::STAGE_COUNT);
        for (i, stage) in stages.iter().enumerate() {
            assert_eq!(stage.descriptor().index as usize, i);
        }
    }
}
