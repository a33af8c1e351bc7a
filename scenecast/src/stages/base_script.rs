//! Stage 3: synthesise the base animation script and timing list.

use super::extract::{any_fenced_block, ensure_background, fenced_block, lint_scene_source};
use super::{write_artifact, Stage};
use crate::context::{JobContext, SlideTiming};
use crate::errors::StageError;
use crate::prompts;
use crate::registry::{StageDescriptor, REGISTRY};
use crate::services::{CompletionRequest, LanguageModel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const MAX_TOKENS: u32 = 2000;

/// Wire format of the timings block.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TimingsFile {
    /// Per-slide timing list.
    pub slides: Vec<SlideTiming>,
}

fn default_timings() -> Vec<SlideTiming> {
    vec![SlideTiming {
        slide_no: 1,
        duration_secs: 30.0,
        title: "Overview".to_string(),
    }]
}

/// Produces the scene source and slide timings via the language model.
pub struct SynthesiseBaseScript {
    llm: Arc<dyn LanguageModel>,
}

impl SynthesiseBaseScript {
    /// Creates the stage.
    #[must_use]
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Stage for SynthesiseBaseScript {
    fn descriptor(&self) -> &'static StageDescriptor {
        &REGISTRY[3]
    }

    async fn execute(&self, ctx: &mut JobContext) -> Result<(), StageError> {
        let prompt = prompts::base_script_prompt(&ctx.style_prompt, &ctx.summary);
        let completion = self
            .llm
            .complete(CompletionRequest::new(prompt, MAX_TOKENS))
            .await?;

        ctx.tokens
            .record(3, completion.input_tokens, completion.output_tokens);

        let script = fenced_block(&completion.text, "scene")
            .or_else(|| any_fenced_block(&completion.text))
            .ok_or_else(|| StageError::format("completion carried no scene source block"))?;

        lint_scene_source(script).map_err(StageError::syntax)?;
        let script = ensure_background(script);

        let timings = match fenced_block(&completion.text, "json") {
            Some(block) => match serde_json::from_str::<TimingsFile>(block) {
                Ok(file) if !file.slides.is_empty() => file.slides,
                Ok(_) => default_timings(),
                Err(e) => {
                    warn!(job = %ctx.job_id, "timings block did not parse ({e}), using default");
                    default_timings()
                }
            },
            None => default_timings(),
        };

        info!(
            job = %ctx.job_id,
            slides = timings.len(),
            chars = script.len(),
            "base script synthesised"
        );

        ctx.base_script = script;
        ctx.timings = timings;

        write_artifact(&ctx.file("base_script.src"), ctx.base_script.as_bytes()).await?;
        let timings_json = serde_json::to_vec_pretty(&TimingsFile {
            slides: ctx.timings.clone(),
        })
        .map_err(|e| StageError::format(format!("timings did not serialize: {e}")))?;
        write_artifact(&ctx.file("timings.json"), &timings_json).await?;
        Ok(())
    }

    fn fallback(&self, ctx: &mut JobContext) {
        ctx.base_script = prompts::SCAFFOLD_SCENE.to_string();
        ctx.timings = default_timings();
    }
}
