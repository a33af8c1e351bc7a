//! Stage 4: plan image searches and slide layouts.

use super::extract::fenced_blocks;
use super::{write_artifact, Stage};
use crate::context::{ImageQuery, JobContext, LayoutHint};
use crate::errors::StageError;
use crate::prompts;
use crate::registry::{StageDescriptor, REGISTRY};
use crate::services::{CompletionRequest, LanguageModel};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

const MAX_TOKENS: u32 = 1000;
const SUMMARY_PREVIEW_CHARS: usize = 200;

/// Plans image-search queries paired with layout hints via the language
/// model. The first JSON block is the image plan, the second the layouts;
/// a malformed layouts block degrades to no hints rather than failing.
pub struct PlanImages {
    llm: Arc<dyn LanguageModel>,
}

impl PlanImages {
    /// Creates the stage.
    #[must_use]
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

fn preview(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }
    let mut end = max_chars;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[async_trait]
impl Stage for PlanImages {
    fn descriptor(&self) -> &'static StageDescriptor {
        &REGISTRY[4]
    }

    async fn execute(&self, ctx: &mut JobContext) -> Result<(), StageError> {
        let script_summary = format!(
            "Scene plan with {} slides. Summary: {}",
            ctx.timings.len(),
            preview(&ctx.summary, SUMMARY_PREVIEW_CHARS)
        );
        let prompt = prompts::image_plan_prompt(&ctx.style_prompt, &script_summary);
        let completion = self
            .llm
            .complete(CompletionRequest::new(prompt, MAX_TOKENS))
            .await?;

        ctx.tokens
            .record(4, completion.input_tokens, completion.output_tokens);

        let blocks = fenced_blocks(&completion.text, "json");

        let plan: Vec<ImageQuery> = match blocks.first() {
            Some(block) => serde_json::from_str(block)
                .map_err(|e| StageError::format(format!("image plan did not parse: {e}")))?,
            None => Vec::new(),
        };

        let layouts: Vec<LayoutHint> = match blocks.get(1) {
            Some(block) => serde_json::from_str(block).unwrap_or_else(|e| {
                warn!(job = %ctx.job_id, "layouts block did not parse ({e}), using none");
                Vec::new()
            }),
            None => Vec::new(),
        };

        info!(
            job = %ctx.job_id,
            images = plan.len(),
            layouts = layouts.len(),
            "image plan synthesised"
        );

        ctx.image_plan = plan;
        ctx.layout_hints = layouts;

        let images_json = serde_json::to_vec_pretty(&ctx.image_plan)
            .map_err(|e| StageError::format(e.to_string()))?;
        write_artifact(&ctx.file("images.json"), &images_json).await?;
        let layouts_json = serde_json::to_vec_pretty(&ctx.layout_hints)
            .map_err(|e| StageError::format(e.to_string()))?;
        write_artifact(&ctx.file("layouts.json"), &layouts_json).await?;
        Ok(())
    }

    fn fallback(&self, ctx: &mut JobContext) {
        ctx.image_plan = Vec::new();
        ctx.layout_hints = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::testing::mocks::MockLanguageModel;
    use uuid::Uuid;

    const GOOD_COMPLETION: &str = "\
        images.json:\n```json\n[{\"slide_no\": 1, \"search_query\": \"suspension bridge diagram\", \"alt_text\": \"bridge\"}]\n```\n\
        layouts.json:\n```json\n[{\"slide_no\": 1, \"text_pos\": [-3, 0, 0], \"text_width\": 0.6, \"img_pos\": [3, 0, 0], \"img_scale\": 0.8}]\n```";

    fn stage_with(text: &str) -> PlanImages {
        let llm = Arc::new(MockLanguageModel::new());
        llm.push_text(text);
        PlanImages::new(llm)
    }

    #[tokio::test]
    async fn test_parses_plan_and_layouts() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = JobContext::new(Uuid::new_v4(), "# Doc", tmp.path());
        ctx.summary = "Bridges.".to_string();

        stage_with(GOOD_COMPLETION).execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.image_plan.len(), 1);
        assert_eq!(ctx.image_plan[0].search_query, "suspension bridge diagram");
        assert_eq!(ctx.layout_hints.len(), 1);
        assert!(tmp.path().join("images.json").exists());
        assert!(tmp.path().join("layouts.json").exists());
    }

    #[tokio::test]
    async fn test_no_blocks_yields_empty_plan() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = JobContext::new(Uuid::new_v4(), "# Doc", tmp.path());

        stage_with("no structured output").execute(&mut ctx).await.unwrap();
        assert!(ctx.image_plan.is_empty());
        assert!(ctx.layout_hints.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_plan_is_format_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = JobContext::new(Uuid::new_v4(), "# Doc", tmp.path());

        let err = stage_with("```json\n{not an array}\n```")
            .execute(&mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Format);
    }

    #[tokio::test]
    async fn test_malformed_layouts_degrade_to_none() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = JobContext::new(Uuid::new_v4(), "# Doc", tmp.path());

        let completion = "```json\n[{\"slide_no\": 1, \"search_query\": \"q\"}]\n```\n```json\nnot json\n```";
        stage_with(completion).execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.image_plan.len(), 1);
        assert!(ctx.layout_hints.is_empty());
    }

    #[test]
    fn test_fallback_is_empty_plan() {
        let mut ctx = JobContext::new(Uuid::new_v4(), "# Doc", "/tmp/x");
        ctx.image_plan = vec![ImageQuery {
            slide_no: 1,
            search_query: "leftover".to_string(),
            alt_text: String::new(),
        }];
        PlanImages::new(Arc::new(MockLanguageModel::new())).fallback(&mut ctx);
        assert!(ctx.image_plan.is_empty());
    }
}
