//! Stage 8: synthesise per-slide narration.

use super::extract::json_array;
use super::{write_artifact, Stage};
use crate::context::{JobContext, NarrationLine};
use crate::errors::StageError;
use crate::prompts;
use crate::registry::{StageDescriptor, REGISTRY};
use crate::services::{CompletionRequest, LanguageModel};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

const MAX_TOKENS: u32 = 1500;

fn template_lines(ctx: &JobContext) -> Vec<NarrationLine> {
    ctx.timings
        .iter()
        .map(|slide| NarrationLine {
            slide_no: slide.slide_no,
            duration_secs: slide.duration_secs,
            text: prompts::fallback_narration(&slide.title),
        })
        .collect()
}

/// Produces narration lines via the language model. An unparseable
/// completion degrades in place to template narration derived from the
/// slide titles, as long as the model call itself succeeded.
pub struct SynthesiseNarration {
    llm: Arc<dyn LanguageModel>,
}

impl SynthesiseNarration {
    /// Creates the stage.
    #[must_use]
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Stage for SynthesiseNarration {
    fn descriptor(&self) -> &'static StageDescriptor {
        &REGISTRY[8]
    }

    async fn execute(&self, ctx: &mut JobContext) -> Result<(), StageError> {
        if ctx.timings.is_empty() {
            return Err(StageError::format("no slide timings to narrate"));
        }

        let slides_json = serde_json::to_string_pretty(&ctx.timings)
            .map_err(|e| StageError::format(e.to_string()))?;
        let images_json = if ctx.image_plan.is_empty() {
            String::new()
        } else {
            serde_json::to_string_pretty(&ctx.image_plan)
                .map_err(|e| StageError::format(e.to_string()))?
        };

        let prompt = prompts::narration_prompt(&ctx.style_prompt, &slides_json, &images_json);
        let completion = self
            .llm
            .complete(CompletionRequest::new(prompt, MAX_TOKENS))
            .await?;

        ctx.tokens
            .record(8, completion.input_tokens, completion.output_tokens);

        let lines = match json_array(&completion.text)
            .and_then(|raw| serde_json::from_str::<Vec<NarrationLine>>(&raw).ok())
        {
            Some(lines) if !lines.is_empty() => lines,
            _ => {
                warn!(
                    job = %ctx.job_id,
                    "narration completion did not parse, using template lines"
                );
                template_lines(ctx)
            }
        };

        info!(job = %ctx.job_id, lines = lines.len(), "narration synthesised");
        ctx.narration = lines;

        let narration_json = serde_json::to_vec_pretty(&ctx.narration)
            .map_err(|e| StageError::format(e.to_string()))?;
        write_artifact(&ctx.file("narration.json"), &narration_json).await?;
        Ok(())
    }

    fn fallback(&self, ctx: &mut JobContext) {
        ctx.narration = template_lines(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SlideTiming;
    use crate::testing::mocks::MockLanguageModel;
    use uuid::Uuid;

    fn ctx_with_timings(dir: &std::path::Path) -> JobContext {
        let mut ctx = JobContext::new(Uuid::new_v4(), "# Doc", dir);
        ctx.timings = vec![
            SlideTiming {
                slide_no: 1,
                duration_secs: 25.0,
                title: "Intro".to_string(),
            },
            SlideTiming {
                slide_no: 2,
                duration_secs: 30.0,
                title: "Load Paths".to_string(),
            },
        ];
        ctx
    }

    #[tokio::test]
    async fn test_parses_narration_array() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = ctx_with_timings(tmp.path());

        let llm = Arc::new(MockLanguageModel::new());
        llm.push_text(
            "```json\n[{\"slide_no\": 1, \"duration\": 25, \"narration_text\": \"Welcome.\"}]\n```",
        );

        SynthesiseNarration::new(llm).execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.narration.len(), 1);
        assert_eq!(ctx.narration[0].text, "Welcome.");
        assert!(tmp.path().join("narration.json").exists());
    }

    #[tokio::test]
    async fn test_bare_json_array_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = ctx_with_timings(tmp.path());

        let llm = Arc::new(MockLanguageModel::new());
        llm.push_text(r#"[{"slide_no": 1, "duration": 25, "narration_text": "Hi."}]"#);

        SynthesiseNarration::new(llm).execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.narration[0].text, "Hi.");
    }

    #[tokio::test]
    async fn test_unparseable_completion_uses_templates() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = ctx_with_timings(tmp.path());

        let llm = Arc::new(MockLanguageModel::new());
        llm.push_text("I cannot produce JSON today.");

        SynthesiseNarration::new(llm).execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.narration.len(), 2);
        assert!(ctx.narration[0].text.contains("Intro"));
        assert!(ctx.narration[1].text.contains("Load Paths"));
    }

    #[tokio::test]
    async fn test_no_timings_is_format_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = JobContext::new(Uuid::new_v4(), "# Doc", tmp.path());

        let err = SynthesiseNarration::new(Arc::new(MockLanguageModel::new()))
            .execute(&mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::Format);
    }

    #[test]
    fn test_fallback_derives_from_timings() {
        let mut ctx = ctx_with_timings(std::path::Path::new("/tmp/x"));
        SynthesiseNarration::new(Arc::new(MockLanguageModel::new())).fallback(&mut ctx);
        assert_eq!(ctx.narration.len(), 2);
        assert!((ctx.narration[1].duration_secs - 30.0).abs() < f64::EPSILON);
    }
}
