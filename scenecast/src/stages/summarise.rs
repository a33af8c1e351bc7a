//! Stage 2: synthesise the ~100-word summary.

use super::{write_artifact, Stage};
use crate::context::JobContext;
use crate::errors::StageError;
use crate::prompts;
use crate::registry::{StageDescriptor, REGISTRY};
use crate::services::{CompletionRequest, LanguageModel};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

const MAX_TOKENS: u32 = 500;

/// Produces the document summary via the language model.
pub struct SynthesiseSummary {
    llm: Arc<dyn LanguageModel>,
}

impl SynthesiseSummary {
    /// Creates the stage.
    #[must_use]
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Stage for SynthesiseSummary {
    fn descriptor(&self) -> &'static StageDescriptor {
        &REGISTRY[2]
    }

    async fn execute(&self, ctx: &mut JobContext) -> Result<(), StageError> {
        let prompt = prompts::summary_prompt(&ctx.style_prompt, &ctx.markdown);
        let completion = self
            .llm
            .complete(CompletionRequest::new(prompt, MAX_TOKENS))
            .await?;

        ctx.tokens
            .record(2, completion.input_tokens, completion.output_tokens);

        let summary = completion.text.trim().to_string();
        if summary.is_empty() {
            return Err(StageError::format("model returned an empty summary"));
        }

        info!(job = %ctx.job_id, chars = summary.len(), "summary synthesised");
        ctx.summary = summary;
        write_artifact(&ctx.file("summary.txt"), ctx.summary.as_bytes()).await?;
        Ok(())
    }

    fn fallback(&self, ctx: &mut JobContext) {
        ctx.summary = prompts::FALLBACK_SUMMARY.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::testing::mocks::MockLanguageModel;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_summary_written_and_tokens_counted() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = JobContext::new(Uuid::new_v4(), "# Doc", tmp.path());
        ctx.style_prompt = "STYLE".to_string();

        let llm = Arc::new(MockLanguageModel::new());
        llm.push_text("  A crisp summary.  ");

        SynthesiseSummary::new(llm).execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.summary, "A crisp summary.");
        assert!(ctx.tokens.total > 0);
        assert_eq!(ctx.tokens.by_stage.get(&2).copied(), Some(ctx.tokens.total));
        assert!(tmp.path().join("summary.txt").exists());
    }

    #[tokio::test]
    async fn test_empty_completion_is_format_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = JobContext::new(Uuid::new_v4(), "# Doc", tmp.path());

        let llm = Arc::new(MockLanguageModel::new());
        llm.push_text("   ");

        let err = SynthesiseSummary::new(llm)
            .execute(&mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Format);
    }

    #[test]
    fn test_fallback_uses_template() {
        let mut ctx = JobContext::new(Uuid::new_v4(), "# Doc", "/tmp/x");
        SynthesiseSummary::new(Arc::new(MockLanguageModel::new())).fallback(&mut ctx);
        assert_eq!(ctx.summary, prompts::FALLBACK_SUMMARY);
    }
}
