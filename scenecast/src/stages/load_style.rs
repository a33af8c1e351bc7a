//! Stage 0: load the system style prompts.

use super::{write_artifact, Stage};
use crate::context::JobContext;
use crate::errors::StageError;
use crate::prompts;
use crate::registry::{StageDescriptor, REGISTRY};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

/// Loads the style prompt, from a configured file when one is set and from
/// the embedded default otherwise.
pub struct LoadStylePrompts {
    path: Option<PathBuf>,
}

impl LoadStylePrompts {
    /// Creates the stage.
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

#[async_trait]
impl Stage for LoadStylePrompts {
    fn descriptor(&self) -> &'static StageDescriptor {
        &REGISTRY[0]
    }

    async fn execute(&self, ctx: &mut JobContext) -> Result<(), StageError> {
        let prompt = match &self.path {
            Some(path) => {
                let text = tokio::fs::read_to_string(path).await.map_err(|e| {
                    StageError::filesystem(format!(
                        "could not read style prompt {}: {e}",
                        path.display()
                    ))
                })?;
                if text.trim().is_empty() {
                    return Err(StageError::format(format!(
                        "style prompt {} is empty",
                        path.display()
                    )));
                }
                text
            }
            None => prompts::STYLE_PROMPT.to_string(),
        };

        info!(job = %ctx.job_id, "loaded style prompt ({} chars)", prompt.len());
        ctx.style_prompt = prompt;
        write_artifact(&ctx.file("style_prompt.txt"), ctx.style_prompt.as_bytes()).await?;
        Ok(())
    }

    fn fallback(&self, ctx: &mut JobContext) {
        ctx.style_prompt = prompts::STYLE_PROMPT.to_string();
    }
}
