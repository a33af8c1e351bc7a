//! Stage 1: validate and normalise the Markdown input.

use super::{write_artifact, Stage};
use crate::context::JobContext;
use crate::errors::StageError;
use crate::registry::{StageDescriptor, REGISTRY};
use async_trait::async_trait;
use tracing::warn;

/// Minimum accepted input length, in characters.
const MIN_CHARS: usize = 10;

/// Rejects unusable inputs and truncates oversized ones. This stage has no
/// fallback: a rejected input is fatal.
pub struct ValidateInput {
    max_chars: usize,
}

impl ValidateInput {
    /// Creates the stage with the configured truncation limit.
    #[must_use]
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

/// Truncates to at most `max_chars` bytes without splitting a character.
fn truncate_on_boundary(text: &mut String, max_chars: usize) {
    if text.len() <= max_chars {
        return;
    }
    let mut end = max_chars;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

#[async_trait]
impl Stage for ValidateInput {
    fn descriptor(&self) -> &'static StageDescriptor {
        &REGISTRY[1]
    }

    async fn execute(&self, ctx: &mut JobContext) -> Result<(), StageError> {
        if ctx.markdown.trim().len() < MIN_CHARS {
            return Err(StageError::format(format!(
                "markdown input too short (min {MIN_CHARS} chars)"
            )));
        }

        if ctx.markdown.len() > self.max_chars {
            warn!(
                job = %ctx.job_id,
                from = ctx.markdown.len(),
                to = self.max_chars,
                "truncating markdown input"
            );
            truncate_on_boundary(&mut ctx.markdown, self.max_chars);
        }

        write_artifact(&ctx.file("input.md"), ctx.markdown.as_bytes()).await?;
        Ok(())
    }
}
