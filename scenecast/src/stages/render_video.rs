//! Stage 7: render the silent video.

use super::{write_artifact, Stage};
use crate::config::RenderQuality;
use crate::context::JobContext;
use crate::errors::{ErrorKind, StageError};
use crate::registry::{StageDescriptor, REGISTRY};
use crate::services::AnimationRenderer;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Renders the scene source through the animation renderer.
///
/// The primary quality is tried first; a render failure triggers one
/// in-stage re-render at the fallback quality. When both fail the stage
/// fails, and, having no fallback producer, the job aborts.
pub struct RenderVideo {
    renderer: Arc<dyn AnimationRenderer>,
    primary: RenderQuality,
    fallback_quality: RenderQuality,
}

impl RenderVideo {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        renderer: Arc<dyn AnimationRenderer>,
        primary: RenderQuality,
        fallback_quality: RenderQuality,
    ) -> Self {
        Self {
            renderer,
            primary,
            fallback_quality,
        }
    }
}

#[async_trait]
impl Stage for RenderVideo {
    fn descriptor(&self) -> &'static StageDescriptor {
        &REGISTRY[7]
    }

    async fn execute(&self, ctx: &mut JobContext) -> Result<(), StageError> {
        let script = ctx.render_script();
        if script.trim().is_empty() {
            return Err(StageError::format("no scene source available to render"));
        }

        let script_path = ctx.file("render_script.src");
        write_artifact(&script_path, script.as_bytes()).await?;

        let media_dir = ctx.file("media");
        let produced = match self
            .renderer
            .render(&script_path, self.primary, &media_dir)
            .await
        {
            Ok(path) => path,
            Err(err) if err.kind == ErrorKind::Render => {
                warn!(
                    job = %ctx.job_id,
                    "render at {:?} failed ({err}), retrying at {:?}",
                    self.primary,
                    self.fallback_quality
                );
                self.renderer
                    .render(&script_path, self.fallback_quality, &media_dir)
                    .await?
            }
            Err(err) => return Err(err),
        };

        let silent = ctx.file("silent_video.mp4");
        tokio::fs::copy(&produced, &silent).await.map_err(|e| {
            StageError::filesystem(format!(
                "could not copy rendered video {}: {e}",
                produced.display()
            ))
        })?;

        info!(job = %ctx.job_id, video = %silent.display(), "silent video rendered");
        ctx.silent_video = Some(silent);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockRenderer;
    use uuid::Uuid;

    fn ctx_with_script(dir: &std::path::Path) -> JobContext {
        let mut ctx = JobContext::new(Uuid::new_v4(), "# Doc", dir);
        ctx.base_script = "scene A {\n  background white\n}\n".to_string();
        ctx
    }

    #[tokio::test]
    async fn test_renders_and_copies_video() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = ctx_with_script(tmp.path());

        let renderer = Arc::new(MockRenderer::new());
        RenderVideo::new(renderer.clone(), RenderQuality::High, RenderQuality::Low)
            .execute(&mut ctx)
            .await
            .unwrap();

        let silent = ctx.silent_video.clone().unwrap();
        assert!(silent.exists());
        assert_eq!(renderer.qualities(), vec![RenderQuality::High]);
    }

    #[tokio::test]
    async fn test_falls_back_to_low_quality_once() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = ctx_with_script(tmp.path());

        let renderer = Arc::new(MockRenderer::new());
        renderer.push_failure(StageError::render("exit 1"));

        RenderVideo::new(renderer.clone(), RenderQuality::High, RenderQuality::Low)
            .execute(&mut ctx)
            .await
            .unwrap();

        assert_eq!(
            renderer.qualities(),
            vec![RenderQuality::High, RenderQuality::Low]
        );
        assert!(ctx.silent_video.is_some());
    }

    #[tokio::test]
    async fn test_both_qualities_failing_fails_stage() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = ctx_with_script(tmp.path());

        let renderer = Arc::new(MockRenderer::new());
        renderer.push_failure(StageError::render("exit 1"));
        renderer.push_failure(StageError::render("exit 1 again"));

        let err = RenderVideo::new(renderer, RenderQuality::High, RenderQuality::Low)
            .execute(&mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Render);
        assert!(ctx.silent_video.is_none());
    }

    #[tokio::test]
    async fn test_empty_script_is_format_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = JobContext::new(Uuid::new_v4(), "# Doc", tmp.path());

        let err = RenderVideo::new(
            Arc::new(MockRenderer::new()),
            RenderQuality::High,
            RenderQuality::Low,
        )
        .execute(&mut ctx)
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Format);
    }
}
