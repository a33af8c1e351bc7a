//! Stage 6: enhance the scene source with fetched images.

use super::{write_artifact, Stage};
use crate::context::{JobContext, LayoutHint};
use crate::errors::StageError;
use crate::registry::{StageDescriptor, REGISTRY};
use async_trait::async_trait;
use tracing::info;

/// Appends an `assets` block of image directives to the base script,
/// applying layout hints where present. With no images, the base script
/// passes through unchanged.
pub struct EnhanceScript;

impl EnhanceScript {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for EnhanceScript {
    fn default() -> Self {
        Self::new()
    }
}

fn hint_for(hints: &[LayoutHint], slide_no: u32) -> Option<&LayoutHint> {
    hints.iter().find(|h| h.slide_no == slide_no)
}

#[async_trait]
impl Stage for EnhanceScript {
    fn descriptor(&self) -> &'static StageDescriptor {
        &REGISTRY[6]
    }

    async fn execute(&self, ctx: &mut JobContext) -> Result<(), StageError> {
        if ctx.base_script.trim().is_empty() {
            return Err(StageError::format("no base script to enhance"));
        }

        if ctx.images.is_empty() {
            info!(job = %ctx.job_id, "no images fetched, passing base script through");
            ctx.enhanced_script = ctx.base_script.clone();
            return Ok(());
        }

        let mut block = String::from("\nassets {\n");
        for asset in &ctx.images {
            let (pos, scale) = match hint_for(&ctx.layout_hints, asset.slide_no) {
                Some(hint) => ((hint.img_pos[0], hint.img_pos[1]), hint.img_scale),
                None => ((3.0, 0.0), 0.8),
            };
            block.push_str(&format!(
                "  image \"{}\" slide {} at ({}, {}) scale {}\n",
                asset.path.display(),
                asset.slide_no,
                pos.0,
                pos.1,
                scale
            ));
        }
        block.push_str("}\n");

        info!(job = %ctx.job_id, images = ctx.images.len(), "scene enhanced with assets");
        ctx.enhanced_script = format!("{}{block}", ctx.base_script);
        write_artifact(
            &ctx.file("enhanced_script.src"),
            ctx.enhanced_script.as_bytes(),
        )
        .await?;
        Ok(())
    }

    fn fallback(&self, ctx: &mut JobContext) {
        ctx.enhanced_script = ctx.base_script.clone();
    }
}
