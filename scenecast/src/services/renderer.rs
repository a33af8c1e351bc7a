//! Subprocess animation renderer.

use super::AnimationRenderer;
use crate::config::RenderQuality;
use crate::errors::StageError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Renderer that shells out to an animation CLI.
///
/// The command shape is `<program> <quality-flag> --format mp4 --media-dir
/// <dir> <script>`; exit status conveys success. The child is spawned with
/// kill-on-drop so that cancelling the owning stage terminates it.
pub struct SubprocessRenderer {
    program: PathBuf,
}

impl SubprocessRenderer {
    /// Creates a renderer invoking `program`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

/// Returns the most recently modified file with the given extension under
/// `dir`, searching recursively.
fn newest_file_with_ext(dir: &Path, ext: &str) -> Option<PathBuf> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|e| e == ext) {
                let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                    continue;
                };
                if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
                    newest = Some((modified, path));
                }
            }
        }
    }
    newest.map(|(_, path)| path)
}

#[async_trait]
impl AnimationRenderer for SubprocessRenderer {
    async fn render(
        &self,
        script: &Path,
        quality: RenderQuality,
        media_dir: &Path,
    ) -> Result<PathBuf, StageError> {
        tokio::fs::create_dir_all(media_dir)
            .await
            .map_err(|e| StageError::filesystem(format!("could not create media dir: {e}")))?;

        debug!(
            program = %self.program.display(),
            script = %script.display(),
            quality = quality.flag(),
            "spawning renderer"
        );

        let output = tokio::process::Command::new(&self.program)
            .arg(quality.flag())
            .arg("--format")
            .arg("mp4")
            .arg("--media-dir")
            .arg(media_dir)
            .arg(script)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| StageError::filesystem(format!("renderer did not start: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(10)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(StageError::render(format!(
                "renderer exited with {:?}: {tail}",
                output.status.code()
            )));
        }

        newest_file_with_ext(media_dir, "mp4")
            .ok_or_else(|| StageError::render("renderer produced no video file"))
    }
}
