//! FFmpeg/ffprobe media tooling.

use super::{MediaInfo, MediaToolkit};
use crate::errors::StageError;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Media toolkit shelling out to `ffmpeg` and `ffprobe`.
pub struct FfmpegToolkit {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegToolkit {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegToolkit {
    /// Creates a toolkit with explicit binary paths.
    #[must_use]
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    async fn run_ffmpeg(&self, args: &[&std::ffi::OsStr]) -> Result<(), StageError> {
        let output = tokio::process::Command::new(&self.ffmpeg)
            .arg("-y")
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| StageError::filesystem(format!("ffmpeg did not start: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = stderr.lines().next_back().unwrap_or_default();
            return Err(StageError::render(format!(
                "ffmpeg exited with {:?}: {tail}",
                output.status.code()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, StageError> {
        if !path.exists() {
            return Err(StageError::filesystem(format!(
                "media file not found: {}",
                path.display()
            )));
        }

        let output = tokio::process::Command::new(&self.ffprobe)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| StageError::filesystem(format!("ffprobe did not start: {e}")))?;

        if !output.status.success() {
            return Err(StageError::render(format!(
                "ffprobe exited with {:?}",
                output.status.code()
            )));
        }

        let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| StageError::format(format!("ffprobe output did not parse: {e}")))?;

        let duration_secs = parsed
            .format
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
            .ok_or_else(|| StageError::format("ffprobe output carried no duration"))?;

        let has_audio = parsed
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio"));

        Ok(MediaInfo {
            duration_secs,
            has_audio,
        })
    }

    async fn concat_audio(&self, clips: &[PathBuf], out: &Path) -> Result<(), StageError> {
        if clips.is_empty() {
            return Err(StageError::format("no audio clips to concatenate"));
        }

        // Concat demuxer needs a list file next to the output.
        let list_path = out.with_extension("concat.txt");
        let mut list = String::new();
        for clip in clips {
            list.push_str(&format!("file '{}'\n", clip.display()));
        }
        tokio::fs::write(&list_path, list)
            .await
            .map_err(|e| StageError::filesystem(format!("could not write concat list: {e}")))?;

        let result = self
            .run_ffmpeg(&[
                "-f".as_ref(),
                "concat".as_ref(),
                "-safe".as_ref(),
                "0".as_ref(),
                "-i".as_ref(),
                list_path.as_os_str(),
                "-c".as_ref(),
                "copy".as_ref(),
                out.as_os_str(),
            ])
            .await;

        let _ = tokio::fs::remove_file(&list_path).await;
        result
    }

    async fn pad_audio(
        &self,
        input: &Path,
        target_secs: f64,
        out: &Path,
    ) -> Result<(), StageError> {
        let filter = format!("apad=whole_dur={target_secs}");
        self.run_ffmpeg(&[
            "-i".as_ref(),
            input.as_os_str(),
            "-af".as_ref(),
            filter.as_str().as_ref(),
            out.as_os_str(),
        ])
        .await
    }

    async fn trim_audio(
        &self,
        input: &Path,
        target_secs: f64,
        out: &Path,
    ) -> Result<(), StageError> {
        let limit = format!("{target_secs}");
        self.run_ffmpeg(&[
            "-i".as_ref(),
            input.as_os_str(),
            "-t".as_ref(),
            limit.as_str().as_ref(),
            "-c".as_ref(),
            "copy".as_ref(),
            out.as_os_str(),
        ])
        .await
    }

    async fn mux(&self, video: &Path, audio: &Path, out: &Path) -> Result<(), StageError> {
        self.run_ffmpeg(&[
            "-i".as_ref(),
            video.as_os_str(),
            "-i".as_ref(),
            audio.as_os_str(),
            "-map".as_ref(),
            "0:v:0".as_ref(),
            "-map".as_ref(),
            "1:a:0".as_ref(),
            "-c:v".as_ref(),
            "copy".as_ref(),
            "-c:a".as_ref(),
            "aac".as_ref(),
            "-shortest".as_ref(),
            out.as_os_str(),
        ])
        .await
    }
}
