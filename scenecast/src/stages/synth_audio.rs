//! Stage 9: synthesise audio clips and the combined track.

use super::Stage;
use crate::context::{AudioClip, JobContext, NarrationLine};
use crate::errors::StageError;
use crate::registry::{StageDescriptor, REGISTRY};
use crate::services::{MediaToolkit, SpeechSynthesizer};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Clip durations within this many seconds of target are left alone.
const FIT_TOLERANCE_SECS: f64 = 0.05;

const SILENCE_SAMPLE_RATE: u32 = 22_050;

/// Synthesises one speech clip per narration line, fits each clip to its
/// slide duration, and concatenates them into the combined track.
pub struct SynthesiseAudio {
    tts: Arc<dyn SpeechSynthesizer>,
    media: Arc<dyn MediaToolkit>,
    voice: String,
    concurrency: usize,
}

impl SynthesiseAudio {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        tts: Arc<dyn SpeechSynthesizer>,
        media: Arc<dyn MediaToolkit>,
        voice: impl Into<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            tts,
            media,
            voice: voice.into(),
            concurrency,
        }
    }

    async fn synth_one(
        &self,
        clips_dir: &Path,
        idx: usize,
        line: &NarrationLine,
    ) -> Result<AudioClip, StageError> {
        let raw = clips_dir.join(format!("clip_{idx}.mp3"));
        self.tts.synthesise(&line.text, &self.voice, &raw).await?;

        let size = tokio::fs::metadata(&raw)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if size == 0 {
            return Err(StageError::filesystem(format!(
                "synthesiser produced an empty clip for line {idx}"
            )));
        }

        let target = line.duration_secs;
        let info = self.media.probe(&raw).await?;

        let fitted = if info.duration_secs + FIT_TOLERANCE_SECS < target {
            let out = clips_dir.join(format!("clip_{idx}_fit.mp3"));
            self.media.pad_audio(&raw, target, &out).await?;
            out
        } else if info.duration_secs > target + FIT_TOLERANCE_SECS {
            let out = clips_dir.join(format!("clip_{idx}_fit.mp3"));
            self.media.trim_audio(&raw, target, &out).await?;
            out
        } else {
            raw
        };

        Ok(AudioClip {
            path: fitted,
            duration_secs: target,
        })
    }
}

/// Writes a mono 16-bit PCM WAV file of silence.
pub(crate) fn write_silence_wav(path: &Path, duration_secs: f64) -> std::io::Result<()> {
    let n_samples = (duration_secs * f64::from(SILENCE_SAMPLE_RATE)) as u32;
    let data_len = n_samples * 2;
    let byte_rate = SILENCE_SAMPLE_RATE * 2;

    let mut buf = Vec::with_capacity(44 + data_len as usize);
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&SILENCE_SAMPLE_RATE.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    buf.resize(44 + data_len as usize, 0);

    std::fs::write(path, buf)
}

#[async_trait]
impl Stage for SynthesiseAudio {
    fn descriptor(&self) -> &'static StageDescriptor {
        &REGISTRY[9]
    }

    async fn execute(&self, ctx: &mut JobContext) -> Result<(), StageError> {
        if ctx.narration.is_empty() {
            return Err(StageError::format("no narration lines to synthesise"));
        }

        let clips_dir = ctx.file("audio_clips");
        tokio::fs::create_dir_all(&clips_dir)
            .await
            .map_err(|e| StageError::filesystem(format!("could not create clips dir: {e}")))?;

        let lines: Vec<(usize, NarrationLine)> =
            ctx.narration.iter().cloned().enumerate().collect();

        let clips_dir_ref = &clips_dir;
        let mut results: Vec<(usize, Result<AudioClip, StageError>)> = stream::iter(lines)
            .map(|(idx, line)| async move {
                (idx, self.synth_one(clips_dir_ref, idx, &line).await)
            })
            .buffer_unordered(self.concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(idx, _)| *idx);

        let mut clips = Vec::with_capacity(results.len());
        for (_, result) in results {
            clips.push(result?);
        }

        let track = ctx.file("full_audio.mp3");
        let clip_paths: Vec<PathBuf> = clips.iter().map(|c| c.path.clone()).collect();
        self.media.concat_audio(&clip_paths, &track).await?;

        let total: f64 = clips.iter().map(|c| c.duration_secs).sum();
        info!(
            job = %ctx.job_id,
            clips = clips.len(),
            total_secs = total,
            "audio track synthesised"
        );

        ctx.audio_clips = clips;
        ctx.audio_track = Some(track);
        Ok(())
    }

    fn fallback(&self, ctx: &mut JobContext) {
        let total: f64 = ctx.narration.iter().map(|l| l.duration_secs).sum();
        if total <= 0.0 {
            ctx.audio_clips = Vec::new();
            ctx.audio_track = None;
            return;
        }

        let path = ctx.file("full_audio.wav");
        match write_silence_wav(&path, total) {
            Ok(()) => {
                ctx.audio_clips = vec![AudioClip {
                    path: path.clone(),
                    duration_secs: total,
                }];
                ctx.audio_track = Some(path);
            }
            Err(e) => {
                warn!(job = %ctx.job_id, "silence fallback could not be written: {e}");
                ctx.audio_clips = Vec::new();
                ctx.audio_track = None;
            }
        }
    }
}
