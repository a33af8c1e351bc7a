//! Stage 10: repair durations and mux audio with video.

use super::Stage;
use crate::context::{DurationRepair, JobContext};
use crate::errors::StageError;
use crate::gate::ALIGNMENT_TOLERANCE_SECS;
use crate::registry::{StageDescriptor, REGISTRY};
use crate::services::MediaToolkit;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Muxes the silent video with the audio track into the final output.
///
/// Any duration mismatch is repaired first: short audio is padded with
/// trailing silence, long audio is trimmed to the video. Without an audio
/// track the silent video is promoted to the final output (the gate then
/// reports the artifact as degraded).
pub struct MuxAudioVideo {
    media: Arc<dyn MediaToolkit>,
}

impl MuxAudioVideo {
    /// Creates the stage.
    #[must_use]
    pub fn new(media: Arc<dyn MediaToolkit>) -> Self {
        Self { media }
    }
}

#[async_trait]
impl Stage for MuxAudioVideo {
    fn descriptor(&self) -> &'static StageDescriptor {
        &REGISTRY[10]
    }

    async fn execute(&self, ctx: &mut JobContext) -> Result<(), StageError> {
        let video = ctx
            .silent_video
            .clone()
            .ok_or_else(|| StageError::filesystem("no rendered video available to mux"))?;
        let final_path = ctx.file("final.mp4");

        let Some(audio) = ctx.audio_track.clone() else {
            warn!(job = %ctx.job_id, "no audio track, promoting silent video to final output");
            tokio::fs::copy(&video, &final_path).await.map_err(|e| {
                StageError::filesystem(format!("could not copy silent video: {e}"))
            })?;
            ctx.final_output = Some(final_path);
            return Ok(());
        };

        let video_info = self.media.probe(&video).await?;
        let audio_info = self.media.probe(&audio).await?;
        let diff = video_info.duration_secs - audio_info.duration_secs;

        let audio = if diff.abs() < ALIGNMENT_TOLERANCE_SECS {
            audio
        } else if diff > 0.0 {
            info!(
                job = %ctx.job_id,
                pad_secs = diff,
                "audio shorter than video, padding with silence"
            );
            let repaired = ctx.file("full_audio_fit.mp3");
            self.media
                .pad_audio(&audio, video_info.duration_secs, &repaired)
                .await?;
            ctx.duration_repair = Some(DurationRepair::PaddedAudio(diff));
            repaired
        } else {
            info!(
                job = %ctx.job_id,
                trim_secs = -diff,
                "audio longer than video, trimming the excess"
            );
            let repaired = ctx.file("full_audio_fit.mp3");
            self.media
                .trim_audio(&audio, video_info.duration_secs, &repaired)
                .await?;
            ctx.duration_repair = Some(DurationRepair::TrimmedAudio(-diff));
            repaired
        };

        // The repaired track becomes the track of record for the gate.
        ctx.audio_track = Some(audio.clone());

        self.media.mux(&video, &audio, &final_path).await?;
        info!(job = %ctx.job_id, output = %final_path.display(), "final output muxed");
        ctx.final_output = Some(final_path);
        Ok(())
    }

    fn fallback(&self, ctx: &mut JobContext) {
        // Keep the silent video as the final artifact; the gate will
        // label the job degraded.
        ctx.final_output = ctx.silent_video.clone();
    }
}
