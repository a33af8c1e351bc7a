//! The pre-merge validation gate.
//!
//! Evaluated once, immediately after the muxing stage. The checklist is
//! persisted as `checklist.json` for external display; `video_ready`
//! decides between the `done` and `degraded` terminal states.

use crate::context::{DurationRepair, JobContext};
use crate::services::MediaToolkit;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Maximum tolerated difference between video and audio durations.
pub const ALIGNMENT_TOLERANCE_SECS: f64 = 1.0;

/// Boolean predicates computed over the finished context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checklist {
    /// Summary artifact exists and is non-empty.
    pub summarised: bool,
    /// Base script text is present.
    pub script_generated: bool,
    /// Image plan has at least one entry.
    pub images_identified: bool,
    /// Enhanced script references at least one fetched image.
    pub images_integrated: bool,
    /// Silent video exists with non-zero duration.
    pub video_rendered: bool,
    /// Combined audio track exists with non-zero duration.
    pub audio_generated: bool,
    /// Video and audio durations agree within tolerance.
    pub duration_aligned: bool,
    /// Final output exists, has non-zero duration, and an audio stream.
    pub audio_integrated: bool,
    /// Overall readiness; gates the `done` status.
    pub video_ready: bool,
    /// Duration repair applied before muxing, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repair: Option<DurationRepair>,
    /// Duration of the final output in seconds, when probeable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_duration_secs: Option<f64>,
}

async fn probe_ok(media: &dyn MediaToolkit, path: Option<&Path>) -> Option<(f64, bool)> {
    let path = path?;
    if !path.exists() {
        return None;
    }
    media
        .probe(path)
        .await
        .ok()
        .map(|info| (info.duration_secs, info.has_audio))
}

/// Evaluates the checklist against a finished context.
///
/// An empty image pipeline is a legitimate outcome (the plan may be empty
/// by design or by fallback), so the image predicates only block
/// `video_ready` when images were actually fetched but never referenced.
pub async fn evaluate(ctx: &JobContext, media: &dyn MediaToolkit) -> Checklist {
    let video = probe_ok(media, ctx.silent_video.as_deref()).await;
    let audio = probe_ok(media, ctx.audio_track.as_deref()).await;
    let final_out = probe_ok(media, ctx.final_output.as_deref()).await;

    let summarised = !ctx.summary.trim().is_empty();
    let script_generated = !ctx.base_script.trim().is_empty();
    let images_identified = !ctx.image_plan.is_empty();
    let images_integrated = ctx
        .images
        .iter()
        .any(|asset| ctx.enhanced_script.contains(&*asset.path.to_string_lossy()));

    let video_rendered = video.is_some_and(|(secs, _)| secs > 0.0);
    let audio_generated = audio.is_some_and(|(secs, _)| secs > 0.0);
    let duration_aligned = match (video, audio) {
        (Some((v, _)), Some((a, _))) => (v - a).abs() < ALIGNMENT_TOLERANCE_SECS,
        _ => false,
    };
    let audio_integrated = final_out.is_some_and(|(secs, has_audio)| secs > 0.0 && has_audio);

    let video_ready = summarised
        && script_generated
        && video_rendered
        && audio_generated
        && duration_aligned
        && audio_integrated
        && (ctx.images.is_empty() || images_integrated);

    Checklist {
        summarised,
        script_generated,
        images_identified,
        images_integrated,
        video_rendered,
        audio_generated,
        duration_aligned,
        audio_integrated,
        video_ready,
        repair: ctx.duration_repair,
        final_duration_secs: final_out.map(|(secs, _)| secs),
    }
}
