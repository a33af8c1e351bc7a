//! End-to-end engine scenarios against mock services.

use super::Engine;
use crate::checkpoint::{CheckpointStore, FsCheckpointStore};
use crate::config::EngineConfig;
use crate::context::{DurationRepair, JobContext};
use crate::errors::{ErrorKind, StageError};
use crate::job::store::{JobStore, MemoryJobStore};
use crate::job::JobStatus;
use crate::runner::{RunOutcome, StageRunner};
use crate::stages::build_stages;
use crate::testing::mocks::{
    MockServices, NARRATION_COMPLETION, PLAN_COMPLETION, SCRIPT_COMPLETION, SUMMARY_COMPLETION,
};
use std::sync::Arc;
use std::time::Duration;

const MARKDOWN: &str = "# Bridge Inspection Basics\n\n\
    Bridge inspection verifies the structural condition of the deck, the \
    superstructure, and the substructure. Inspectors document defects, \
    rate components, and schedule follow-up work according to severity.";

struct Harness {
    engine: Arc<Engine>,
    mocks: MockServices,
    jobs: Arc<MemoryJobStore>,
    checkpoints: Arc<FsCheckpointStore>,
    config: EngineConfig,
    _tmp: tempfile::TempDir,
}

fn harness() -> Harness {
    harness_with_lease(Duration::from_secs(900))
}

/// A zero lease makes every claim lapse immediately, which is how a
/// crashed worker's job looks to the next one.
fn harness_with_lease(lease: Duration) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let config = EngineConfig::default()
        .with_workspace_root(tmp.path().join("work"))
        .with_checkpoint_dir(tmp.path().join("checkpoints"))
        .with_backoff(0, 0);
    let mocks = MockServices::new();
    let jobs = Arc::new(MemoryJobStore::with_lease(lease));
    let checkpoints = Arc::new(FsCheckpointStore::new(config.checkpoint_dir.clone()));
    let engine = Arc::new(Engine::new(
        config.clone(),
        jobs.clone(),
        checkpoints.clone(),
        mocks.service_set(),
    ));
    Harness {
        engine,
        mocks,
        jobs,
        checkpoints,
        config,
        _tmp: tmp,
    }
}

#[tokio::test]
async fn test_happy_path_completes_done() {
    let h = harness();
    h.mocks.llm.script_happy_path();

    let job = h.engine.create_job(MARKDOWN).await.unwrap();
    let finished = h.engine.run(job.id).await.unwrap();

    assert_eq!(finished.status, JobStatus::Done);
    assert_eq!(finished.stages_completed, (0..=10).collect::<Vec<u8>>());
    assert!(finished.errors.is_empty());
    assert!(!finished.degraded);
    assert!(finished.tokens.total > 0);
    assert!(finished.summary.is_some());

    let output = finished.output_path.expect("final output path set");
    assert!(output.exists());

    let checklist_path = h
        .config
        .workspace_root
        .join(job.id.to_string())
        .join("checklist.json");
    let checklist: crate::gate::Checklist =
        serde_json::from_slice(&std::fs::read(checklist_path).unwrap()).unwrap();
    assert!(checklist.video_ready);
    assert!(checklist.summarised);
    assert!(checklist.images_identified);
    assert!(checklist.images_integrated);
    assert!(checklist.audio_integrated);

    // Checkpoints are cleaned up on terminal success.
    assert!(h.checkpoints.latest(job.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_quota_fault_recovers_via_retry() {
    let h = harness();
    h.mocks.llm.push_text(SUMMARY_COMPLETION);
    h.mocks.llm.push_error(StageError::quota("rate limit"));
    h.mocks.llm.push_text(SCRIPT_COMPLETION);
    h.mocks.llm.push_text(PLAN_COMPLETION);
    h.mocks.llm.push_text(NARRATION_COMPLETION);

    let job = h.engine.create_job(MARKDOWN).await.unwrap();
    let finished = h.engine.run(job.id).await.unwrap();

    assert_eq!(finished.status, JobStatus::Done);
    assert_eq!(finished.errors.len(), 1);
    let record = &finished.errors[0];
    assert_eq!(record.stage, 3);
    assert_eq!(record.kind, ErrorKind::Quota);
    assert_eq!(record.retry, 1);
    assert_eq!(record.checkpoint_restored, Some(2));
    assert_eq!(finished.total_retries, 1);
}

#[tokio::test]
async fn test_exhausted_plan_stage_falls_back_to_empty_plan() {
    let h = harness();
    h.mocks.llm.push_text(SUMMARY_COMPLETION);
    h.mocks.llm.push_text(SCRIPT_COMPLETION);
    h.mocks.llm.push_error(StageError::network("dns"));
    h.mocks.llm.push_error(StageError::network("dns"));
    h.mocks.llm.push_error(StageError::network("dns"));
    h.mocks.llm.push_text(NARRATION_COMPLETION);

    let job = h.engine.create_job(MARKDOWN).await.unwrap();
    let finished = h.engine.run(job.id).await.unwrap();

    // Three errors stay under the degraded threshold of five.
    assert_eq!(finished.status, JobStatus::Done);
    assert!(!finished.degraded);
    assert_eq!(finished.errors.len(), 3);
    assert!(finished.errors.iter().all(|e| e.stage == 4));
    assert!(finished.errors[2].fallback_used);

    // Stage 5 observed the empty plan and never searched.
    assert_eq!(h.mocks.search.call_count(), 0);

    let checklist_path = h
        .config
        .workspace_root
        .join(job.id.to_string())
        .join("checklist.json");
    let checklist: crate::gate::Checklist =
        serde_json::from_slice(&std::fs::read(checklist_path).unwrap()).unwrap();
    assert!(!checklist.images_identified);
    assert!(checklist.video_ready);
}

#[tokio::test]
async fn test_render_failure_is_fatal() {
    let h = harness();
    h.mocks.llm.script_happy_path();
    // Two runner attempts, each trying primary then fallback quality.
    for _ in 0..4 {
        h.mocks.renderer.push_failure(StageError::render("exit 1"));
    }

    let job = h.engine.create_job(MARKDOWN).await.unwrap();
    let finished = h.engine.run(job.id).await.unwrap();

    assert_eq!(finished.status, JobStatus::Error);
    assert_eq!(finished.stages_completed, (0..=6).collect::<Vec<u8>>());
    assert!(finished.output_path.is_none());
    assert!(finished.errors.iter().all(|e| e.stage == 7));

    // The checklist was never computed.
    let checklist_path = h
        .config
        .workspace_root
        .join(job.id.to_string())
        .join("checklist.json");
    assert!(!checklist_path.exists());

    // Checkpoints through stage 6 are retained until cleanup.
    let (latest, _) = h.checkpoints.latest(job.id).await.unwrap().unwrap();
    assert_eq!(latest, 6);
}

#[tokio::test]
async fn test_short_audio_is_padded_before_gate() {
    let h = harness();
    h.mocks.llm.push_text(SUMMARY_COMPLETION);
    h.mocks.llm.push_text(SCRIPT_COMPLETION);
    h.mocks.llm.push_text(PLAN_COMPLETION);
    h.mocks.llm.push_text(
        "```json\n[{\"slide_no\": 1, \"duration\": 117.2, \"narration_text\": \"Long form.\"}]\n```",
    );
    h.mocks.media.set_duration("silent_video.mp4", 120.0);
    h.mocks.media.set_duration("clip_0.mp3", 117.2);

    let job = h.engine.create_job(MARKDOWN).await.unwrap();
    let finished = h.engine.run(job.id).await.unwrap();

    assert_eq!(finished.status, JobStatus::Done);

    let checklist_path = h
        .config
        .workspace_root
        .join(job.id.to_string())
        .join("checklist.json");
    let checklist: crate::gate::Checklist =
        serde_json::from_slice(&std::fs::read(checklist_path).unwrap()).unwrap();
    assert!(checklist.duration_aligned);
    assert!(checklist.audio_integrated);
    match checklist.repair {
        Some(DurationRepair::PaddedAudio(secs)) => assert!((secs - 2.8).abs() < 1e-6),
        other => panic!("expected padded-audio repair, got {other:?}"),
    }
}

#[tokio::test]
async fn test_resume_from_checkpoint_skips_completed_stages() {
    let h = harness_with_lease(Duration::ZERO);
    h.mocks.llm.push_text(SUMMARY_COMPLETION);
    h.mocks.llm.push_text(SCRIPT_COMPLETION);
    h.mocks.llm.push_text(PLAN_COMPLETION);

    let job = h.engine.create_job(MARKDOWN).await.unwrap();

    // Simulate a worker that ran stages 0..=6 and then crashed: drive the
    // runner directly, leaving the job in `processing` with checkpoints.
    h.jobs.acquire(job.id).await.unwrap();
    let work_dir = h.config.workspace_root.join(job.id.to_string());
    tokio::fs::create_dir_all(&work_dir).await.unwrap();
    let mut ctx = JobContext::new(job.id, MARKDOWN, &work_dir);

    let stages = build_stages(&h.config, &h.mocks.service_set());
    let runner = StageRunner::new(&h.config, h.jobs.as_ref(), h.checkpoints.as_ref());
    let cancel = crate::cancellation::CancelToken::new();
    for stage in &stages[0..=6] {
        let outcome = runner
            .run_stage(stage.as_ref(), &mut ctx, &cancel)
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Completed));
    }
    let llm_calls_before = h.mocks.llm.call_count();
    let renderer_calls_before = h.mocks.renderer.call_count();

    // Narration for the resumed stage 8.
    h.mocks.llm.push_text(NARRATION_COMPLETION);

    let finished = h.engine.run(job.id).await.unwrap();

    assert_eq!(finished.status, JobStatus::Done);
    assert_eq!(finished.stages_completed, (0..=10).collect::<Vec<u8>>());
    // Stages 0..=6 were not re-executed.
    assert_eq!(h.mocks.llm.call_count(), llm_calls_before + 1);
    assert_eq!(h.mocks.renderer.call_count(), renderer_calls_before + 1);
}

#[tokio::test]
async fn test_cancellation_mid_render_terminates_job() {
    let h = harness();
    h.mocks.llm.script_happy_path();
    h.mocks.renderer.set_delay(Duration::from_secs(30));

    let job = h.engine.create_job(MARKDOWN).await.unwrap();
    let engine = h.engine.clone();
    let id = job.id;
    let run = tokio::spawn(async move { engine.run(id).await });

    // Let the run reach the renderer, then cancel.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.engine.cancel(id, "user requested"));

    let finished = run.await.unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Error);
    let last = finished.errors.last().expect("cancellation recorded");
    assert_eq!(last.kind, ErrorKind::Cancelled);
    assert_eq!(last.stage, 7);

    // Checkpoints through stage 6 survive until cleanup.
    let (latest, _) = h.checkpoints.latest(id).await.unwrap().unwrap();
    assert_eq!(latest, 6);
}

#[tokio::test]
async fn test_audio_fallback_muxes_silence_track() {
    let h = harness();
    h.mocks.llm.script_happy_path();
    // Speech synthesis is down; the audio stage falls back to silence.
    h.mocks.tts.fail_next(StageError::remote_api("tts down"));

    let job = h.engine.create_job(MARKDOWN).await.unwrap();
    h.mocks.media.set_duration("full_audio.wav", 30.0);

    let finished = h.engine.run(job.id).await.unwrap();

    // Mux ran against the silence track, so the artifact is complete and
    // the single error stays under the degraded threshold.
    assert_eq!(finished.status, JobStatus::Done);
    assert!(finished.output_path.is_some());
    assert_eq!(finished.errors.len(), 1);
    assert_eq!(finished.errors[0].stage, 9);
    assert!(finished.errors[0].fallback_used);
}

#[tokio::test]
async fn test_live_job_refuses_concurrent_acquire() {
    let h = harness();
    h.mocks.llm.script_happy_path();
    h.mocks.renderer.set_delay(Duration::from_secs(5));

    let job = h.engine.create_job(MARKDOWN).await.unwrap();
    let engine = h.engine.clone();
    let id = job.id;
    let run = tokio::spawn(async move { engine.run(id).await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The first worker's lease is live; a second worker cannot steal it.
    let err = h.engine.run(id).await.unwrap_err();
    assert!(matches!(
        err,
        crate::errors::EngineError::NotRunnable { .. }
    ));

    h.engine.cancel(id, "test over");
    let _ = run.await.unwrap();
}

#[tokio::test]
async fn test_terminal_job_refuses_rerun() {
    let h = harness();
    h.mocks.llm.script_happy_path();

    let job = h.engine.create_job(MARKDOWN).await.unwrap();
    let finished = h.engine.run(job.id).await.unwrap();
    assert!(finished.status.is_terminal());

    let err = h.engine.run(job.id).await.unwrap_err();
    assert!(matches!(
        err,
        crate::errors::EngineError::NotRunnable { .. }
    ));
}

#[tokio::test]
async fn test_delete_removes_record_checkpoints_and_workspace() {
    let h = harness();
    h.mocks.llm.script_happy_path();

    let job = h.engine.create_job(MARKDOWN).await.unwrap();
    h.engine.run(job.id).await.unwrap();

    let work_dir = h.config.workspace_root.join(job.id.to_string());
    assert!(work_dir.exists());

    assert!(h.engine.delete(job.id).await.unwrap());
    assert!(!work_dir.exists());
    assert!(h.engine.status(job.id).await.unwrap().is_none());
    assert!(h.checkpoints.latest(job.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_short_input_fails_fatally_at_validation() {
    let h = harness();
    let job = h.engine.create_job("tiny").await.unwrap();
    let finished = h.engine.run(job.id).await.unwrap();

    assert_eq!(finished.status, JobStatus::Error);
    assert_eq!(finished.errors[0].stage, 1);
    assert_eq!(finished.errors[0].kind, ErrorKind::Format);
    // Stage 0 completed; stage 1 did not.
    assert_eq!(finished.stages_completed, vec![0]);
}
