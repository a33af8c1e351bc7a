//! The pipeline engine: drives the stage registry 0 through 10 for one
//! job at a time and writes the terminal status.

#[cfg(test)]
mod integration_tests;

use crate::cancellation::CancelToken;
use crate::checkpoint::CheckpointStore;
use crate::config::EngineConfig;
use crate::context::JobContext;
use crate::errors::EngineError;
use crate::gate;
use crate::job::store::JobStore;
use crate::job::{JobRecord, JobStatus};
use crate::runner::{RunOutcome, StageRunner};
use crate::services::ServiceSet;
use crate::stages::{build_stages, Stage};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// The engine façade.
///
/// A worker drives one job end-to-end sequentially; independent jobs may
/// be driven concurrently from clones of the same engine, each owning a
/// disjoint work directory derived from the job identity.
pub struct Engine {
    config: EngineConfig,
    jobs: Arc<dyn JobStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    services: ServiceSet,
    stages: Vec<Arc<dyn Stage>>,
    running: DashMap<Uuid, CancelToken>,
}

impl Engine {
    /// Constructs an engine from configuration, stores, and capabilities.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        jobs: Arc<dyn JobStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        services: ServiceSet,
    ) -> Self {
        let stages = build_stages(&config, &services);
        Self {
            config,
            jobs,
            checkpoints,
            services,
            stages,
            running: DashMap::new(),
        }
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Deposits a new pending job for the given Markdown payload.
    pub async fn create_job(&self, markdown: &str) -> Result<JobRecord, EngineError> {
        let id = Uuid::new_v4();
        let record = self.jobs.create(id, markdown).await?;
        info!(job = %id, bytes = markdown.len(), "job created");
        Ok(record)
    }

    /// Fetches a job record.
    pub async fn status(&self, id: Uuid) -> Result<Option<JobRecord>, EngineError> {
        self.jobs.get(id).await
    }

    /// Lists jobs, optionally filtered by status.
    pub async fn list(&self, filter: Option<JobStatus>) -> Result<Vec<JobRecord>, EngineError> {
        self.jobs.list(filter).await
    }

    /// Requests cancellation of a running job. Returns whether the job was
    /// running in this engine.
    pub fn cancel(&self, id: Uuid, reason: impl Into<String>) -> bool {
        match self.running.get(&id) {
            Some(token) => {
                token.cancel(reason);
                true
            }
            None => false,
        }
    }

    /// Runs a job to its terminal status.
    ///
    /// Acquires the job (refusing terminal jobs), resumes from the latest
    /// checkpoint when one exists, walks the remaining stages, evaluates
    /// the pre-merge gate, and persists the outcome.
    pub async fn run(&self, id: Uuid) -> Result<JobRecord, EngineError> {
        let record = self.jobs.acquire(id).await?;
        let cancel = CancelToken::new();
        self.running.insert(id, cancel.clone());
        let result = self.drive(record, cancel).await;
        self.running.remove(&id);
        result
    }

    /// Deletes a job: cancels it when running, then removes checkpoints,
    /// the work directory, and the job record.
    pub async fn delete(&self, id: Uuid) -> Result<bool, EngineError> {
        if let Some(token) = self.running.get(&id) {
            token.cancel("job deleted");
        }
        self.checkpoints.cleanup(id).await?;

        let work_dir = self.config.workspace_root.join(id.to_string());
        match tokio::fs::remove_dir_all(&work_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.jobs.delete(id).await
    }

    async fn drive(&self, record: JobRecord, cancel: CancelToken) -> Result<JobRecord, EngineError> {
        let id = record.id;
        let work_dir = self.config.workspace_root.join(id.to_string());
        tokio::fs::create_dir_all(&work_dir).await?;

        let (mut ctx, resume_from) = match self.checkpoints.latest(id).await? {
            Some((stage, ctx)) => {
                info!(job = %id, checkpoint = stage, "resuming from checkpoint");
                (ctx, usize::from(stage) + 1)
            }
            None => (JobContext::new(id, record.markdown.clone(), work_dir), 0),
        };

        let runner = StageRunner::new(&self.config, self.jobs.as_ref(), self.checkpoints.as_ref());

        for stage in self.stages.iter().skip(resume_from) {
            let desc = stage.descriptor();
            match runner.run_stage(stage.as_ref(), &mut ctx, &cancel).await? {
                RunOutcome::Completed | RunOutcome::FallbackUsed => {}
                RunOutcome::Failed(err) => {
                    warn!(job = %id, stage = desc.name, "job aborted: {err}");
                    self.jobs.update_tokens(id, &ctx.tokens).await?;
                    self.jobs.update_status(id, JobStatus::Error, None).await?;
                    return self.fetch(id).await;
                }
            }
        }

        let checklist = gate::evaluate(&ctx, self.services.media.as_ref()).await;
        ctx.checklist = Some(checklist.clone());
        let checklist_json = serde_json::to_vec_pretty(&checklist)?;
        tokio::fs::write(ctx.file("checklist.json"), &checklist_json).await?;

        let status = if checklist.video_ready && !ctx.degraded {
            JobStatus::Done
        } else {
            JobStatus::Degraded
        };

        self.jobs.update_tokens(id, &ctx.tokens).await?;
        let summary = (!ctx.summary.trim().is_empty()).then_some(ctx.summary.as_str());
        self.jobs
            .set_result_meta(id, summary, checklist.final_duration_secs)
            .await?;
        self.jobs
            .update_status(id, status, ctx.final_output.as_deref())
            .await?;
        self.checkpoints.cleanup(id).await?;

        info!(
            job = %id,
            status = %status,
            video_ready = checklist.video_ready,
            errors = ctx.error_count,
            "job finished"
        );
        self.fetch(id).await
    }

    async fn fetch(&self, id: Uuid) -> Result<JobRecord, EngineError> {
        self.jobs.get(id).await?.ok_or(EngineError::JobNotFound(id))
    }
}
