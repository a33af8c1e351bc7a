//! The stage runner: a uniform retry/rollback/fallback shell around one
//! stage invocation.
//!
//! The runner is the only component that mutates retry counters, error
//! history, and the degraded flag. Its durability ordering is fixed: an
//! error record is durable before the next attempt starts, and a stage's
//! checkpoint is durable before the job record marks that stage complete.

use crate::cancellation::CancelToken;
use crate::config::EngineConfig;
use crate::checkpoint::CheckpointStore;
use crate::context::{FallbackNote, JobContext};
use crate::errors::{EngineError, ErrorKind, StageError};
use crate::job::store::JobStore;
use crate::job::ErrorRecord;
use crate::registry::{FallbackPolicy, StageDescriptor};
use crate::stages::Stage;
use chrono::Utc;
use tracing::{debug, info, warn};

/// How a stage run concluded.
#[derive(Debug)]
pub enum RunOutcome {
    /// The stage produced its declared outputs.
    Completed,
    /// Retries were exhausted and the fallback output was installed.
    FallbackUsed,
    /// The stage failed terminally; the engine must abort the job.
    Failed(StageError),
}

/// Runs stages under the engine's resilience policy.
pub struct StageRunner<'a> {
    config: &'a EngineConfig,
    jobs: &'a dyn JobStore,
    checkpoints: &'a dyn CheckpointStore,
}

impl<'a> StageRunner<'a> {
    /// Creates a runner over the given stores.
    #[must_use]
    pub fn new(
        config: &'a EngineConfig,
        jobs: &'a dyn JobStore,
        checkpoints: &'a dyn CheckpointStore,
    ) -> Self {
        Self {
            config,
            jobs,
            checkpoints,
        }
    }

    /// Executes one stage to a terminal [`RunOutcome`].
    ///
    /// `Err` is reserved for infrastructure faults (store failures); every
    /// stage-level failure is absorbed into the outcome.
    pub async fn run_stage(
        &self,
        stage: &dyn Stage,
        ctx: &mut JobContext,
        cancel: &CancelToken,
    ) -> Result<RunOutcome, EngineError> {
        let desc = stage.descriptor();
        let job_id = ctx.job_id;
        self.jobs.set_current_stage(job_id, desc.index).await?;

        let max_attempts = desc
            .max_retries
            .min(self.config.max_retries_per_stage)
            .max(1);
        let mut last_error: Option<StageError> = None;
        let mut attempt = 1;

        while attempt <= max_attempts {
            if attempt > 1 {
                let delay = self.config.backoff_delay(attempt);
                debug!(
                    job = %job_id,
                    stage = desc.name,
                    attempt,
                    delay_secs = delay.as_secs(),
                    "backing off before retry"
                );
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => {}
                }
            }

            if cancel.is_cancelled() {
                let err = cancel_error(cancel);
                let record = self.error_record(desc, &err, attempt, false, None);
                self.jobs.append_error(job_id, &record).await?;
                return Ok(RunOutcome::Failed(err));
            }

            let result = tokio::select! {
                () = cancel.cancelled() => Err(cancel_error(cancel)),
                outcome = tokio::time::timeout(desc.timeout, stage.execute(ctx)) => {
                    match outcome {
                        Ok(inner) => inner,
                        Err(_) => Err(StageError::timeout(format!(
                            "stage '{}' exceeded its {}s budget",
                            desc.name,
                            desc.timeout.as_secs()
                        ))),
                    }
                }
            };

            match result {
                Ok(()) => {
                    // Checkpoint before the job record: if a checkpoint for
                    // stage k exists, the completed-stage set includes k.
                    self.checkpoints.save(ctx, desc.index).await?;
                    self.jobs.mark_stage_complete(job_id, desc.index).await?;
                    self.jobs.update_tokens(job_id, &ctx.tokens).await?;
                    info!(job = %job_id, stage = desc.name, attempt, "stage completed");
                    return Ok(RunOutcome::Completed);
                }
                Err(err) => {
                    ctx.error_count += 1;
                    if ctx.error_count >= self.config.degraded_threshold && !ctx.degraded {
                        ctx.degraded = true;
                        self.jobs.set_degraded(job_id).await?;
                        warn!(
                            job = %job_id,
                            errors = ctx.error_count,
                            "error budget crossed, job flagged degraded"
                        );
                    }

                    let restored = self.rollback(ctx, desc).await?;
                    let total = self.jobs.increment_retries(job_id).await?;

                    let over_ceiling = total > self.config.total_retry_ceiling;
                    let cancelled = err.kind == ErrorKind::Cancelled;
                    let retryable = err.is_retryable(desc.retry_remote_errors);
                    let is_final = attempt == max_attempts || !retryable || over_ceiling;
                    let will_fall_back = is_final
                        && !over_ceiling
                        && !cancelled
                        && desc.fallback == FallbackPolicy::Enabled;

                    let record = self.error_record(desc, &err, attempt, will_fall_back, restored);
                    self.jobs.append_error(job_id, &record).await?;
                    warn!(
                        job = %job_id,
                        stage = desc.name,
                        attempt,
                        kind = %err.kind,
                        "stage attempt failed: {err}"
                    );

                    last_error = Some(err.clone());

                    if over_ceiling {
                        warn!(
                            job = %job_id,
                            total_retries = total,
                            ceiling = self.config.total_retry_ceiling,
                            "job-wide retry ceiling exceeded, forcing fatal termination"
                        );
                        return Ok(RunOutcome::Failed(err));
                    }
                    if cancelled {
                        return Ok(RunOutcome::Failed(err));
                    }
                    if !retryable {
                        break;
                    }
                }
            }
            attempt += 1;
        }

        let last_error =
            last_error.unwrap_or_else(|| StageError::unknown("stage failed without detail"));

        if desc.fallback == FallbackPolicy::Enabled {
            info!(job = %job_id, stage = desc.name, "retries exhausted, using fallback");
            stage.fallback(ctx);
            ctx.fallbacks_used.push(FallbackNote {
                stage: desc.index,
                reason: last_error.to_string(),
            });
            self.checkpoints.save(ctx, desc.index).await?;
            self.jobs.mark_stage_complete(job_id, desc.index).await?;
            self.jobs.update_tokens(job_id, &ctx.tokens).await?;
            return Ok(RunOutcome::FallbackUsed);
        }

        Ok(RunOutcome::Failed(last_error))
    }

    /// Restores the prior stage's checkpoint, undoing any partial context
    /// writes the failing attempt made. Monotone fields (error count,
    /// token counters, degraded flag, fallback log) survive the rollback.
    async fn rollback(
        &self,
        ctx: &mut JobContext,
        desc: &StageDescriptor,
    ) -> Result<Option<u8>, EngineError> {
        if desc.index == 0 {
            return Ok(None);
        }
        let prior = desc.index - 1;
        let Some(snapshot) = self.checkpoints.load(ctx.job_id, prior).await? else {
            return Ok(None);
        };

        let error_count = ctx.error_count;
        let tokens = ctx.tokens.clone();
        let degraded = ctx.degraded;
        let fallbacks = ctx.fallbacks_used.clone();

        *ctx = snapshot;
        ctx.error_count = error_count;
        ctx.tokens = tokens;
        ctx.degraded = degraded;
        ctx.fallbacks_used = fallbacks;

        debug!(job = %ctx.job_id, restored_stage = prior, "context rolled back to checkpoint");
        Ok(Some(prior))
    }

    fn error_record(
        &self,
        desc: &StageDescriptor,
        err: &StageError,
        attempt: u32,
        fallback_used: bool,
        checkpoint_restored: Option<u8>,
    ) -> ErrorRecord {
        ErrorRecord {
            stage: desc.index,
            kind: err.kind,
            detail: err.to_string(),
            retry: attempt,
            fallback_used,
            checkpoint_restored,
            at: Utc::now(),
        }
    }
}

fn cancel_error(cancel: &CancelToken) -> StageError {
    StageError::cancelled(cancel.reason().unwrap_or_else(|| "cancelled".to_string()))
}
