//! Checkpoint store: durable context snapshots per (job, stage).
//!
//! A checkpoint for stage `k` is written only after stage `k` succeeded,
//! and before the job record marks `k` complete. Loading one into a fresh
//! context reconstructs the exact output state stage `k + 1` will read.

use crate::context::JobContext;
use crate::errors::EngineError;
use crate::registry::STAGE_COUNT;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Serialized snapshot envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Owning job.
    pub job_id: Uuid,
    /// Stage that completed.
    pub stage: u8,
    /// Write time.
    pub at: DateTime<Utc>,
    /// The snapshotted context.
    pub context: JobContext,
}

/// Per-stage snapshot storage.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Atomically persists a snapshot of the context after `stage` succeeded.
    async fn save(&self, ctx: &JobContext, stage: u8) -> Result<(), EngineError>;

    /// Loads the snapshot for `(job, stage)`, if present.
    async fn load(&self, job: Uuid, stage: u8) -> Result<Option<JobContext>, EngineError>;

    /// Returns the highest-stage snapshot for the job, if any.
    async fn latest(&self, job: Uuid) -> Result<Option<(u8, JobContext)>, EngineError>;

    /// Deletes every snapshot belonging to the job.
    async fn cleanup(&self, job: Uuid) -> Result<(), EngineError>;
}

/// Filesystem-backed checkpoint store.
///
/// One JSON file per (job, stage); writes go through a temp file and an
/// atomic rename so that readers never observe a torn snapshot.
#[derive(Debug, Clone)]
pub struct FsCheckpointStore {
    dir: PathBuf,
}

impl FsCheckpointStore {
    /// Creates a store rooted at `dir` (created lazily on first save).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, job: Uuid, stage: u8) -> PathBuf {
        self.dir.join(format!("{job}_stage_{stage}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FsCheckpointStore {
    async fn save(&self, ctx: &JobContext, stage: u8) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let checkpoint = Checkpoint {
            job_id: ctx.job_id,
            stage,
            at: Utc::now(),
            context: ctx.clone(),
        };
        let payload = serde_json::to_vec_pretty(&checkpoint)?;

        let target = self.path(ctx.job_id, stage);
        let tmp = target.with_extension("json.tmp");
        tokio::fs::write(&tmp, &payload).await?;
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }

    async fn load(&self, job: Uuid, stage: u8) -> Result<Option<JobContext>, EngineError> {
        let path = self.path(job, stage);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
                Ok(Some(checkpoint.context))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn latest(&self, job: Uuid) -> Result<Option<(u8, JobContext)>, EngineError> {
        for stage in (0..STAGE_COUNT as u8).rev() {
            if let Some(ctx) = self.load(job, stage).await? {
                return Ok(Some((stage, ctx)));
            }
        }
        Ok(None)
    }

    async fn cleanup(&self, job: Uuid) -> Result<(), EngineError> {
        for stage in 0..STAGE_COUNT as u8 {
            match tokio::fs::remove_file(self.path(job, stage)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Removes a checkpoint directory's stale temp files left by a crash
/// mid-save. Safe to call at worker startup.
pub async fn sweep_temp_files(dir: &Path) -> Result<usize, EngineError> {
    let mut removed = 0;
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if name.to_string_lossy().ends_with(".json.tmp") {
            tokio::fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }
    Ok(removed)
}
