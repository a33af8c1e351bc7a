//! Job store implementations.
//!
//! `SqliteJobStore` is the durable store; `MemoryJobStore` backs tests and
//! embedded use. All mutations are observable atomically by concurrent
//! readers, and error-history appends are durable in order.

use super::{ErrorRecord, JobRecord, JobStatus};
use crate::context::TokenUsage;
use crate::errors::EngineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Default claim lease; a `processing` job whose lease is older than this
/// is treated as crashed and may be re-acquired.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(900);

/// Durable persistence for job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Creates a new pending job.
    async fn create(&self, id: Uuid, markdown: &str) -> Result<JobRecord, EngineError>;

    /// Fetches a job by id.
    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, EngineError>;

    /// Claims a job for execution, taking a time-bounded lease.
    ///
    /// Only `pending` jobs and `processing` jobs whose lease has lapsed
    /// (the worker crashed or stalled) can be acquired; a job whose lease
    /// is still live is refused. The guard is a single atomic
    /// compare-and-set, so concurrent workers cannot both win the same
    /// job. The lease is cleared on terminal transition.
    async fn acquire(&self, id: Uuid) -> Result<JobRecord, EngineError>;

    /// Updates the job status, optionally recording the final output path.
    /// Terminal statuses also stamp `completed_at`.
    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        output: Option<&Path>,
    ) -> Result<(), EngineError>;

    /// Records the stage currently executing.
    async fn set_current_stage(&self, id: Uuid, stage: u8) -> Result<(), EngineError>;

    /// Appends one record to the job's error history.
    async fn append_error(&self, id: Uuid, record: &ErrorRecord) -> Result<(), EngineError>;

    /// Adds a stage to the completed set.
    async fn mark_stage_complete(&self, id: Uuid, stage: u8) -> Result<(), EngineError>;

    /// Replaces the cumulative token counters.
    async fn update_tokens(&self, id: Uuid, tokens: &TokenUsage) -> Result<(), EngineError>;

    /// Increments the job-wide retry counter and returns the new total.
    async fn increment_retries(&self, id: Uuid) -> Result<u32, EngineError>;

    /// Sets the degraded flag.
    async fn set_degraded(&self, id: Uuid) -> Result<(), EngineError>;

    /// Persists display metadata produced near the end of the run.
    async fn set_result_meta(
        &self,
        id: Uuid,
        summary: Option<&str>,
        video_duration_secs: Option<f64>,
    ) -> Result<(), EngineError>;

    /// Lists jobs, newest first, optionally filtered by status.
    async fn list(&self, filter: Option<JobStatus>) -> Result<Vec<JobRecord>, EngineError>;

    /// Deletes a job record. Returns whether a record existed.
    async fn delete(&self, id: Uuid) -> Result<bool, EngineError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// A concurrency-safe in-memory job store.
#[derive(Debug)]
pub struct MemoryJobStore {
    jobs: DashMap<Uuid, JobRecord>,
    lease: Duration,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    /// Creates an empty store with the default claim lease.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lease(DEFAULT_LEASE)
    }

    /// Creates an empty store with an explicit claim lease.
    #[must_use]
    pub fn with_lease(lease: Duration) -> Self {
        Self {
            jobs: DashMap::new(),
            lease,
        }
    }

    fn mutate<F>(&self, id: Uuid, f: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut entry = self.jobs.get_mut(&id).ok_or(EngineError::JobNotFound(id))?;
        f(entry.value_mut());
        entry.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, id: Uuid, markdown: &str) -> Result<JobRecord, EngineError> {
        let record = JobRecord::new(id, markdown);
        self.jobs.insert(id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, EngineError> {
        Ok(self.jobs.get(&id).map(|r| r.value().clone()))
    }

    async fn acquire(&self, id: Uuid) -> Result<JobRecord, EngineError> {
        let mut entry = self.jobs.get_mut(&id).ok_or(EngineError::JobNotFound(id))?;
        let now = Utc::now();
        let claimable = match entry.status {
            JobStatus::Pending => true,
            // A live lease means another worker owns the job.
            JobStatus::Processing => entry.lease_expires_at.is_none_or(|t| t <= now),
            _ => false,
        };
        if !claimable {
            return Err(EngineError::NotRunnable {
                id,
                status: entry.status.as_str().to_string(),
            });
        }
        entry.status = JobStatus::Processing;
        entry.lease_expires_at = Some(now + self.lease);
        entry.updated_at = now;
        Ok(entry.value().clone())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        output: Option<&Path>,
    ) -> Result<(), EngineError> {
        self.mutate(id, |job| {
            job.status = status;
            if let Some(path) = output {
                job.output_path = Some(path.to_path_buf());
            }
            if status.is_terminal() {
                job.completed_at = Some(Utc::now());
                job.lease_expires_at = None;
            }
        })
    }

    async fn set_current_stage(&self, id: Uuid, stage: u8) -> Result<(), EngineError> {
        self.mutate(id, |job| job.current_stage = stage)
    }

    async fn append_error(&self, id: Uuid, record: &ErrorRecord) -> Result<(), EngineError> {
        self.mutate(id, |job| job.errors.push(record.clone()))
    }

    async fn mark_stage_complete(&self, id: Uuid, stage: u8) -> Result<(), EngineError> {
        self.mutate(id, |job| {
            if !job.stages_completed.contains(&stage) {
                job.stages_completed.push(stage);
            }
            job.current_stage = stage;
        })
    }

    async fn update_tokens(&self, id: Uuid, tokens: &TokenUsage) -> Result<(), EngineError> {
        self.mutate(id, |job| job.tokens = tokens.clone())
    }

    async fn increment_retries(&self, id: Uuid) -> Result<u32, EngineError> {
        let mut entry = self.jobs.get_mut(&id).ok_or(EngineError::JobNotFound(id))?;
        entry.total_retries += 1;
        entry.updated_at = Utc::now();
        Ok(entry.total_retries)
    }

    async fn set_degraded(&self, id: Uuid) -> Result<(), EngineError> {
        self.mutate(id, |job| job.degraded = true)
    }

    async fn set_result_meta(
        &self,
        id: Uuid,
        summary: Option<&str>,
        video_duration_secs: Option<f64>,
    ) -> Result<(), EngineError> {
        self.mutate(id, |job| {
            if let Some(summary) = summary {
                job.summary = Some(summary.to_string());
            }
            if video_duration_secs.is_some() {
                job.video_duration_secs = video_duration_secs;
            }
        })
    }

    async fn list(&self, filter: Option<JobStatus>) -> Result<Vec<JobRecord>, EngineError> {
        let mut jobs: Vec<JobRecord> = self
            .jobs
            .iter()
            .map(|r| r.value().clone())
            .filter(|job| filter.is_none_or(|wanted| job.status == wanted))
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, EngineError> {
        Ok(self.jobs.remove(&id).is_some())
    }
}

// ---------------------------------------------------------------------------
// SQLite store
// ---------------------------------------------------------------------------

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    markdown TEXT NOT NULL,
    status TEXT NOT NULL,
    current_stage INTEGER NOT NULL DEFAULT 0,
    stages_completed TEXT NOT NULL DEFAULT '[]',
    output_path TEXT,
    tokens TEXT NOT NULL DEFAULT '{}',
    errors TEXT NOT NULL DEFAULT '[]',
    total_retries INTEGER NOT NULL DEFAULT 0,
    degraded INTEGER NOT NULL DEFAULT 0,
    lease_expires_at TEXT,
    summary TEXT,
    video_duration_secs REAL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
)";

/// Durable job store backed by SQLite.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
    lease: Duration,
}

impl SqliteJobStore {
    /// Opens or creates a database at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let url = format!("sqlite:{}?mode=rwc", path.display());
        Self::connect(&url).await
    }

    /// Connects to an existing `sqlite:` URL.
    pub async fn connect(url: &str) -> Result<Self, EngineError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self {
            pool,
            lease: DEFAULT_LEASE,
        })
    }

    /// Overrides the claim lease.
    #[must_use]
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// The underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_record(row: &SqliteRow) -> Result<JobRecord, EngineError> {
        let id: String = row.get("id");
        let id = Uuid::parse_str(&id).map_err(|e| EngineError::Config(format!("bad job id: {e}")))?;

        let stages_completed: Vec<u8> = serde_json::from_str(&row.get::<String, _>("stages_completed"))?;
        let tokens: TokenUsage = serde_json::from_str(&row.get::<String, _>("tokens"))?;
        let errors: Vec<ErrorRecord> = serde_json::from_str(&row.get::<String, _>("errors"))?;

        let status_raw: String = row.get("status");
        let status = JobStatus::parse(&status_raw)
            .ok_or_else(|| EngineError::Config(format!("unknown job status '{status_raw}'")))?;

        Ok(JobRecord {
            id,
            markdown: row.get("markdown"),
            status,
            current_stage: row.get::<i64, _>("current_stage") as u8,
            stages_completed,
            output_path: row
                .get::<Option<String>, _>("output_path")
                .map(std::path::PathBuf::from),
            tokens,
            errors,
            total_retries: row.get::<i64, _>("total_retries") as u32,
            degraded: row.get::<i64, _>("degraded") != 0,
            lease_expires_at: row
                .get::<Option<String>, _>("lease_expires_at")
                .map(|s| parse_timestamp(&s))
                .transpose()?,
            summary: row.get("summary"),
            video_duration_secs: row.get("video_duration_secs"),
            created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
            updated_at: parse_timestamp(&row.get::<String, _>("updated_at"))?,
            completed_at: row
                .get::<Option<String>, _>("completed_at")
                .map(|s| parse_timestamp(&s))
                .transpose()?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| EngineError::Config(format!("bad timestamp '{s}': {e}")))
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, id: Uuid, markdown: &str) -> Result<JobRecord, EngineError> {
        let record = JobRecord::new(id, markdown);
        sqlx::query(
            "INSERT INTO jobs \
                 (id, markdown, status, current_stage, stages_completed, tokens, errors, \
                  total_retries, degraded, created_at, updated_at) \
             VALUES (?, ?, ?, 0, '[]', ?, '[]', 0, 0, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.markdown)
        .bind(record.status.as_str())
        .bind(serde_json::to_string(&record.tokens)?)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, EngineError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn acquire(&self, id: Uuid) -> Result<JobRecord, EngineError> {
        let now = Utc::now();
        // One conditional UPDATE is the whole claim: a pending job, or a
        // processing job whose lease lapsed. Only one caller can win it.
        let result = sqlx::query(
            "UPDATE jobs SET status = 'processing', lease_expires_at = ?, updated_at = ? \
             WHERE id = ? AND (status = 'pending' \
                 OR (status = 'processing' \
                     AND (lease_expires_at IS NULL OR lease_expires_at < ?)))",
        )
        .bind((now + self.lease).to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get(id).await? {
                Some(job) => Err(EngineError::NotRunnable {
                    id,
                    status: job.status.as_str().to_string(),
                }),
                None => Err(EngineError::JobNotFound(id)),
            };
        }
        self.get(id).await?.ok_or(EngineError::JobNotFound(id))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        output: Option<&Path>,
    ) -> Result<(), EngineError> {
        let completed_at = status.is_terminal().then(|| Utc::now().to_rfc3339());
        sqlx::query(
            "UPDATE jobs SET status = ?, \
                 output_path = COALESCE(?, output_path), \
                 completed_at = COALESCE(?, completed_at), \
                 lease_expires_at = CASE WHEN ? THEN NULL ELSE lease_expires_at END, \
                 updated_at = ? \
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(output.map(|p| p.to_string_lossy().into_owned()))
        .bind(completed_at)
        .bind(status.is_terminal())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_current_stage(&self, id: Uuid, stage: u8) -> Result<(), EngineError> {
        sqlx::query("UPDATE jobs SET current_stage = ?, updated_at = ? WHERE id = ?")
            .bind(i64::from(stage))
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_error(&self, id: Uuid, record: &ErrorRecord) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT errors FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(EngineError::JobNotFound(id))?;

        let mut errors: Vec<ErrorRecord> = serde_json::from_str(&row.get::<String, _>("errors"))?;
        errors.push(record.clone());

        sqlx::query("UPDATE jobs SET errors = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(&errors)?)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn mark_stage_complete(&self, id: Uuid, stage: u8) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT stages_completed FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(EngineError::JobNotFound(id))?;

        let mut stages: Vec<u8> = serde_json::from_str(&row.get::<String, _>("stages_completed"))?;
        if !stages.contains(&stage) {
            stages.push(stage);
        }

        sqlx::query(
            "UPDATE jobs SET stages_completed = ?, current_stage = ?, updated_at = ? WHERE id = ?",
        )
        .bind(serde_json::to_string(&stages)?)
        .bind(i64::from(stage))
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_tokens(&self, id: Uuid, tokens: &TokenUsage) -> Result<(), EngineError> {
        sqlx::query("UPDATE jobs SET tokens = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(tokens)?)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment_retries(&self, id: Uuid) -> Result<u32, EngineError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE jobs SET total_retries = total_retries + 1, updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        let row = sqlx::query("SELECT total_retries FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(EngineError::JobNotFound(id))?;
        tx.commit().await?;
        Ok(row.get::<i64, _>("total_retries") as u32)
    }

    async fn set_degraded(&self, id: Uuid) -> Result<(), EngineError> {
        sqlx::query("UPDATE jobs SET degraded = 1, updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_result_meta(
        &self,
        id: Uuid,
        summary: Option<&str>,
        video_duration_secs: Option<f64>,
    ) -> Result<(), EngineError> {
        sqlx::query(
            "UPDATE jobs SET summary = COALESCE(?, summary), \
                 video_duration_secs = COALESCE(?, video_duration_secs), \
                 updated_at = ? \
             WHERE id = ?",
        )
        .bind(summary)
        .bind(video_duration_secs)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, filter: Option<JobStatus>) -> Result<Vec<JobRecord>, EngineError> {
        let rows = match filter {
            Some(status) => {
                sqlx::query("SELECT * FROM jobs WHERE status = ? ORDER BY created_at DESC")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM jobs ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn delete(&self, id: Uuid) -> Result<bool, EngineError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, StageError};

    fn error_record(stage: u8, retry: u32) -> ErrorRecord {
        let err = StageError::network("connection refused");
        ErrorRecord {
            stage,
            kind: err.kind,
            detail: err.to_string(),
            retry,
            fallback_used: false,
            checkpoint_restored: None,
            at: Utc::now(),
        }
    }

    async fn exercise_store(store: &dyn JobStore) {
        let id = Uuid::new_v4();
        let record = store.create(id, "# Doc").await.unwrap();
        assert_eq!(record.status, JobStatus::Pending);

        // Acquire wins once; terminal statuses refuse.
        let acquired = store.acquire(id).await.unwrap();
        assert_eq!(acquired.status, JobStatus::Processing);

        store.set_current_stage(id, 3).await.unwrap();
        store.append_error(id, &error_record(3, 1)).await.unwrap();
        store.append_error(id, &error_record(3, 2)).await.unwrap();
        store.mark_stage_complete(id, 3).await.unwrap();

        let mut tokens = TokenUsage::default();
        tokens.record(3, 120, 60);
        store.update_tokens(id, &tokens).await.unwrap();

        assert_eq!(store.increment_retries(id).await.unwrap(), 1);
        assert_eq!(store.increment_retries(id).await.unwrap(), 2);

        store
            .update_status(id, JobStatus::Done, Some(Path::new("/out/final.mp4")))
            .await
            .unwrap();

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.lease_expires_at.is_none());
        assert_eq!(job.stages_completed, vec![3]);
        assert_eq!(job.errors.len(), 2);
        assert_eq!(job.errors[0].kind, ErrorKind::Network);
        assert_eq!(job.errors[1].retry, 2);
        assert_eq!(job.tokens.total, 180);
        assert_eq!(job.total_retries, 2);
        assert!(job.completed_at.is_some());
        assert_eq!(
            job.output_path.as_deref(),
            Some(Path::new("/out/final.mp4"))
        );

        // Terminal job refuses re-acquisition.
        assert!(matches!(
            store.acquire(id).await,
            Err(EngineError::NotRunnable { .. })
        ));

        let done = store.list(Some(JobStatus::Done)).await.unwrap();
        assert_eq!(done.len(), 1);
        let pending = store.list(Some(JobStatus::Pending)).await.unwrap();
        assert!(pending.is_empty());

        assert!(store.delete(id).await.unwrap());
        assert!(!store.delete(id).await.unwrap());
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_lifecycle() {
        let store = MemoryJobStore::new();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_lifecycle() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteJobStore::open(tmp.path().join("jobs.db")).await.unwrap();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("jobs.db");
        let id = Uuid::new_v4();

        {
            let store = SqliteJobStore::open(&db_path).await.unwrap();
            store.create(id, "# Persistent").await.unwrap();
            store.acquire(id).await.unwrap();
            store.mark_stage_complete(id, 0).await.unwrap();
        }

        let store = SqliteJobStore::open(&db_path).await.unwrap();
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.stages_completed, vec![0]);
    }

    #[tokio::test]
    async fn test_acquire_missing_job() {
        let store = MemoryJobStore::new();
        assert!(matches!(
            store.acquire(Uuid::new_v4()).await,
            Err(EngineError::JobNotFound(_))
        ));
    }

    async fn assert_live_lease_blocks(store: &dyn JobStore) {
        let id = Uuid::new_v4();
        store.create(id, "doc").await.unwrap();

        let first = store.acquire(id).await.unwrap();
        assert_eq!(first.status, JobStatus::Processing);
        assert!(first.lease_expires_at.is_some());

        // The job is live on another worker; the claim must be refused.
        assert!(matches!(
            store.acquire(id).await,
            Err(EngineError::NotRunnable { .. })
        ));
    }

    async fn assert_lapsed_lease_reacquires(store: &dyn JobStore) {
        let id = Uuid::new_v4();
        store.create(id, "doc").await.unwrap();
        store.acquire(id).await.unwrap();

        // With a zero lease the first claim lapses immediately, which is
        // how a crashed worker's job looks to the next one.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = store.acquire(id).await.unwrap();
        assert_eq!(second.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_memory_live_lease_blocks_second_acquire() {
        assert_live_lease_blocks(&MemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn test_memory_lapsed_lease_can_be_reacquired() {
        assert_lapsed_lease_reacquires(&MemoryJobStore::with_lease(Duration::ZERO)).await;
    }

    #[tokio::test]
    async fn test_sqlite_live_lease_blocks_second_acquire() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteJobStore::open(tmp.path().join("jobs.db")).await.unwrap();
        assert_live_lease_blocks(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_lapsed_lease_can_be_reacquired() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteJobStore::open(tmp.path().join("jobs.db"))
            .await
            .unwrap()
            .with_lease(Duration::ZERO);
        assert_lapsed_lease_reacquires(&store).await;
    }

    #[tokio::test]
    async fn test_error_history_is_append_only_ordered() {
        let store = MemoryJobStore::new();
        let id = Uuid::new_v4();
        store.create(id, "doc").await.unwrap();

        for retry in 1..=3 {
            store.append_error(id, &error_record(4, retry)).await.unwrap();
        }

        let job = store.get(id).await.unwrap().unwrap();
        let retries: Vec<u32> = job.errors.iter().map(|e| e.retry).collect();
        assert_eq!(retries, vec![1, 2, 3]);
    }
}
