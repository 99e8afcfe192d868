use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::backup::Backup;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::encoder::{ExportOptions, ThumbnailSize};
use crate::error::FailureKind;
use crate::retry::BackoffPolicy;
use crate::sqlite::configure_connection;

const JOBS_SCHEMA: &str = include_str!("../../sql/jobs.sql");

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to open jobs database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on jobs database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("jobs path not configured")]
    MissingStore,
    #[error("invalid job status: {0}")]
    InvalidStatus(String),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job {job_id} cannot transition from {status}")]
    InvalidTransition { job_id: String, status: JobStatus },
    #[error("job queue at capacity ({capacity})")]
    QueueFull { capacity: usize },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl JobError {
    pub fn kind(&self) -> FailureKind {
        match self {
            JobError::QueueFull { .. } => FailureKind::ResourceExhausted,
            JobError::Open { .. } | JobError::Execute(_) => FailureKind::Transient,
            _ => FailureKind::Permanent,
        }
    }
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Export,
    Thumbnail,
    Compress,
    Transcribe,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::Export,
        JobKind::Thumbnail,
        JobKind::Compress,
        JobKind::Transcribe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Export => "export",
            JobKind::Thumbnail => "thumbnail",
            JobKind::Compress => "compress",
            JobKind::Transcribe => "transcribe",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "export" => Ok(JobKind::Export),
            "thumbnail" => Ok(JobKind::Thumbnail),
            "compress" => Ok(JobKind::Compress),
            "transcribe" => Ok(JobKind::Transcribe),
            other => Err(JobError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "active" => Ok(JobStatus::Active),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(JobError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Export(ExportOptions),
    Thumbnail {
        sizes: Vec<ThumbnailSize>,
        time_offsets: Vec<f64>,
    },
    Compress {
        target_bitrate_kbps: u64,
    },
    Transcribe {
        language: Option<String>,
    },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Export(_) => JobKind::Export,
            JobPayload::Thumbnail { .. } => JobKind::Thumbnail,
            JobPayload::Compress { .. } => JobKind::Compress,
            JobPayload::Transcribe { .. } => JobKind::Transcribe,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub job_id: String,
    pub kind: JobKind,
    pub video_id: String,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub progress: f64,
    pub priority: i64,
    pub idempotency_key: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProcessingJob {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let payload_raw: String = row.get("payload")?;
        let payload = serde_json::from_str(&payload_raw).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })?;
        Ok(Self {
            job_id: row.get("job_id")?,
            kind: row
                .get::<_, String>("kind")?
                .parse()
                .unwrap_or(JobKind::Export),
            video_id: row.get("video_id")?,
            payload,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or(JobStatus::Queued),
            attempts: row.get::<_, i64>("attempts")? as u32,
            max_attempts: row.get::<_, i64>("max_attempts")? as u32,
            progress: row.get("progress")?,
            priority: row.get::<_, Option<i64>>("priority")?.unwrap_or(0),
            idempotency_key: row.get("idempotency_key")?,
            result: row.get("result")?,
            error: row.get("error")?,
            next_attempt_at: parse_timestamp(row.get("next_attempt_at")?),
            created_at: parse_timestamp(row.get("created_at")?),
            updated_at: parse_timestamp(row.get("updated_at")?),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub kind: Option<JobKind>,
    pub status: Option<JobStatus>,
    pub video_id: Option<String>,
    pub limit: Option<usize>,
}

/// Deterministic key that collapses duplicate submissions of the same work
/// into the already-queued job.
pub fn idempotency_key(video_id: &str, payload: &JobPayload) -> JobResult<String> {
    let canonical = serde_json::to_string(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(video_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(payload.kind().as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone)]
pub struct JobStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
    capacity: usize,
    default_max_attempts: u32,
}

impl Default for JobStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
            capacity: 500,
            default_max_attempts: 3,
        }
    }
}

impl JobStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn capacity(mut self, value: usize) -> Self {
        self.capacity = value.max(1);
        self
    }

    pub fn max_attempts(mut self, value: u32) -> Self {
        self.default_max_attempts = value.max(1);
        self
    }

    pub fn build(self) -> JobResult<JobStore> {
        let path = self.path.ok_or(JobError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(JobStore {
            path,
            flags,
            capacity: self.capacity,
            default_max_attempts: self.default_max_attempts,
        })
    }
}

/// Durable, retryable task queue backed by SQLite. Claims are serialized
/// through `BEGIN IMMEDIATE`; retries are scheduled via `next_attempt_at`.
#[derive(Debug, Clone)]
pub struct JobStore {
    path: PathBuf,
    flags: OpenFlags,
    capacity: usize,
    default_max_attempts: u32,
}

impl JobStore {
    pub fn builder() -> JobStoreBuilder {
        JobStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> JobResult<Self> {
        JobStoreBuilder::new().path(path).build()
    }

    fn open(&self) -> JobResult<Connection> {
        let conn =
            Connection::open_with_flags(&self.path, self.flags).map_err(|source| JobError::Open {
                source,
                path: self.path.clone(),
            })?;
        configure_connection(&conn).map_err(|source| JobError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> JobResult<()> {
        let conn = self.open()?;
        conn.execute_batch(JOBS_SCHEMA)?;
        Ok(())
    }

    /// Enqueues a job, collapsing onto a live job with the same idempotency
    /// key. A full queue yields `QueueFull` backpressure.
    pub fn enqueue(
        &self,
        video_id: &str,
        payload: JobPayload,
        priority: i64,
    ) -> JobResult<ProcessingJob> {
        let key = idempotency_key(video_id, &payload)?;
        let mut conn = self.open()?;
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                "SELECT * FROM processing_jobs
                 WHERE idempotency_key = ?1 AND status IN ('queued', 'active')
                 LIMIT 1",
                [&key],
                ProcessingJob::from_row,
            )
            .optional()?;
        if let Some(job) = existing {
            tx.commit()?;
            return Ok(job);
        }

        let live: i64 = tx.query_row(
            "SELECT COUNT(*) FROM processing_jobs WHERE status IN ('queued', 'active')",
            [],
            |row| row.get(0),
        )?;
        if live as usize >= self.capacity {
            return Err(JobError::QueueFull {
                capacity: self.capacity,
            });
        }

        let job_id = format!("job-{}", Uuid::new_v4().simple());
        tx.execute(
            "INSERT INTO processing_jobs (
                job_id, kind, video_id, payload, status, attempts, max_attempts,
                progress, priority, idempotency_key
            ) VALUES (?1, ?2, ?3, ?4, 'queued', 0, ?5, 0, ?6, ?7)",
            params![
                &job_id,
                payload.kind().as_str(),
                video_id,
                serde_json::to_string(&payload)?,
                self.default_max_attempts,
                priority,
                &key,
            ],
        )?;
        tx.commit()?;
        self.get(&job_id)
    }

    pub fn get(&self, job_id: &str) -> JobResult<ProcessingJob> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT * FROM processing_jobs WHERE job_id = ?1",
            [job_id],
            ProcessingJob::from_row,
        )
        .optional()?
        .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    pub fn list(&self, filter: &JobFilter) -> JobResult<Vec<ProcessingJob>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM processing_jobs
             WHERE (?1 IS NULL OR kind = ?1)
               AND (?2 IS NULL OR status = ?2)
               AND (?3 IS NULL OR video_id = ?3)
             ORDER BY created_at DESC
             LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(
                params![
                    filter.kind.map(|kind| kind.as_str()),
                    filter.status.map(|status| status.as_str()),
                    filter.video_id.as_deref(),
                    filter.limit.unwrap_or(50) as i64,
                ],
                ProcessingJob::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Atomically reserves the next runnable job of `kind`, bumping its
    /// attempt count.
    pub fn claim_next(&self, kind: JobKind) -> JobResult<Option<ProcessingJob>> {
        let conn = self.open()?;
        conn.execute("BEGIN IMMEDIATE TRANSACTION", [])?;
        let candidate = {
            let mut stmt = conn.prepare(
                "SELECT * FROM processing_jobs
                 WHERE status = 'queued' AND kind = ?1
                   AND (next_attempt_at IS NULL OR next_attempt_at <= ?2)
                 ORDER BY priority DESC, created_at ASC
                 LIMIT 1",
            )?;
            stmt.query_row(
                params![kind.as_str(), Utc::now().naive_utc()],
                ProcessingJob::from_row,
            )
            .optional()?
        };
        if let Some(job) = candidate {
            conn.execute(
                "UPDATE processing_jobs
                 SET status = 'active', attempts = attempts + 1,
                     next_attempt_at = NULL, updated_at = CURRENT_TIMESTAMP
                 WHERE job_id = ?1",
                [&job.job_id],
            )?;
            conn.execute("COMMIT", [])?;
            return self.get(&job.job_id).map(Some);
        }
        conn.execute("ROLLBACK", [])?;
        Ok(None)
    }

    pub fn report_progress(&self, job_id: &str, progress: f64) -> JobResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE processing_jobs
             SET progress = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE job_id = ?1 AND status = 'active'",
            params![job_id, progress.clamp(0.0, 1.0)],
        )?;
        if affected == 0 {
            return Err(self.state_error(job_id)?);
        }
        Ok(())
    }

    pub fn complete(&self, job_id: &str, result: &serde_json::Value) -> JobResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE processing_jobs
             SET status = 'completed', progress = 1.0, result = ?2, error = NULL,
                 updated_at = CURRENT_TIMESTAMP
             WHERE job_id = ?1 AND status = 'active'",
            params![job_id, serde_json::to_string(result)?],
        )?;
        if affected == 0 {
            return Err(self.state_error(job_id)?);
        }
        Ok(())
    }

    /// Records a failed attempt. Retryable failures are rescheduled with
    /// backoff until the attempt budget is spent; non-retryable failures
    /// and exhausted budgets go terminal. Returns the resulting status.
    pub fn fail(
        &self,
        job_id: &str,
        error: &str,
        retryable: bool,
        backoff: &BackoffPolicy,
    ) -> JobResult<JobStatus> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let job = tx
            .query_row(
                "SELECT * FROM processing_jobs WHERE job_id = ?1",
                [job_id],
                ProcessingJob::from_row,
            )
            .optional()?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        if job.status != JobStatus::Active {
            return Err(JobError::InvalidTransition {
                job_id: job_id.to_string(),
                status: job.status,
            });
        }
        let outcome = if !retryable || job.attempts >= job.max_attempts {
            tx.execute(
                "UPDATE processing_jobs
                 SET status = 'failed', error = ?2, updated_at = CURRENT_TIMESTAMP
                 WHERE job_id = ?1",
                params![job_id, error],
            )?;
            JobStatus::Failed
        } else {
            let delay = backoff.delay_for(job.attempts.saturating_sub(1));
            let next_attempt = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            tx.execute(
                "UPDATE processing_jobs
                 SET status = 'queued', error = ?2, next_attempt_at = ?3,
                     updated_at = CURRENT_TIMESTAMP
                 WHERE job_id = ?1",
                params![job_id, error, next_attempt.naive_utc()],
            )?;
            JobStatus::Queued
        };
        tx.commit()?;
        Ok(outcome)
    }

    /// Terminal cancellation. Completed, failed and already-cancelled jobs
    /// never transition again.
    pub fn cancel(&self, job_id: &str) -> JobResult<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let job = tx
            .query_row(
                "SELECT * FROM processing_jobs WHERE job_id = ?1",
                [job_id],
                ProcessingJob::from_row,
            )
            .optional()?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        if job.status.terminal() {
            return Err(JobError::InvalidTransition {
                job_id: job_id.to_string(),
                status: job.status,
            });
        }
        tx.execute(
            "UPDATE processing_jobs
             SET status = 'cancelled', updated_at = CURRENT_TIMESTAMP
             WHERE job_id = ?1",
            [job_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Number of queued or active jobs attached to a video.
    pub fn live_count_for_video(&self, video_id: &str) -> JobResult<i64> {
        let conn = self.open()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM processing_jobs
             WHERE video_id = ?1 AND status IN ('queued', 'active')",
            [video_id],
            |row| row.get(0),
        )?)
    }

    pub fn counts(&self) -> JobResult<HashMap<JobStatus, i64>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM processing_jobs GROUP BY status")?;
        let mut counts = HashMap::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            if let Ok(status) = status.parse::<JobStatus>() {
                counts.insert(status, count);
            }
        }
        Ok(counts)
    }

    pub fn backup_to(&self, destination: impl AsRef<Path>) -> JobResult<()> {
        let destination_path = destination.as_ref();
        let source = self.open()?;
        let mut dest = Connection::open(destination_path)?;
        configure_connection(&dest).map_err(|source| JobError::Open {
            source,
            path: destination_path.to_path_buf(),
        })?;
        let backup = Backup::new(&source, &mut dest)?;
        backup.run_to_completion(10, StdDuration::from_millis(50), None)?;
        Ok(())
    }

    fn state_error(&self, job_id: &str) -> JobResult<JobError> {
        let conn = self.open()?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM processing_jobs WHERE job_id = ?1",
                [job_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match status {
            Some(status) => JobError::InvalidTransition {
                job_id: job_id.to_string(),
                status: status.parse().unwrap_or(JobStatus::Queued),
            },
            None => JobError::NotFound(job_id.to_string()),
        })
    }
}

fn parse_timestamp(value: Option<NaiveDateTime>) -> Option<DateTime<Utc>> {
    value.map(|dt| Utc.from_utc_datetime(&dt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_is_deterministic() {
        let payload = JobPayload::Compress {
            target_bitrate_kbps: 1200,
        };
        let a = idempotency_key("vid-1", &payload).unwrap();
        let b = idempotency_key("vid-1", &payload).unwrap();
        assert_eq!(a, b);

        let other = idempotency_key("vid-2", &payload).unwrap();
        assert_ne!(a, other);

        let different = idempotency_key(
            "vid-1",
            &JobPayload::Compress {
                target_bitrate_kbps: 800,
            },
        )
        .unwrap();
        assert_ne!(a, different);
    }
}
