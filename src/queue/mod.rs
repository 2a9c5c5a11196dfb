use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rand::Rng;
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;

use crate::error::{AppError, Result};

pub mod worker;

pub use worker::{JobHandler, WorkerPool};

/// Queue consumed by the payment worker pool.
pub const QUEUE_PAYMENTS: &str = "payments";
/// Queue produced for the (external) notification dispatcher.
pub const QUEUE_NOTIFICATIONS: &str = "notifications";

/// A durable queue record. Jobs survive process crashes; delivery is
/// at-least-once, so every handler must tolerate re-execution.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub kind: String,
    pub args: serde_json::Value,
    pub queue: String,
    pub priority: i64,
    pub state: JobState,
    /// 1-based attempt counter; incremented when the job is claimed.
    pub attempt: i64,
    pub max_attempts: i64,
    pub scheduled_at: DateTime<Utc>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Whether the current attempt is the job's last one.
    pub fn on_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Available,
    Running,
    Completed,
    Discarded,
}

impl JobState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(JobState::Available),
            "running" => Some(JobState::Running),
            "completed" => Some(JobState::Completed),
            "discarded" => Some(JobState::Discarded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub kind: String,
    pub args: serde_json::Value,
    pub queue: String,
    pub priority: i64,
    pub max_attempts: i64,
}

impl NewJob {
    pub fn new(kind: &str, args: serde_json::Value) -> Self {
        Self {
            kind: kind.to_string(),
            args,
            queue: QUEUE_PAYMENTS.to_string(),
            priority: 1,
            max_attempts: 5,
        }
    }

    pub fn on_queue(mut self, queue: &str) -> Self {
        self.queue = queue.to_string();
        self
    }

    /// Lower values claim first.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i64) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Handler error contract. `Retryable` reschedules with backoff until the
/// job runs out of attempts; `Fatal` discards immediately.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Retryable(AppError),

    #[error("fatal: {0}")]
    Fatal(AppError),
}

impl From<AppError> for JobError {
    fn from(err: AppError) -> Self {
        JobError::Retryable(err)
    }
}

#[derive(FromRow)]
struct JobRow {
    id: i64,
    kind: String,
    args: String,
    queue: String,
    priority: i64,
    state: String,
    attempt: i64,
    max_attempts: i64,
    scheduled_at: NaiveDateTime,
    attempted_at: Option<NaiveDateTime>,
    completed_at: Option<NaiveDateTime>,
    last_error: Option<String>,
    created_at: NaiveDateTime,
}

const JOB_COLUMNS: &str = "id, kind, args, queue, priority, state, attempt, max_attempts, \
                           scheduled_at, attempted_at, completed_at, last_error, created_at";

/// Durable work distribution over the relational store. SQLite serializes
/// writers, so the claim UPDATE below is atomic: no two workers can observe
/// the same job as claimable.
pub struct JobQueue {
    pool: SqlitePool,
}

impl JobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(&self, new_job: NewJob) -> Result<Job> {
        let args = serde_json::to_string(&new_job.args)
            .map_err(|e| AppError::Internal(format!("unserializable job args: {}", e)))?;
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (kind, args, queue, priority, max_attempts, scheduled_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new_job.kind)
        .bind(&args)
        .bind(&new_job.queue)
        .bind(new_job.priority)
        .bind(new_job.max_attempts)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        let id = result.last_insert_rowid();
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve enqueued job".to_string()))
    }

    /// Claim the next available job from any of `queues`, marking it
    /// `running` and bumping its attempt counter. Returns `None` when no
    /// job is due.
    pub async fn claim(&self, queues: &[&str]) -> Result<Option<Job>> {
        if queues.is_empty() {
            return Ok(None);
        }

        let placeholders = vec!["?"; queues.len()].join(", ");
        let sql = format!(
            r#"
            UPDATE jobs
            SET state = 'running', attempt = attempt + 1, attempted_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE state = 'available' AND scheduled_at <= ? AND queue IN ({})
                ORDER BY priority ASC, scheduled_at ASC, id ASC
                LIMIT 1
            )
            RETURNING {}
            "#,
            placeholders, JOB_COLUMNS
        );

        let now = Utc::now().naive_utc();
        let mut query = sqlx::query_as::<_, JobRow>(&sql).bind(now).bind(now);
        for queue in queues {
            query = query.bind(*queue);
        }

        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_job(r)?)),
            None => Ok(None),
        }
    }

    pub async fn complete(&self, job: &Job) -> Result<()> {
        let now = Utc::now().naive_utc();
        sqlx::query("UPDATE jobs SET state = 'completed', completed_at = ? WHERE id = ?")
            .bind(now)
            .bind(job.id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    /// Record a handler failure. Retryable errors put the job back on the
    /// queue with backoff; fatal errors and exhausted attempts discard it.
    /// A discarded job is a terminal, operator-visible outcome, never a
    /// silent drop.
    pub async fn fail(&self, job: &Job, error: &JobError) -> Result<()> {
        let discard = matches!(error, JobError::Fatal(_)) || job.on_final_attempt();
        let message = error.to_string();

        if discard {
            tracing::error!(
                job_id = job.id,
                kind = %job.kind,
                attempt = job.attempt,
                "job discarded: {}",
                message
            );
            let now = Utc::now().naive_utc();
            sqlx::query(
                "UPDATE jobs SET state = 'discarded', last_error = ?, completed_at = ? WHERE id = ?",
            )
            .bind(&message)
            .bind(now)
            .bind(job.id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        } else {
            let delay = retry_delay(job.attempt);
            tracing::warn!(
                job_id = job.id,
                kind = %job.kind,
                attempt = job.attempt,
                retry_in_secs = delay.num_seconds(),
                "job failed, rescheduling: {}",
                message
            );
            let next = (Utc::now() + delay).naive_utc();
            sqlx::query(
                "UPDATE jobs SET state = 'available', last_error = ?, scheduled_at = ? WHERE id = ?",
            )
            .bind(&message)
            .bind(next)
            .bind(job.id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        }

        Ok(())
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Job>> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS);
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_job(r)?)),
            None => Ok(None),
        }
    }

    pub async fn list_queue(&self, queue: &str) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE queue = ? ORDER BY id ASC",
            JOB_COLUMNS
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(queue)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_job).collect()
    }

    fn row_to_job(row: JobRow) -> Result<Job> {
        let state = JobState::parse(&row.state)
            .ok_or_else(|| AppError::Database(format!("Invalid job state: {}", row.state)))?;
        let args = serde_json::from_str(&row.args)
            .map_err(|e| AppError::Database(format!("Invalid job args: {}", e)))?;

        Ok(Job {
            id: row.id,
            kind: row.kind,
            args,
            queue: row.queue,
            priority: row.priority,
            state,
            attempt: row.attempt,
            max_attempts: row.max_attempts,
            scheduled_at: DateTime::from_naive_utc_and_offset(row.scheduled_at, Utc),
            attempted_at: row
                .attempted_at
                .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            completed_at: row
                .completed_at
                .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            last_error: row.last_error,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        })
    }
}

/// Bounded exponential backoff with a little jitter so concurrent failures
/// don't reschedule in lockstep.
fn retry_delay(attempt: i64) -> Duration {
    let exp = attempt.clamp(1, 8) as u32;
    let base = 2u64.pow(exp).min(300);
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::seconds((base + jitter) as i64)
}
