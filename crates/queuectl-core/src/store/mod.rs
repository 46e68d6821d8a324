//! Durable job store.
//!
//! `Store` is the sole owner of `queue.db`: schema, state transitions, the
//! atomic claim protocol, configuration persistence and the worker registry.
//! It is the only component shared across OS process boundaries — every
//! other piece of the crate (`Executor`, `Worker`, `Supervisor`) talks to the
//! world exclusively through a `Store` handle.

pub mod job;

use std::collections::HashMap;

use chrono::Local;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use job::{AttemptRecord, FailOutcome, JobPriority, JobRow, JobState};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Format the current local time the way every timestamp column in
/// `queue.db` is stored, so plain string comparison matches chronological
/// order (SQLite has no dedicated datetime type).
pub fn now_string() -> String {
    Local::now().format(TIME_FORMAT).to_string()
}

/// Parse a `run_at` value supplied by a caller (either the spec's
/// `YYYY-MM-DD HH:MM:SS` form or the fully-qualified stored form with
/// milliseconds) into the canonical stored representation.
pub fn parse_time(value: &str) -> Result<String> {
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(value, TIME_FORMAT) {
        return Ok(dt.format(TIME_FORMAT).to_string());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.format(TIME_FORMAT).to_string());
    }
    Err(Error::validation(format!(
        "run_at must look like 'YYYY-MM-DD HH:MM:SS', got {value:?}"
    )))
}

/// Aggregate counts and rates returned by `Store::metrics`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub dead: i64,
    pub success_rate: f64,
    pub average_attempts: f64,
    pub completed_last_24h: i64,
    pub dead_last_24h: i64,
}

/// A registered worker process.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub pid: i64,
    pub started_at: String,
}

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if absent) the SQLite-backed store at `path`, enabling
    /// WAL mode so the Supervisor process and every independent Worker
    /// process can share the file safely.
    pub async fn open(path: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&format!("sqlite:{path}?mode=rwc"))
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

        let store = Self { pool };
        store.init_schema().await?;
        tracing::info!(db = path, "store opened");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id          TEXT PRIMARY KEY,
                command     TEXT NOT NULL,
                state       TEXT NOT NULL,
                priority    INTEGER NOT NULL,
                attempts    INTEGER NOT NULL DEFAULT 0,
                run_at      TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                started_at  TEXT,
                finished_at TEXT,
                worker_id   TEXT,
                exit_code   INTEGER,
                stdout      TEXT,
                stderr      TEXT,
                error       TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs (state, run_at, priority)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workers (
                worker_id  TEXT PRIMARY KEY,
                pid        INTEGER NOT NULL,
                started_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attempts (
                job_id      TEXT NOT NULL,
                attempt     INTEGER NOT NULL,
                outcome     TEXT NOT NULL,
                exit_code   INTEGER,
                error       TEXT,
                delay_secs  INTEGER,
                recorded_at TEXT NOT NULL,
                PRIMARY KEY (job_id, attempt)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ---- configuration -------------------------------------------------

    /// Read the live configuration, applying stored overrides on top of
    /// defaults. Called by the worker before every job execution so
    /// `config set` takes effect without restarting the pool.
    pub async fn get_config(&self) -> Result<RuntimeConfig> {
        let rows = sqlx::query("SELECT key, value FROM config")
            .fetch_all(&self.pool)
            .await?;
        let mut map = HashMap::new();
        for row in rows {
            let key: String = row.try_get("key")?;
            let value: String = row.try_get("value")?;
            map.insert(key, value);
        }
        RuntimeConfig::from_rows(map)
    }

    /// Validate and persist a single configuration key.
    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        RuntimeConfig::validate(key, value)?;
        sqlx::query(
            "INSERT INTO config (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        tracing::info!(key, value, "configuration updated");
        Ok(())
    }

    // ---- jobs ------------------------------------------------------------

    /// Insert a new job in `pending` state. Validates `priority` and
    /// non-empty `command` at this boundary too, even though the CLI layer
    /// already validates — internal callers must never be able to write an
    /// invalid row.
    pub async fn enqueue(
        &self,
        command: &str,
        priority: JobPriority,
        run_at: Option<&str>,
    ) -> Result<String> {
        if command.trim().is_empty() {
            return Err(Error::validation("command must not be empty"));
        }
        let id = Uuid::new_v4().to_string();
        let now = now_string();
        let run_at = match run_at {
            Some(value) => parse_time(value)?,
            None => now.clone(),
        };

        sqlx::query(
            r#"
            INSERT INTO jobs
                (id, command, state, priority, attempts, run_at, created_at, updated_at)
            VALUES
                (?, ?, 'pending', ?, 0, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(command)
        .bind(priority.as_i64())
        .bind(&run_at)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        tracing::info!(job_id = %id, priority = priority.as_i64(), "job enqueued");
        Ok(id)
    }

    /// Atomically claim the single highest-priority eligible job.
    ///
    /// One statement: the `SELECT ... LIMIT 1` subquery picks a candidate,
    /// but the outer `UPDATE ... WHERE id = (...) AND state = 'pending'`
    /// re-checks the precondition as part of the same mutation, so SQLite's
    /// per-statement atomicity guarantees no two concurrent callers (even
    /// across separate OS processes sharing this file) can ever claim the
    /// same row — a loser's `WHERE` clause fails to match and it updates
    /// zero rows.
    pub async fn claim(&self, worker_id: &str) -> Result<Option<JobRow>> {
        let now = now_string();
        let row: Option<SqliteRow> = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'processing',
                worker_id = ?,
                started_at = ?,
                updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE state = 'pending' AND run_at <= ?
                ORDER BY priority ASC, run_at ASC, created_at ASC
                LIMIT 1
            )
            AND state = 'pending'
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let job = row_to_job(row)?;
                tracing::info!(job_id = %job.id, worker_id, "job claimed");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Mark a `processing` job as completed.
    pub async fn complete(&self, id: &str, stdout: &str, stderr: &str) -> Result<()> {
        let job = self
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("job {id}")))?;
        if job.state()? != JobState::Processing {
            return Err(Error::validation(format!(
                "job {id} is not in processing state"
            )));
        }

        let now = now_string();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'completed',
                finished_at = ?,
                updated_at = ?,
                exit_code = 0,
                worker_id = NULL,
                stdout = ?,
                stderr = ?,
                error = NULL
            WHERE id = ? AND state = 'processing'
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(stdout)
        .bind(stderr)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::validation(format!(
                "job {id} is not in processing state"
            )));
        }

        self.record_attempt(id, job.attempts + 1, "completed", Some(0), None, None)
            .await?;
        tracing::info!(job_id = id, "job completed");
        Ok(())
    }

    /// Record a failed attempt, deciding between retry-scheduling and
    /// dead-lettering per the live configuration.
    #[allow(clippy::too_many_arguments)]
    pub async fn fail(
        &self,
        id: &str,
        exit_code: Option<i64>,
        stdout: &str,
        stderr: &str,
        error: &str,
    ) -> Result<FailOutcome> {
        let config = self.get_config().await?;
        let job = self
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("job {id}")))?;
        if job.state()? != JobState::Processing {
            return Err(Error::validation(format!(
                "job {id} is not in processing state"
            )));
        }

        let attempts = job.attempts + 1;
        let now = now_string();

        if attempts > config.max_retries {
            sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'dead',
                    attempts = ?,
                    finished_at = ?,
                    updated_at = ?,
                    exit_code = ?,
                    stdout = ?,
                    stderr = ?,
                    error = ?,
                    worker_id = NULL
                WHERE id = ? AND state = 'processing'
                "#,
            )
            .bind(attempts)
            .bind(&now)
            .bind(&now)
            .bind(exit_code)
            .bind(stdout)
            .bind(stderr)
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;

            self.record_attempt(id, attempts, "dead", exit_code, Some(error), None)
                .await?;
            tracing::warn!(job_id = id, attempts, "job dead-lettered");
            Ok(FailOutcome::Dead)
        } else {
            let delay_secs = config.backoff_base.pow(attempts as u32);
            let next_run_at = (Local::now() + chrono::Duration::seconds(delay_secs))
                .format(TIME_FORMAT)
                .to_string();

            sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'pending',
                    attempts = ?,
                    run_at = ?,
                    updated_at = ?,
                    exit_code = ?,
                    stdout = ?,
                    stderr = ?,
                    error = ?,
                    worker_id = NULL,
                    started_at = NULL,
                    finished_at = NULL
                WHERE id = ? AND state = 'processing'
                "#,
            )
            .bind(attempts)
            .bind(&next_run_at)
            .bind(&now)
            .bind(exit_code)
            .bind(stdout)
            .bind(stderr)
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;

            self.record_attempt(
                id,
                attempts,
                "retry_scheduled",
                exit_code,
                Some(error),
                Some(delay_secs),
            )
            .await?;
            tracing::warn!(job_id = id, attempts, delay_secs, "job retry scheduled");
            Ok(FailOutcome::RetryScheduled)
        }
    }

    /// Append one row to a job's retry-attempt audit trail.
    async fn record_attempt(
        &self,
        job_id: &str,
        attempt: i64,
        outcome: &str,
        exit_code: Option<i64>,
        error: Option<&str>,
        delay_secs: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO attempts (job_id, attempt, outcome, exit_code, error, delay_secs, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id, attempt) DO UPDATE SET
                outcome = excluded.outcome,
                exit_code = excluded.exit_code,
                error = excluded.error,
                delay_secs = excluded.delay_secs,
                recorded_at = excluded.recorded_at
            "#,
        )
        .bind(job_id)
        .bind(attempt)
        .bind(outcome)
        .bind(exit_code)
        .bind(error)
        .bind(delay_secs)
        .bind(now_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Return a job's full retry-attempt audit trail, oldest first.
    pub async fn attempt_history(&self, job_id: &str) -> Result<Vec<AttemptRecord>> {
        let rows = sqlx::query_as::<_, AttemptRecord>(
            "SELECT * FROM attempts WHERE job_id = ? ORDER BY attempt ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// List all jobs currently in the `dead` state.
    pub async fn dlq_list(&self) -> Result<Vec<JobRow>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM jobs WHERE state = 'dead' ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Re-enqueue a dead job: resets `attempts` to 0 and clears error state.
    pub async fn dlq_retry(&self, id: &str) -> Result<()> {
        let now = now_string();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending',
                attempts = 0,
                run_at = ?,
                updated_at = ?,
                exit_code = NULL,
                stdout = NULL,
                stderr = NULL,
                error = NULL,
                worker_id = NULL,
                started_at = NULL,
                finished_at = NULL
            WHERE id = ? AND state = 'dead'
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::validation(format!("job {id} is not in the DLQ")));
        }
        tracing::info!(job_id = id, "job re-enqueued from DLQ");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<JobRow>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// List jobs, optionally filtered by state, newest first.
    pub async fn list(&self, state_filter: Option<JobState>) -> Result<Vec<JobRow>> {
        let rows = match state_filter {
            Some(state) => {
                sqlx::query_as::<_, JobRow>(
                    "SELECT * FROM jobs WHERE state = ? ORDER BY created_at DESC",
                )
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, JobRow>("SELECT * FROM jobs ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows)
    }

    /// Aggregate metrics: totals, per-state counts, success rate, average
    /// attempts, and last-24h completion/dead-letter activity.
    pub async fn metrics(&self) -> Result<MetricsSummary> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                SUM(CASE WHEN state = 'pending' THEN 1 ELSE 0 END) AS pending,
                SUM(CASE WHEN state = 'processing' THEN 1 ELSE 0 END) AS processing,
                SUM(CASE WHEN state = 'completed' THEN 1 ELSE 0 END) AS completed,
                SUM(CASE WHEN state = 'dead' THEN 1 ELSE 0 END) AS dead,
                AVG(attempts) AS average_attempts
            FROM jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let pending: i64 = row.try_get::<Option<i64>, _>("pending")?.unwrap_or(0);
        let processing: i64 = row.try_get::<Option<i64>, _>("processing")?.unwrap_or(0);
        let completed: i64 = row.try_get::<Option<i64>, _>("completed")?.unwrap_or(0);
        let dead: i64 = row.try_get::<Option<i64>, _>("dead")?.unwrap_or(0);
        let average_attempts: f64 = row
            .try_get::<Option<f64>, _>("average_attempts")?
            .unwrap_or(0.0);

        let success_rate = if completed + dead > 0 {
            completed as f64 / (completed + dead) as f64
        } else {
            0.0
        };

        let since = (Local::now() - chrono::Duration::hours(24))
            .format(TIME_FORMAT)
            .to_string();

        let completed_last_24h: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE state = 'completed' AND finished_at >= ?",
        )
        .bind(&since)
        .fetch_one(&self.pool)
        .await?;

        let dead_last_24h: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE state = 'dead' AND finished_at >= ?",
        )
        .bind(&since)
        .fetch_one(&self.pool)
        .await?;

        Ok(MetricsSummary {
            total,
            pending,
            processing,
            completed,
            dead,
            success_rate,
            average_attempts,
            completed_last_24h,
            dead_last_24h,
        })
    }

    /// Reset every `processing` row to `pending`, preserving `attempts`.
    ///
    /// Must be called exactly once, by the Supervisor before spawning any
    /// worker process — never by `Store::open` itself, since every worker
    /// process also opens this same store and would otherwise race its
    /// siblings' freshly-claimed rows back to `pending`.
    pub async fn recover_orphans(&self) -> Result<u64> {
        let now = now_string();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending',
                worker_id = NULL,
                started_at = NULL,
                updated_at = ?
            WHERE state = 'processing'
            "#,
        )
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            tracing::warn!(recovered, "recovered orphaned jobs from a prior crash");
        }
        Ok(recovered)
    }

    // ---- worker registry ---------------------------------------------

    pub async fn register_worker(&self, worker_id: &str, pid: u32) -> Result<()> {
        let now = now_string();
        sqlx::query(
            "INSERT INTO workers (worker_id, pid, started_at) VALUES (?, ?, ?)
             ON CONFLICT(worker_id) DO UPDATE SET pid = excluded.pid, started_at = excluded.started_at",
        )
        .bind(worker_id)
        .bind(pid as i64)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_workers(&self) -> Result<Vec<WorkerRecord>> {
        let rows = sqlx::query_as::<_, WorkerRecord>(
            "SELECT worker_id, pid, started_at FROM workers ORDER BY started_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn remove_worker(&self, worker_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM workers WHERE worker_id = ?")
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear_workers(&self) -> Result<()> {
        sqlx::query("DELETE FROM workers").execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_job(row: SqliteRow) -> Result<JobRow> {
    use sqlx::FromRow;
    JobRow::from_row(&row).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let store = Store::open(path.to_str().unwrap()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn enqueue_and_claim_roundtrip() {
        let (store, _dir) = test_store().await;
        let id = store
            .enqueue("echo hi", JobPriority::Normal, None)
            .await
            .unwrap();

        let claimed = store.claim("worker-1").await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.state().unwrap(), JobState::Processing);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn claim_is_exclusive_across_callers() {
        let (store, _dir) = test_store().await;
        store.enqueue("echo hi", JobPriority::Normal, None).await.unwrap();

        let first = store.claim("worker-1").await.unwrap();
        let second = store.claim("worker-2").await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn claim_is_exclusive_under_real_concurrency() {
        let (store, _dir) = test_store().await;
        const JOB_COUNT: usize = 20;
        for i in 0..JOB_COUNT {
            store
                .enqueue(&format!("echo {i}"), JobPriority::Normal, None)
                .await
                .unwrap();
        }

        let mut handles = Vec::with_capacity(JOB_COUNT);
        for i in 0..JOB_COUNT {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim(&format!("worker-{i}")).await.unwrap()
            }));
        }

        let mut claimed_ids = std::collections::HashSet::new();
        for handle in handles {
            if let Some(job) = handle.await.unwrap() {
                assert!(
                    claimed_ids.insert(job.id.clone()),
                    "job {} was claimed by more than one worker",
                    job.id
                );
            }
        }

        assert_eq!(claimed_ids.len(), JOB_COUNT);
    }

    #[tokio::test]
    async fn claim_respects_priority_then_fifo() {
        let (store, _dir) = test_store().await;
        store.enqueue("low", JobPriority::Low, None).await.unwrap();
        let high_id = store.enqueue("high", JobPriority::High, None).await.unwrap();

        let claimed = store.claim("worker-1").await.unwrap().unwrap();
        assert_eq!(claimed.id, high_id);
    }

    #[tokio::test]
    async fn claim_skips_future_run_at() {
        let (store, _dir) = test_store().await;
        let future = (Local::now() + chrono::Duration::seconds(60))
            .format(TIME_FORMAT)
            .to_string();
        store
            .enqueue("echo later", JobPriority::Normal, Some(&future))
            .await
            .unwrap();

        let claimed = store.claim("worker-1").await.unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn complete_clears_worker_and_sets_exit_code() {
        let (store, _dir) = test_store().await;
        let id = store.enqueue("echo hi", JobPriority::Normal, None).await.unwrap();
        store.claim("worker-1").await.unwrap();
        store.complete(&id, "hi\n", "").await.unwrap();

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.state().unwrap(), JobState::Completed);
        assert_eq!(job.exit_code, Some(0));
        assert!(job.worker_id.is_none());
    }

    #[tokio::test]
    async fn fail_schedules_retry_until_max_retries_exceeded() {
        let (store, _dir) = test_store().await;
        store.set_config("max-retries", "1").await.unwrap();
        let id = store.enqueue("exit 1", JobPriority::Normal, None).await.unwrap();

        store.claim("worker-1").await.unwrap();
        let outcome = store.fail(&id, Some(1), "", "", "exit 1").await.unwrap();
        assert_eq!(outcome, FailOutcome::RetryScheduled);
        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.attempts, 1);
        assert_eq!(job.state().unwrap(), JobState::Pending);

        // force it eligible again for the second (final) attempt
        sqlx::query("UPDATE jobs SET run_at = ? WHERE id = ?")
            .bind(now_string())
            .bind(&id)
            .execute(&store.pool)
            .await
            .unwrap();
        store.claim("worker-1").await.unwrap();
        let outcome = store.fail(&id, Some(1), "", "", "exit 1").await.unwrap();
        assert_eq!(outcome, FailOutcome::Dead);
        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.attempts, 2);
        assert_eq!(job.state().unwrap(), JobState::Dead);
    }

    #[tokio::test]
    async fn dlq_retry_resets_attempts() {
        let (store, _dir) = test_store().await;
        store.set_config("max-retries", "0").await.unwrap();
        let id = store.enqueue("exit 1", JobPriority::Normal, None).await.unwrap();
        store.claim("worker-1").await.unwrap();
        store.fail(&id, Some(1), "", "", "exit 1").await.unwrap();

        let dead = store.get(&id).await.unwrap().unwrap();
        assert_eq!(dead.state().unwrap(), JobState::Dead);

        store.dlq_retry(&id).await.unwrap();
        let retried = store.get(&id).await.unwrap().unwrap();
        assert_eq!(retried.state().unwrap(), JobState::Pending);
        assert_eq!(retried.attempts, 0);
    }

    #[tokio::test]
    async fn recover_orphans_resets_processing_rows() {
        let (store, _dir) = test_store().await;
        let id = store.enqueue("echo hi", JobPriority::Normal, None).await.unwrap();
        store.claim("worker-1").await.unwrap();

        let recovered = store.recover_orphans().await.unwrap();
        assert_eq!(recovered, 1);

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.state().unwrap(), JobState::Pending);
        assert!(job.worker_id.is_none());
        assert_eq!(job.attempts, 0);
    }

    #[tokio::test]
    async fn worker_registry_round_trips() {
        let (store, _dir) = test_store().await;
        store.register_worker("w1", 1234).await.unwrap();
        store.register_worker("w2", 5678).await.unwrap();

        let workers = store.list_workers().await.unwrap();
        assert_eq!(workers.len(), 2);

        store.remove_worker("w1").await.unwrap();
        let workers = store.list_workers().await.unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].worker_id, "w2");
    }

    #[tokio::test]
    async fn attempt_history_records_retries_and_final_outcome() {
        let (store, _dir) = test_store().await;
        store.set_config("max-retries", "1").await.unwrap();
        let id = store.enqueue("exit 1", JobPriority::Normal, None).await.unwrap();

        store.claim("worker-1").await.unwrap();
        store.fail(&id, Some(1), "", "", "exit 1").await.unwrap();

        sqlx::query("UPDATE jobs SET run_at = ? WHERE id = ?")
            .bind(now_string())
            .bind(&id)
            .execute(&store.pool)
            .await
            .unwrap();
        store.claim("worker-1").await.unwrap();
        store.complete(&id, "done\n", "").await.unwrap();

        let history = store.attempt_history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].attempt, 1);
        assert_eq!(history[0].outcome, "retry_scheduled");
        assert_eq!(history[1].attempt, 2);
        assert_eq!(history[1].outcome, "completed");
    }
}
