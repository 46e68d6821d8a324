use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{Error, Result};

/// Job priority. Numerically smaller sorts first, so `ORDER BY priority ASC`
/// dispatches high-priority jobs ahead of normal and low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i64)]
pub enum JobPriority {
    High = 1,
    Normal = 2,
    Low = 3,
}

impl JobPriority {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Result<Self> {
        match value {
            1 => Ok(JobPriority::High),
            2 => Ok(JobPriority::Normal),
            3 => Ok(JobPriority::Low),
            other => Err(Error::validation(format!(
                "priority must be 1, 2, or 3, got {other}"
            ))),
        }
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

/// Lifecycle state of a job row.
///
/// `Failed` is never persisted — `Store::fail` transitions a processing job
/// directly to either `Pending` (retry scheduled) or `Dead` in one statement,
/// per the spec's framing of `failed` as a transient state a worker
/// "immediately converts" on the way to its actual resting state. The
/// variant still exists so display code has an exhaustive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    pub fn from_str(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(Error::validation(format!("unknown job state: {other}"))),
        }
    }
}

/// The outcome of a `Store::fail` call, used by the worker loop to decide
/// whether it should keep polling for more work right away or log a
/// dead-letter event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    RetryScheduled,
    Dead,
}

/// One row of a job's retry-attempt audit trail.
///
/// Durable counterpart of an in-memory retry-history list: every
/// `complete`/`fail` call appends one row here rather than accumulating a
/// `Vec` on a process-local struct, since the history must survive worker
/// crashes and be inspectable from any process sharing `queue.db`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub job_id: String,
    pub attempt: i64,
    pub outcome: String,
    pub exit_code: Option<i64>,
    pub error: Option<String>,
    pub delay_secs: Option<i64>,
    pub recorded_at: String,
}

/// A job row as stored in `queue.db`.
///
/// Field names and semantics follow the data model exactly: `state` is
/// stored as text, `priority` as its raw integer, timestamps as
/// lexicographically-sortable local-time strings (`%Y-%m-%d %H:%M:%S%.3f`).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobRow {
    pub id: String,
    pub command: String,
    pub state: String,
    pub priority: i64,
    pub attempts: i64,
    pub run_at: String,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub worker_id: Option<String>,
    pub exit_code: Option<i64>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub error: Option<String>,
}

impl JobRow {
    pub fn state(&self) -> Result<JobState> {
        JobState::from_str(&self.state)
    }

    pub fn priority(&self) -> Result<JobPriority> {
        JobPriority::from_i64(self.priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_round_trips() {
        for p in [JobPriority::High, JobPriority::Normal, JobPriority::Low] {
            assert_eq!(JobPriority::from_i64(p.as_i64()).unwrap(), p);
        }
    }

    #[test]
    fn priority_rejects_out_of_range() {
        assert!(JobPriority::from_i64(0).is_err());
        assert!(JobPriority::from_i64(4).is_err());
    }

    #[test]
    fn high_sorts_before_low() {
        assert!(JobPriority::High < JobPriority::Low);
    }

    #[test]
    fn state_round_trips() {
        for s in [
            JobState::Pending,
            JobState::Processing,
            JobState::Completed,
            JobState::Failed,
            JobState::Dead,
        ] {
            assert_eq!(JobState::from_str(s.as_str()).unwrap(), s);
        }
    }
}
