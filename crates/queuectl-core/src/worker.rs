//! The single-threaded claim→execute→update loop run inside one OS process.

use std::time::Duration;

use tokio::time::sleep;

use crate::error::Result;
use crate::executor::Executor;
use crate::store::job::FailOutcome;
use crate::store::Store;

const POLL_FLOOR: Duration = Duration::from_millis(500);
const POLL_CEILING: Duration = Duration::from_secs(3);

/// Runs the claim/execute/update loop until asked to shut down.
pub struct Worker {
    id: String,
    store: Store,
}

impl Worker {
    pub fn new(id: String, store: Store) -> Self {
        Self { id, store }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run the loop. `shutting_down` is polled between claims only, never
    /// mid-execution, so an in-flight job always finishes and has its store
    /// update written before this function returns.
    pub async fn run(&self, shutting_down: impl Fn() -> bool) -> Result<()> {
        let mut poll_interval = POLL_FLOOR;

        loop {
            if shutting_down() {
                tracing::info!(worker_id = %self.id, "shutdown requested, exiting cleanly");
                return Ok(());
            }

            let job = match self.store.claim(&self.id).await {
                Ok(job) => job,
                Err(e) => {
                    tracing::error!(worker_id = %self.id, error = %e, "store error during claim");
                    return Err(e);
                }
            };

            let job = match job {
                Some(job) => job,
                None => {
                    sleep(poll_interval).await;
                    poll_interval = (poll_interval * 2).min(POLL_CEILING);
                    continue;
                }
            };
            poll_interval = POLL_FLOOR;

            let config = self.store.get_config().await?;
            let timeout = Duration::from_secs(config.job_timeout as u64);

            tracing::info!(worker_id = %self.id, job_id = %job.id, "executing job");
            let outcome = Executor::execute(&job.command, timeout).await;

            if outcome.succeeded() {
                self.store
                    .complete(&job.id, &outcome.stdout, &outcome.stderr)
                    .await?;
            } else {
                let exit_code = outcome.exit_code_for_store();
                let error = outcome.error_summary();
                match self
                    .store
                    .fail(&job.id, exit_code, &outcome.stdout, &outcome.stderr, &error)
                    .await?
                {
                    FailOutcome::RetryScheduled => {
                        tracing::warn!(worker_id = %self.id, job_id = %job.id, "job failed, retry scheduled");
                    }
                    FailOutcome::Dead => {
                        tracing::warn!(worker_id = %self.id, job_id = %job.id, "job dead-lettered");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::job::JobPriority;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let store = Store::open(path.to_str().unwrap()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn completes_a_single_job_then_shuts_down() {
        let (store, _dir) = test_store().await;
        store
            .enqueue("echo done", JobPriority::Normal, None)
            .await
            .unwrap();

        let worker = Worker::new("w1".to_string(), store.clone());
        let claims_done = Arc::new(AtomicUsize::new(0));
        let claims_done_clone = claims_done.clone();

        worker
            .run(move || claims_done_clone.fetch_add(1, Ordering::SeqCst) >= 1)
            .await
            .unwrap();

        let jobs = store.list(None).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].state().unwrap(), crate::store::job::JobState::Completed);
    }
}
