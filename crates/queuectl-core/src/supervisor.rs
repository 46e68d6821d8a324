//! Lifecycle management for the worker-process pool.

use std::path::PathBuf;
use std::time::Duration;

use sysinfo::{Pid, System};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::Store;

const STOP_GRACE: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A registry entry annotated with whether its PID is still alive.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub pid: i64,
    pub started_at: String,
    pub alive: bool,
}

/// Spawns, signals and reaps the pool of worker subprocesses.
///
/// The Supervisor re-execs the current binary with a hidden
/// `__worker-run --db <path> --id <uuid>` argv per worker, so each worker is
/// an independent OS process sharing only `queue.db`.
pub struct Supervisor {
    store: Store,
    db_path: PathBuf,
    exe_path: PathBuf,
}

impl Supervisor {
    pub fn new(store: Store, db_path: PathBuf, exe_path: PathBuf) -> Self {
        Self {
            store,
            db_path,
            exe_path,
        }
    }

    /// Reset any rows orphaned by a prior crash. Must run exactly once,
    /// before any worker is spawned, to avoid racing freshly-claimed rows
    /// against a sibling worker process's own store open.
    pub async fn recover(&self) -> Result<u64> {
        self.store.recover_orphans().await
    }

    /// Spawn `count` worker processes. Refuses if the registry already has
    /// live entries — a pool is already running.
    pub async fn start(&self, count: u32) -> Result<Vec<String>> {
        let status = self.status().await?;
        if status.iter().any(|w| w.alive) {
            return Err(Error::validation(
                "a worker pool is already running; stop it first".to_string(),
            ));
        }

        let mut spawned = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let worker_id = Uuid::new_v4().to_string();
            let mut cmd = std::process::Command::new(&self.exe_path);
            cmd.arg("__worker-run")
                .arg("--db")
                .arg(&self.db_path)
                .arg("--id")
                .arg(&worker_id);

            let child = cmd
                .spawn()
                .map_err(|e| Error::spawn(format!("failed to spawn worker process: {e}")))?;

            self.store.register_worker(&worker_id, child.id()).await?;
            tracing::info!(worker_id, pid = child.id(), "worker started");
            spawned.push(worker_id);
        }

        Ok(spawned)
    }

    /// Send graceful shutdown to every live worker, wait up to the grace
    /// window, then force-kill stragglers. Always clears the registry.
    pub async fn stop(&self) -> Result<()> {
        let workers = self.store.list_workers().await?;
        if workers.is_empty() {
            return Err(Error::validation("no worker pool is running".to_string()));
        }

        for worker in &workers {
            signal_terminate(worker.pid);
        }

        let deadline = tokio::time::Instant::now() + STOP_GRACE;
        loop {
            let mut system = System::new_all();
            system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
            let still_alive = workers
                .iter()
                .any(|w| system.process(Pid::from_u32(w.pid as u32)).is_some());
            if !still_alive || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let mut system = System::new_all();
        system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
        for worker in &workers {
            if system.process(Pid::from_u32(worker.pid as u32)).is_some() {
                tracing::warn!(worker_id = %worker.worker_id, "worker did not exit gracefully, force-killing");
                signal_kill(worker.pid);
            }
        }

        self.store.clear_workers().await?;
        Ok(())
    }

    pub async fn restart(&self, count: u32) -> Result<Vec<String>> {
        self.stop().await?;
        self.recover().await?;
        self.start(count).await
    }

    /// Return the registry annotated with liveness, garbage-collecting any
    /// entry whose PID is no longer live.
    pub async fn status(&self) -> Result<Vec<WorkerStatus>> {
        let workers = self.store.list_workers().await?;
        let mut system = System::new_all();
        system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

        let mut result = Vec::with_capacity(workers.len());
        for worker in workers {
            let alive = system.process(Pid::from_u32(worker.pid as u32)).is_some();
            if !alive {
                self.store.remove_worker(&worker.worker_id).await?;
            }
            result.push(WorkerStatus {
                worker_id: worker.worker_id,
                pid: worker.pid,
                started_at: worker.started_at,
                alive,
            });
        }
        Ok(result)
    }
}

#[cfg(unix)]
fn signal_terminate(pid: i64) {
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn signal_terminate(_pid: i64) {}

#[cfg(unix)]
fn signal_kill(pid: i64) {
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn signal_kill(_pid: i64) {}

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
    async fn status_garbage_collects_dead_pids() {
        let (store, _dir) = test_store().await;
        // PID 1 is a plausible live process (init); use an implausibly high
        // PID that's very unlikely to be assigned to simulate a dead entry.
        store.register_worker("ghost", 999_999).await.unwrap();

        let supervisor = Supervisor::new(store.clone(), PathBuf::from("queue.db"), PathBuf::from("queuectl"));
        let status = supervisor.status().await.unwrap();
        assert_eq!(status.len(), 1);
        assert!(!status[0].alive);

        let remaining = store.list_workers().await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn stop_without_running_pool_errors() {
        let (store, _dir) = test_store().await;
        let supervisor = Supervisor::new(store, PathBuf::from("queue.db"), PathBuf::from("queuectl"));
        assert!(supervisor.stop().await.is_err());
    }
}
