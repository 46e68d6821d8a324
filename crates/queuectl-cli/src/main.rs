use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use prettytable::{row, Table};

use queuectl_core::{Error, JobPriority, JobRow, JobState, Result, Store, Supervisor};

#[derive(Parser)]
#[command(name = "queuectl", version, about = "A single-node background job queue")]
struct Cli {
    /// Path to the queue database.
    #[arg(long, global = true, default_value = "queue.db")]
    db: PathBuf,

    /// Tracing log level (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a new job. `json` must contain `command` and may contain
    /// `priority` (1|2|3) and `run_at` ("YYYY-MM-DD HH:MM:SS").
    Enqueue {
        json: String,
    },
    /// List jobs, optionally filtered by state.
    List {
        #[arg(long)]
        state: Option<String>,
    },
    /// Show a job's full record, including captured output.
    Job {
        id: String,
    },
    /// Manage the worker pool.
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },
    /// Inspect or replay dead-lettered jobs.
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },
    /// View or change persisted runtime configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Show aggregate queue metrics.
    Metrics,
    /// Show a one-line summary of worker and queue status.
    Status,
    /// Internal: run as a single worker process. Spawned by `worker start`;
    /// not part of the stable CLI surface.
    #[command(hide = true, name = "__worker-run")]
    WorkerRun {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        id: String,
    },
}

#[derive(Subcommand)]
enum WorkerCommands {
    /// Start `count` worker processes.
    Start {
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Gracefully stop all worker processes.
    Stop,
    /// Stop then start the pool with `count` workers.
    Restart {
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Show the worker registry annotated with liveness.
    Status,
}

#[derive(Subcommand)]
enum DlqCommands {
    /// List jobs currently in the DLQ.
    List,
    /// Re-enqueue a dead job, resetting its attempt count.
    Retry { id: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the current configuration.
    Show,
    /// Set a configuration key.
    Set { key: String, value: String },
}

#[derive(serde::Deserialize)]
struct EnqueueRequest {
    command: String,
    #[serde(default)]
    priority: Option<i64>,
    #[serde(default)]
    run_at: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&cli.log_level))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let db_path = cli.db.to_string_lossy().into_owned();
    let store = Store::open(&db_path).await?;

    match cli.command {
        Commands::Enqueue { json } => enqueue(&store, &json).await,
        Commands::List { state } => list(&store, state.as_deref()).await,
        Commands::Job { id } => job(&store, &id).await,
        Commands::Worker { command } => worker_command(&store, &db_path, command).await,
        Commands::Dlq { command } => dlq_command(&store, command).await,
        Commands::Config { command } => config_command(&store, command).await,
        Commands::Metrics => metrics(&store).await,
        Commands::Status => status(&store, &db_path).await,
        Commands::WorkerRun { db, id } => worker_run(&db, &id).await,
    }
}

async fn enqueue(store: &Store, json: &str) -> Result<()> {
    let req: EnqueueRequest = serde_json::from_str(json)?;

    let priority = match req.priority {
        Some(p) => JobPriority::from_i64(p)?,
        None => JobPriority::Normal,
    };

    let id = store
        .enqueue(&req.command, priority, req.run_at.as_deref())
        .await?;
    println!("{id}");
    Ok(())
}

async fn list(store: &Store, state: Option<&str>) -> Result<()> {
    let filter = state.map(JobState::from_str).transpose()?;
    let jobs = store.list(filter).await?;

    let mut table = Table::new();
    table.add_row(row![
        "ID", "STATE", "PRIORITY", "ATTEMPTS", "COMMAND", "RUN_AT"
    ]);
    for job in &jobs {
        table.add_row(row![
            short_id(&job.id),
            colorize_state(&job.state),
            job.priority,
            job.attempts,
            truncate(&job.command, 40),
            job.run_at,
        ]);
    }
    table.printstd();
    Ok(())
}

async fn job(store: &Store, id: &str) -> Result<()> {
    let job = store
        .get(id)
        .await?
        .ok_or_else(|| Error::not_found(format!("job {id}")))?;
    print_job(&job);

    let history = store.attempt_history(id).await?;
    if !history.is_empty() {
        println!("\n{}", "attempts".bold());
        let mut table = Table::new();
        table.add_row(row!["#", "OUTCOME", "EXIT", "DELAY_S", "ERROR", "AT"]);
        for attempt in &history {
            table.add_row(row![
                attempt.attempt,
                attempt.outcome,
                attempt
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                attempt
                    .delay_secs
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                attempt.error.as_deref().unwrap_or("-"),
                attempt.recorded_at,
            ]);
        }
        table.printstd();
    }
    Ok(())
}

fn print_job(job: &JobRow) {
    println!("{}: {}", "id".bold(), job.id);
    println!("{}: {}", "state".bold(), colorize_state(&job.state));
    println!("{}: {}", "command".bold(), job.command);
    println!("{}: {}", "priority".bold(), job.priority);
    println!("{}: {}", "attempts".bold(), job.attempts);
    println!("{}: {}", "run_at".bold(), job.run_at);
    println!("{}: {}", "created_at".bold(), job.created_at);
    println!("{}: {}", "updated_at".bold(), job.updated_at);
    println!(
        "{}: {}",
        "started_at".bold(),
        job.started_at.as_deref().unwrap_or("-")
    );
    println!(
        "{}: {}",
        "finished_at".bold(),
        job.finished_at.as_deref().unwrap_or("-")
    );
    println!(
        "{}: {}",
        "exit_code".bold(),
        job.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string())
    );
    if let Some(error) = &job.error {
        println!("{}: {}", "error".bold(), error);
    }
    if let Some(stdout) = &job.stdout {
        println!("{}:\n{}", "stdout".bold(), stdout);
    }
    if let Some(stderr) = &job.stderr {
        println!("{}:\n{}", "stderr".bold(), stderr);
    }
}

async fn worker_command(store: &Store, db_path: &str, command: WorkerCommands) -> Result<()> {
    let supervisor = supervisor_for(store.clone(), db_path)?;
    match command {
        WorkerCommands::Start { count } => {
            supervisor.recover().await?;
            let ids = supervisor.start(count).await?;
            println!("{} {} worker(s)", "started".green().bold(), ids.len());
        }
        WorkerCommands::Stop => {
            supervisor.stop().await?;
            println!("{}", "stopped worker pool".green().bold());
        }
        WorkerCommands::Restart { count } => {
            let ids = supervisor.restart(count).await?;
            println!("{} {} worker(s)", "restarted".green().bold(), ids.len());
        }
        WorkerCommands::Status => {
            let statuses = supervisor.status().await?;
            print_worker_statuses(&statuses);
        }
    }
    Ok(())
}

fn print_worker_statuses(statuses: &[queuectl_core::WorkerStatus]) {
    let mut table = Table::new();
    table.add_row(row!["WORKER_ID", "PID", "STARTED_AT", "ALIVE"]);
    for status in statuses {
        table.add_row(row![
            short_id(&status.worker_id),
            status.pid,
            status.started_at,
            if status.alive {
                "yes".green().to_string()
            } else {
                "no".red().to_string()
            },
        ]);
    }
    table.printstd();
}

async fn dlq_command(store: &Store, command: DlqCommands) -> Result<()> {
    match command {
        DlqCommands::List => {
            let jobs = store.dlq_list().await?;
            let mut table = Table::new();
            table.add_row(row!["ID", "ATTEMPTS", "COMMAND", "ERROR"]);
            for job in &jobs {
                table.add_row(row![
                    short_id(&job.id),
                    job.attempts,
                    truncate(&job.command, 40),
                    job.error.as_deref().unwrap_or("-"),
                ]);
            }
            table.printstd();
        }
        DlqCommands::Retry { id } => {
            store.dlq_retry(&id).await?;
            println!("{} {}", "re-enqueued".green().bold(), id);
        }
    }
    Ok(())
}

async fn config_command(store: &Store, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = store.get_config().await?;
            for (key, value) in config.as_pairs() {
                println!("{key} = {value}");
            }
        }
        ConfigCommands::Set { key, value } => {
            store.set_config(&key, &value).await?;
            println!("{} {key} = {value}", "set".green().bold());
        }
    }
    Ok(())
}

async fn metrics(store: &Store) -> Result<()> {
    let m = store.metrics().await?;
    println!("{}: {}", "total".bold(), m.total);
    println!("{}: {}", "pending".bold(), m.pending);
    println!("{}: {}", "processing".bold(), m.processing);
    println!("{}: {}", "completed".bold(), m.completed);
    println!("{}: {}", "dead".bold(), m.dead);
    println!("{}: {:.1}%", "success_rate".bold(), m.success_rate * 100.0);
    println!("{}: {:.2}", "average_attempts".bold(), m.average_attempts);
    println!("{}: {}", "completed_last_24h".bold(), m.completed_last_24h);
    println!("{}: {}", "dead_last_24h".bold(), m.dead_last_24h);
    Ok(())
}

async fn status(store: &Store, db_path: &str) -> Result<()> {
    let supervisor = supervisor_for(store.clone(), db_path)?;
    let statuses = supervisor.status().await?;
    let alive = statuses.iter().filter(|s| s.alive).count();
    let m = store.metrics().await?;
    println!(
        "{} {}/{} workers alive, {} pending, {} processing, {} dead",
        "status:".bold(),
        alive,
        statuses.len(),
        m.pending,
        m.processing,
        m.dead,
    );
    Ok(())
}

/// Entry point for a single worker subprocess, spawned by `worker start`.
async fn worker_run(db: &PathBuf, id: &str) -> Result<()> {
    let store = Store::open(&db.to_string_lossy()).await?;
    let worker = queuectl_core::Worker::new(id.to_string(), store);

    let shutting_down = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    #[cfg(unix)]
    {
        let flag = shutting_down.clone();
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            sigterm.recv().await;
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });
    }

    worker
        .run(move || shutting_down.load(std::sync::atomic::Ordering::SeqCst))
        .await
}

fn supervisor_for(store: Store, db_path: &str) -> Result<Supervisor> {
    let exe_path = std::env::current_exe().map_err(Error::from)?;
    Ok(Supervisor::new(store, PathBuf::from(db_path), exe_path))
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn truncate(s: &str, max: usize) -> String {
    let flattened: String = s.chars().map(|c| if c == '\n' { ' ' } else { c }).collect();
    if flattened.chars().count() > max {
        format!("{}…", flattened.chars().take(max).collect::<String>())
    } else {
        flattened
    }
}

fn colorize_state(state: &str) -> colored::ColoredString {
    match state {
        "completed" => state.green(),
        "dead" => state.red().bold(),
        "processing" => state.yellow(),
        "pending" => state.normal(),
        _ => state.normal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn enqueue_list_job_smoke_test() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("queue.db");
        let store = Store::open(db_path.to_str().unwrap()).await.unwrap();

        enqueue(&store, r#"{"command":"echo hi"}"#).await.unwrap();

        let jobs = store.list(None).await.unwrap();
        assert_eq!(jobs.len(), 1);
        let id = jobs[0].id.clone();

        list(&store, None).await.unwrap();
        job(&store, &id).await.unwrap();

        assert!(job(&store, "does-not-exist").await.is_err());
    }
}

