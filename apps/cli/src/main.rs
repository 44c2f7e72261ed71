//! `cascade` — run and validate workflow definitions from the command line.
//!
//! Exit status: 0 when every instance completed or was served from the
//! cache, 1 when any instance failed or was blocked, 2 when the workflow
//! document failed to load or validate.

mod steps;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cascade_engine::{
    ClusterExecutor, Executor, ExecutionReport, SerialExecutor, SpoolWorker, WorkerPoolExecutor,
    WorkflowEngine,
};
use cascade_execution::{ExecutionPlan, RunLedger};
use cascade_workflow::{WorkflowDefinition, validate_workflow};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

const STATE_DIR: &str = ".cascade";
const SPOOL_DIR: &str = "spool";

#[derive(Parser)]
#[command(
    name = "cascade",
    version,
    about = "Content-addressed workflow orchestration"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a workflow definition.
    Run {
        /// Path to the workflow document (.json, .yaml, or .yml).
        workflow: PathBuf,

        /// Working-directory root: holds the run ledger, per-instance
        /// scratch space, and the cluster spool. Re-running against the
        /// same root resumes from its ledger.
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Execution backend.
        #[arg(long, value_enum, default_value_t = Backend::Serial)]
        backend: Backend,

        /// Worker slots for the pool backend.
        #[arg(long, default_value_t = 4)]
        concurrency: usize,

        /// Per-instance timeout in seconds, overriding the workflow default.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Validate a workflow definition without executing anything.
    Validate {
        /// Path to the workflow document (.json, .yaml, or .yml).
        workflow: PathBuf,
    },

    /// Drain a cluster spool: the worker half of the cluster backend.
    Worker {
        /// Working-directory root shared with the submitting run.
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Spool polling interval in milliseconds.
        #[arg(long, default_value_t = 250)]
        poll_millis: u64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    /// One instance at a time, in-process.
    Serial,
    /// A bounded pool of concurrent in-process workers.
    Pool,
    /// Spool submissions for external `cascade worker` processes.
    Cluster,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run_command(cli.command).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(2)
        }
    }
}

async fn run_command(command: Command) -> Result<ExitCode> {
    match command {
        Command::Run {
            workflow,
            root,
            backend,
            concurrency,
            timeout_secs,
        } => run_workflow(&workflow, &root, backend, concurrency, timeout_secs).await,
        Command::Validate { workflow } => validate_document(&workflow),
        Command::Worker { root, poll_millis } => run_worker(&root, poll_millis).await,
    }
}

async fn run_workflow(
    path: &Path,
    root: &Path,
    backend: Backend,
    concurrency: usize,
    timeout_secs: Option<u64>,
) -> Result<ExitCode> {
    let mut definition = load_workflow(path)?;
    if let Some(code) = report_validation_errors(&definition) {
        return Ok(code);
    }
    if let Some(secs) = timeout_secs {
        definition.config.step_timeout = Some(Duration::from_secs(secs));
    }

    let ledger = Arc::new(
        RunLedger::open(root)
            .with_context(|| format!("cannot open run ledger under {}", root.display()))?,
    );

    let executor: Arc<dyn Executor> = match backend {
        Backend::Serial => Arc::new(SerialExecutor::new()),
        Backend::Pool => Arc::new(WorkerPoolExecutor::new(concurrency)),
        Backend::Cluster => Arc::new(ClusterExecutor::new(
            root.join(STATE_DIR).join(SPOOL_DIR),
        )),
    };

    let engine = WorkflowEngine::new(steps::builtin_registry(), ledger, executor)
        .with_workdir_root(root.join(STATE_DIR));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling run");
            interrupt.cancel();
        }
    });

    let report = engine
        .execute_with_cancellation(&definition, cancel)
        .await
        .context("execution failed to start")?;

    print_report(&definition, &report);
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn validate_document(path: &Path) -> Result<ExitCode> {
    let definition = load_workflow(path)?;
    if let Some(code) = report_validation_errors(&definition) {
        return Ok(code);
    }

    // Expansion errors (zip mismatches, bad axis defaults) are validation
    // failures too; surface them before anyone tries to run.
    match ExecutionPlan::from_workflow(&definition) {
        Ok(plan) => {
            println!(
                "{}: {} nodes, {} connections, {} instances",
                definition.name,
                definition.nodes.len(),
                definition.connections.len(),
                plan.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            eprintln!("invalid: {error}");
            Ok(ExitCode::from(2))
        }
    }
}

async fn run_worker(root: &Path, poll_millis: u64) -> Result<ExitCode> {
    let spool = root.join(STATE_DIR).join(SPOOL_DIR);
    std::fs::create_dir_all(&spool)
        .with_context(|| format!("cannot create spool dir {}", spool.display()))?;

    let worker = SpoolWorker::new(&spool, steps::builtin_registry())
        .with_poll_interval(Duration::from_millis(poll_millis.max(1)));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    tracing::info!(spool = %spool.display(), "worker draining spool");
    worker.run(cancel).await;
    Ok(ExitCode::SUCCESS)
}

fn load_workflow(path: &Path) -> Result<WorkflowDefinition> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read workflow document {}", path.display()))?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    match extension {
        "yaml" | "yml" => serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid YAML workflow in {}", path.display())),
        _ => serde_json::from_str(&raw)
            .with_context(|| format!("invalid JSON workflow in {}", path.display())),
    }
}

/// Print every definition-level validation error; `Some(exit code)` when
/// the document is invalid.
fn report_validation_errors(definition: &WorkflowDefinition) -> Option<ExitCode> {
    let errors = validate_workflow(definition);
    if errors.is_empty() {
        return None;
    }
    for error in &errors {
        eprintln!("invalid: {error}");
    }
    Some(ExitCode::from(2))
}

fn print_report(definition: &WorkflowDefinition, report: &ExecutionReport) {
    println!(
        "{}: {} — completed {}, cached {}, failed {}, blocked {}, cancelled {} ({} ms)",
        definition.name,
        report.status,
        report.completed.len(),
        report.cached.len(),
        report.failed.len(),
        report.blocked.len(),
        report.cancelled.len(),
        report.duration.as_millis()
    );

    for id in &report.failed {
        let message = report.errors.get(id).map_or("unknown error", String::as_str);
        println!("  failed  {id}: {message}");
    }
    for id in &report.blocked {
        let message = report.errors.get(id).map_or("unknown error", String::as_str);
        println!("  blocked {id}: {message}");
    }
}
