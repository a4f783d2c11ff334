//! pipewright - vendor-neutral CI pipeline runner
//!
//! ## Commands
//!
//! - `run`: evaluate triggers and run a pipeline definition
//! - `validate`: parse and check a definition without running it
//! - `expand`: print the matrix expansion of every job
//! - `check-trigger`: report whether an event would start a run
//! - `cache-key`: compute a cache key from fingerprint files
//! - `deploy`: sync a directory into a filesystem deploy target

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pipewright_ci::{
    ActionRegistry, JobRunner, JobSettings, PipelineRunner, RunReport, ShellExecutor, StepRunner,
};
use pipewright_core::{
    compute_key, evaluate_trigger, expand_job, load_definition, ArtifactDeployer, CacheKey,
    CacheManager, DeployOutcome, DeploySpec, EngineConfig, Event, EventType, FsTargetResolver,
    TriggerDecision,
};
use pipewright_state::{FsCacheStore, FsDeployTarget};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "pipewright")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run CI pipeline definitions locally", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline for an event
    Run {
        /// Pipeline definition (.yml, .yaml or .json)
        file: PathBuf,

        /// Event type (push, pull_request)
        #[arg(short, long, default_value = "push")]
        event: EventType,

        /// Branch the event refers to
        #[arg(short, long)]
        branch: String,

        /// Repository checkout to build
        #[arg(long, env = "PIPEWRIGHT_SOURCE_DIR")]
        source_dir: Option<PathBuf>,

        /// Cache store directory
        #[arg(long, env = "PIPEWRIGHT_CACHE_DIR")]
        cache_dir: Option<PathBuf>,

        /// Keep job workspaces under this directory
        #[arg(long, env = "PIPEWRIGHT_WORK_DIR")]
        work_dir: Option<PathBuf>,

        /// Deploy targets resolve under this directory
        #[arg(long, env = "PIPEWRIGHT_DEPLOY_ROOT")]
        deploy_root: Option<PathBuf>,

        /// Maximum concurrently running jobs
        #[arg(long, env = "PIPEWRIGHT_MAX_PARALLEL")]
        max_parallel: Option<usize>,

        /// Disable cache restore and save
        #[arg(long)]
        no_cache: bool,

        /// Write the full JSON run report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Parse and validate a pipeline definition
    Validate {
        file: PathBuf,
    },

    /// Print the matrix expansion of every job
    Expand {
        file: PathBuf,
    },

    /// Check whether an event triggers a pipeline
    CheckTrigger {
        file: PathBuf,

        #[arg(short, long, default_value = "push")]
        event: EventType,

        #[arg(short, long)]
        branch: String,
    },

    /// Compute a cache key from fingerprint files
    CacheKey {
        /// Runner platform the key is scoped to
        #[arg(long)]
        platform: String,

        #[arg(long, default_value = "cache")]
        prefix: String,

        /// Fingerprint files, hashed in the given order
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Sync a directory into a filesystem deploy target
    Deploy {
        /// Directory of generated artifacts
        #[arg(long)]
        source: PathBuf,

        /// Target directory
        #[arg(long)]
        target: PathBuf,

        /// Delete target files that are not in the source
        #[arg(long)]
        clean: bool,

        /// Paths or globs exempt from clean deletion (repeatable)
        #[arg(long = "exclude")]
        exclude: Vec<String>,

        /// Replace the target history with a single commit
        #[arg(long)]
        single_commit: bool,

        /// Commit message
        #[arg(short, long)]
        message: Option<String>,
    },
}

/// Command-line values, applied on top of `EngineConfig::from_env`.
#[derive(Debug, Default)]
struct RunOverrides {
    source_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    deploy_root: Option<PathBuf>,
    max_parallel: Option<usize>,
}

impl RunOverrides {
    fn apply(self, mut config: EngineConfig) -> EngineConfig {
        if let Some(dir) = self.source_dir {
            config = config.with_source_dir(dir);
        }
        if let Some(dir) = self.cache_dir {
            config.cache_dir = dir;
        }
        if let Some(dir) = self.work_dir {
            config = config.with_work_root(dir);
        }
        if let Some(dir) = self.deploy_root {
            config.deploy_root = dir;
        }
        if let Some(n) = self.max_parallel.filter(|n| *n > 0) {
            config.max_parallel = Some(n);
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    pipewright_core::telemetry::init_tracing(cli.json, level);

    match dispatch(cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

/// Returns whether the command succeeded; `Err` is reserved for usage and
/// I/O problems.
async fn dispatch(command: Commands) -> Result<bool> {
    match command {
        Commands::Run {
            file,
            event,
            branch,
            source_dir,
            cache_dir,
            work_dir,
            deploy_root,
            max_parallel,
            no_cache,
            report,
        } => {
            let overrides = RunOverrides {
                source_dir,
                cache_dir,
                work_dir,
                deploy_root,
                max_parallel,
            };
            let config = overrides.apply(EngineConfig::from_env());
            let cancel = CancellationToken::new();
            spawn_interrupt_handler(cancel.clone());
            let run = cmd_run(&file, Event::new(event, branch), &config, !no_cache, cancel).await?;
            print_run(&run);
            if let Some(path) = report {
                std::fs::write(&path, serde_json::to_vec_pretty(&run)?)
                    .with_context(|| format!("Failed to write report to {}", path.display()))?;
            }
            Ok(run.verdict().passed)
        }
        Commands::Validate { file } => {
            let summary = cmd_validate(&file)?;
            println!(
                "✓ {} is valid: {} job(s), {} instance(s)",
                summary.pipeline, summary.jobs, summary.instances
            );
            Ok(true)
        }
        Commands::Expand { file } => {
            let expansion = cmd_expand(&file)?;
            println!("{}", serde_json::to_string_pretty(&expansion)?);
            Ok(true)
        }
        Commands::CheckTrigger {
            file,
            event,
            branch,
        } => {
            let decision = cmd_check_trigger(&file, &Event::new(event, branch))?;
            println!("{}", serde_json::to_string(&decision)?);
            Ok(decision.should_run())
        }
        Commands::CacheKey {
            platform,
            prefix,
            files,
        } => {
            println!("{}", cmd_cache_key(&platform, &prefix, &files)?);
            Ok(true)
        }
        Commands::Deploy {
            source,
            target,
            clean,
            exclude,
            single_commit,
            message,
        } => {
            let outcome =
                cmd_deploy(&source, &target, clean, exclude, single_commit, message).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(true)
        }
    }
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling remaining jobs");
            cancel.cancel();
        }
    });
}

/// Load a definition and run it with filesystem-backed storage and the shell
/// executor.
async fn cmd_run(
    file: &Path,
    event: Event,
    config: &EngineConfig,
    use_cache: bool,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let definition = load_definition(file)
        .with_context(|| format!("Failed to load pipeline from {}", file.display()))?;

    let cache = if use_cache {
        let store = FsCacheStore::new(&config.cache_dir).with_context(|| {
            format!("Failed to open cache store at {}", config.cache_dir.display())
        })?;
        Some(CacheManager::new(Arc::new(store)))
    } else {
        None
    };

    let steps = StepRunner::new(Arc::new(ShellExecutor), Arc::new(ActionRegistry::default()));
    let jobs = JobRunner::new(
        steps,
        cache,
        Arc::new(FsTargetResolver::new(&config.deploy_root)),
        JobSettings {
            source_dir: config.source_dir.clone(),
            work_root: config.work_root.clone(),
        },
    );
    info!(pipeline = %definition.name, file = %file.display(), "Running pipeline");

    Ok(PipelineRunner::new(jobs)
        .with_max_parallel(config.max_parallel)
        .run_with_cancel(&definition, &event, cancel)
        .await)
}

fn print_run(run: &RunReport) {
    println!("Run ID: {}", run.run_id);
    println!("Pipeline: {} ({} on {})", run.pipeline, run.event.kind, run.event.branch);
    if !run.triggered() {
        println!("Not triggered: {:?}", run.decision);
        return;
    }

    for job in &run.jobs {
        let mark = if job.succeeded() { "✓" } else { "✗" };
        println!("  {} {} [{:?}] ({}ms)", mark, job.id, job.status, job.duration_ms);
        if let Some(error) = &job.error {
            println!("      {}", error);
        }
    }

    let verdict = run.verdict();
    println!();
    println!("Gate: {}", if verdict.passed { "✓ PASSED" } else { "✗ FAILED" });
    for violation in &verdict.violations {
        println!("  - {}", violation);
    }
}

#[derive(Debug, Serialize)]
struct ValidationSummary {
    pipeline: String,
    jobs: usize,
    instances: usize,
}

fn cmd_validate(file: &Path) -> Result<ValidationSummary> {
    let definition = load_definition(file)
        .with_context(|| format!("Invalid pipeline definition {}", file.display()))?;
    let instances = definition.jobs.iter().map(|(_, job)| expand_job(job).len()).sum();
    Ok(ValidationSummary {
        pipeline: definition.name,
        jobs: definition.jobs.len(),
        instances,
    })
}

fn cmd_expand(file: &Path) -> Result<serde_json::Value> {
    let definition = load_definition(file)
        .with_context(|| format!("Failed to load pipeline from {}", file.display()))?;
    let mut jobs = serde_json::Map::new();
    for (name, job) in definition.jobs.iter() {
        let expansion = expand_job(job);
        jobs.insert(name.to_string(), serde_json::to_value(&expansion)?);
    }
    Ok(serde_json::Value::Object(jobs))
}

fn cmd_check_trigger(file: &Path, event: &Event) -> Result<TriggerDecision> {
    let definition = load_definition(file)
        .with_context(|| format!("Failed to load pipeline from {}", file.display()))?;
    Ok(evaluate_trigger(&definition, event))
}

fn cmd_cache_key(platform: &str, prefix: &str, files: &[PathBuf]) -> Result<CacheKey> {
    let contents = files
        .iter()
        .map(|f| {
            std::fs::read(f).with_context(|| format!("Failed to read fingerprint {}", f.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    let inputs: Vec<&[u8]> = contents.iter().map(Vec::as_slice).collect();
    Ok(compute_key(platform, prefix, &inputs))
}

async fn cmd_deploy(
    source: &Path,
    target: &Path,
    clean: bool,
    exclude: Vec<String>,
    single_commit: bool,
    message: Option<String>,
) -> Result<DeployOutcome> {
    let mut spec = DeploySpec::new(source.display().to_string(), target.display().to_string());
    spec.clean = clean;
    spec.clean_exclude = exclude.into_iter().collect();
    spec.single_commit = single_commit;
    spec.message = message;

    let deployer = ArtifactDeployer::new(Arc::new(FsDeployTarget::new(target)));
    deployer
        .deploy(source, &spec)
        .await
        .with_context(|| format!("Deploy to {} failed", target.display()))
}
