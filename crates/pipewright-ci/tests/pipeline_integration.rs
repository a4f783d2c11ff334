//! Integration tests for the pipeline runner with a scripted executor and
//! in-memory storage fakes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pipewright_ci::testing::ScriptedExecutor;
use pipewright_ci::{
    ActionRegistry, CacheStatus, JobRunner, JobSettings, JobStatus, PipelineRunner, StepRunner,
    StepStatus,
};
use pipewright_core::{
    parse_definition, CacheManager, CacheStore, DefinitionFormat, DeployTarget, Event,
    EventType, PipelineDefinition, TargetResolver,
};
use pipewright_state::fakes::{MemoryCacheStore, MemoryDeployTarget};

struct Harness {
    executor: Arc<ScriptedExecutor>,
    cache: Arc<MemoryCacheStore>,
    target: Arc<MemoryDeployTarget>,
    source: tempfile::TempDir,
}

impl Harness {
    fn new(executor: ScriptedExecutor) -> Self {
        Self::with_target(executor, MemoryDeployTarget::new())
    }

    fn with_target(executor: ScriptedExecutor, target: MemoryDeployTarget) -> Self {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("Cargo.lock"), "lock v1").unwrap();
        std::fs::write(source.path().join("Cargo.toml"), "[package]").unwrap();
        Self {
            executor: Arc::new(executor),
            cache: Arc::new(MemoryCacheStore::new()),
            target: Arc::new(target),
            source,
        }
    }

    fn runner(&self, work_root: Option<&Path>) -> PipelineRunner {
        let steps = StepRunner::new(self.executor.clone(), Arc::new(ActionRegistry::default()));
        let target: Arc<dyn DeployTarget> = self.target.clone();
        let targets: Arc<dyn TargetResolver> = Arc::new(target);
        let cache_store: Arc<dyn CacheStore> = self.cache.clone();
        let jobs = JobRunner::new(
            steps,
            Some(CacheManager::new(cache_store)),
            targets,
            JobSettings {
                source_dir: self.source.path().to_path_buf(),
                work_root: work_root.map(Path::to_path_buf),
            },
        );
        PipelineRunner::new(jobs)
    }
}

fn definition(yaml: &str) -> PipelineDefinition {
    parse_definition(yaml, DefinitionFormat::Yaml).expect("definition parses")
}

fn push(branch: &str) -> Event {
    Event::new(EventType::Push, branch)
}

const THREE_STEPS: &str = r#"
name: CI
on:
  push:
    branches: [master]
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - name: A
        run: step-a
      - name: B
        run: step-b
      - name: C
        run: step-c
"#;

#[tokio::test]
async fn test_failed_step_halts_job() {
    let harness = Harness::new(ScriptedExecutor::new().fail_on("step-b", 2));
    let report = harness.runner(None).run(&definition(THREE_STEPS), &push("master")).await;

    assert_eq!(harness.executor.commands(), vec!["step-a", "step-b"]);
    let job = &report.jobs[0];
    assert_eq!(job.status, JobStatus::Failed);
    let statuses: Vec<_> = job.steps.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Succeeded, StepStatus::Failed, StepStatus::NotRun]
    );
    assert_eq!(job.steps[1].exit_code, Some(2));

    let verdict = report.verdict();
    assert!(!verdict.passed);
    assert_eq!(verdict.violations.len(), 1);
}

#[tokio::test]
async fn test_successful_pipeline() {
    let harness = Harness::new(ScriptedExecutor::new());
    let report = harness.runner(None).run(&definition(THREE_STEPS), &push("master")).await;

    assert!(report.triggered());
    assert!(report.verdict().passed);
    assert_eq!(report.count(JobStatus::Succeeded), 1);
    assert!(!report.run_id.is_empty());
    assert_eq!(harness.executor.commands(), vec!["step-a", "step-b", "step-c"]);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["jobs"][0]["status"], "succeeded");
    assert_eq!(json["decision"], "run");
}

#[tokio::test]
async fn test_untriggered_event_runs_nothing() {
    let harness = Harness::new(ScriptedExecutor::new());
    let report = harness.runner(None).run(&definition(THREE_STEPS), &push("dev")).await;

    assert!(!report.triggered());
    assert!(report.jobs.is_empty());
    assert!(harness.executor.commands().is_empty());
    assert!(report.verdict().passed);
}

#[tokio::test]
async fn test_false_condition_skips_without_changing_status() {
    let yaml = r#"
name: CI
on: { push: { branches: [master] } }
jobs:
  build:
    runs-on: ${{ matrix.os }}
    strategy:
      matrix:
        os: [windows-latest, ubuntu-latest]
    steps:
      - run: build-${{ matrix.os }}
      - name: Linux only
        if: runner.os == 'ubuntu-latest'
        run: apt-get-${{ matrix.os }}
      - run: test-${{ matrix.os }}
"#;
    let harness = Harness::new(ScriptedExecutor::new());
    let report = harness.runner(None).run(&definition(yaml), &push("master")).await;

    assert_eq!(report.jobs.len(), 2);
    let windows = &report.jobs[0];
    assert_eq!(windows.platform, "windows-latest");
    assert_eq!(windows.status, JobStatus::Succeeded);
    assert_eq!(windows.steps[1].status, StepStatus::Skipped);
    assert_eq!(windows.steps[2].status, StepStatus::Succeeded);

    let linux = &report.jobs[1];
    assert_eq!(linux.steps[1].status, StepStatus::Succeeded);

    let commands = harness.executor.commands();
    assert!(commands.contains(&"apt-get-ubuntu-latest".to_string()));
    assert!(!commands.contains(&"apt-get-windows-latest".to_string()));
}

#[tokio::test]
async fn test_skipped_step_after_failure_stays_not_run() {
    let yaml = r#"
name: CI
on: { push: { branches: [master] } }
jobs:
  build:
    runs-on: linux
    steps:
      - run: broken
      - if: "false"
        run: never
"#;
    let harness = Harness::new(ScriptedExecutor::new().fail_on("broken", 1));
    let report = harness.runner(None).run(&definition(yaml), &push("master")).await;
    assert_eq!(report.jobs[0].steps[1].status, StepStatus::NotRun);
}

const MATRIX_FAIL_FAST: &str = r#"
name: CI
on: { push: { branches: [master] } }
jobs:
  build:
    runs-on: ${{ matrix.os }}
    strategy:
      fail-fast: FAIL_FAST
      matrix:
        os: [a, b, c]
    steps:
      - run: build ${{ matrix.os }}
      - run: test ${{ matrix.os }}
  lint:
    runs-on: linux
    steps:
      - run: lint-slow
"#;

fn fail_fast_executor() -> ScriptedExecutor {
    ScriptedExecutor::new()
        .fail_on("build a", 1)
        .delay_on("build b", Duration::from_millis(300))
        .delay_on("build c", Duration::from_millis(300))
        .delay_on("lint-slow", Duration::from_millis(300))
}

#[tokio::test]
async fn test_fail_fast_cancels_siblings() {
    let harness = Harness::new(fail_fast_executor());
    let yaml = MATRIX_FAIL_FAST.replace("FAIL_FAST", "true");
    let report = harness.runner(None).run(&definition(&yaml), &push("master")).await;

    let build = report.job("build");
    assert_eq!(build[0].status, JobStatus::Failed);
    assert_eq!(build[1].status, JobStatus::Cancelled);
    assert_eq!(build[2].status, JobStatus::Cancelled);
    assert_eq!(build[1].steps[1].status, StepStatus::NotRun);

    // Another job definition is outside the fail-fast scope.
    assert_eq!(report.job("lint")[0].status, JobStatus::Succeeded);

    let commands = harness.executor.commands();
    assert!(!commands.iter().any(|c| c.starts_with("test ")));

    let verdict = report.verdict();
    assert!(!verdict.passed);
    assert_eq!(verdict.violations.len(), 3);
}

#[tokio::test]
async fn test_without_fail_fast_siblings_finish() {
    let harness = Harness::new(fail_fast_executor());
    let yaml = MATRIX_FAIL_FAST.replace("FAIL_FAST", "false");
    let report = harness.runner(None).run(&definition(&yaml), &push("master")).await;

    let build = report.job("build");
    assert_eq!(build[0].status, JobStatus::Failed);
    assert_eq!(build[1].status, JobStatus::Succeeded);
    assert_eq!(build[2].status, JobStatus::Succeeded);
    assert_eq!(report.count(JobStatus::Cancelled), 0);

    let commands = harness.executor.commands();
    assert!(commands.contains(&"test b".to_string()));
    assert!(commands.contains(&"test c".to_string()));
}

#[tokio::test]
async fn test_external_cancel_marks_jobs_cancelled() {
    let harness = Harness::new(ScriptedExecutor::new());
    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();
    let report = harness
        .runner(None)
        .run_with_cancel(&definition(THREE_STEPS), &push("master"), cancel)
        .await;
    assert_eq!(report.jobs[0].status, JobStatus::Cancelled);
    assert!(harness.executor.commands().is_empty());
}

#[tokio::test]
async fn test_continue_on_error_does_not_fail_run() {
    let yaml = r#"
name: CI
on: { push: { branches: [master] } }
jobs:
  nightly:
    runs-on: linux
    continue-on-error: true
    steps:
      - run: flaky
  build:
    runs-on: linux
    steps:
      - run: make
"#;
    let harness = Harness::new(ScriptedExecutor::new().fail_on("flaky", 1));
    let report = harness.runner(None).run(&definition(yaml), &push("master")).await;
    assert_eq!(report.job("nightly")[0].status, JobStatus::Failed);
    assert!(report.verdict().passed);
}

#[tokio::test]
async fn test_max_parallel_still_runs_everything() {
    let yaml = r#"
name: CI
on: { push: { branches: [master] } }
jobs:
  build:
    runs-on: linux
    strategy:
      max-parallel: 1
      matrix:
        n: [1, 2, 3, 4]
    steps:
      - run: work ${{ matrix.n }}
"#;
    let harness = Harness::new(ScriptedExecutor::new());
    let report = harness
        .runner(None)
        .with_max_parallel(Some(2))
        .run(&definition(yaml), &push("master"))
        .await;
    assert_eq!(report.count(JobStatus::Succeeded), 4);
    let mut commands = harness.executor.commands();
    commands.sort();
    assert_eq!(commands, vec!["work 1", "work 2", "work 3", "work 4"]);
}

#[tokio::test]
async fn test_oversized_max_parallel_is_unbounded() {
    let yaml = r#"
name: CI
on: { push: { branches: [master] } }
jobs:
  build:
    runs-on: linux
    strategy:
      max-parallel: 18446744073709551615
      matrix:
        n: [1, 2]
    steps:
      - run: work ${{ matrix.n }}
"#;
    let definition = definition(yaml);
    assert_eq!(
        definition.jobs.get("build").unwrap().strategy.max_parallel,
        Some(usize::MAX)
    );

    let harness = Harness::new(ScriptedExecutor::new());
    let report = harness
        .runner(None)
        .with_max_parallel(Some(usize::MAX))
        .run(&definition, &push("master"))
        .await;
    assert_eq!(report.count(JobStatus::Succeeded), 2);
    assert!(report.verdict().passed);
}

#[tokio::test]
async fn test_matrix_interpolation_and_env() {
    let yaml = r#"
name: CI
on: { push: { branches: [master] } }
env:
  CARGO_TERM_COLOR: always
jobs:
  build:
    runs-on: ${{ matrix.os }}
    strategy:
      matrix:
        os: [windows-latest]
        include:
          - os: windows-latest
            target: i686-pc-windows-msvc
    env:
      TARGET: ${{ matrix.target }}
    steps:
      - run: cargo build --target ${{ matrix.target }}
        env:
          RUSTFLAGS: -D warnings
"#;
    let harness = Harness::new(ScriptedExecutor::new());
    harness.runner(None).run(&definition(yaml), &push("master")).await;

    let calls = harness.executor.calls();
    assert_eq!(calls[0].command, "cargo build --target i686-pc-windows-msvc");
    assert_eq!(calls[0].env["TARGET"], "i686-pc-windows-msvc");
    assert_eq!(calls[0].env["MATRIX_OS"], "windows-latest");
    assert_eq!(calls[0].env["CARGO_TERM_COLOR"], "always");
    assert_eq!(calls[0].env["RUSTFLAGS"], "-D warnings");
}

#[tokio::test]
async fn test_actions_checkout_and_toolchain() {
    let yaml = r#"
name: CI
on: { push: { branches: [master] } }
jobs:
  build:
    runs-on: ubuntu-latest
    strategy:
      matrix:
        toolchain: [stable]
    steps:
      - uses: checkout
      - uses: toolchain
        with:
          toolchain: ${{ matrix.toolchain }}
          target: ${{ matrix.target }}
      - run: ls Cargo.toml
      - uses: upload-artifact
"#;
    let harness = Harness::new(ScriptedExecutor::new());
    let work = tempfile::tempdir().unwrap();
    let report = harness
        .runner(Some(work.path()))
        .run(&definition(yaml), &push("master"))
        .await;

    let job = &report.jobs[0];
    assert!(work.path().join(job.id.slug()).join("Cargo.toml").exists());
    assert_eq!(
        harness.executor.commands(),
        vec![
            "rustup toolchain install stable --profile minimal".to_string(),
            "ls Cargo.toml".to_string(),
        ]
    );
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.steps[3]
        .error
        .as_deref()
        .unwrap()
        .contains("unknown action"));
}

const CACHED: &str = r#"
name: CI
on: { push: { branches: [master] } }
jobs:
  build:
    runs-on: ubuntu-latest
    cache:
      path: target
      key-prefix: cargo
      fingerprints: [Cargo.lock]
    steps:
      - run: cargo build
"#;

#[tokio::test]
async fn test_cache_round_trip() {
    let harness = Harness::new(ScriptedExecutor::new().write_on("cargo build", "target/out.bin", "built"));
    let first = harness.runner(None).run(&definition(CACHED), &push("master")).await;
    let CacheStatus::Miss { key, saved } = &first.jobs[0].cache else {
        panic!("expected a miss, got {:?}", first.jobs[0].cache);
    };
    assert!(saved);
    assert!(key.starts_with("ubuntu-latest-cargo-"));
    assert_eq!(harness.cache.put_count(), 1);

    // Second run: no build output, the cache alone provides target/.
    let second = Harness {
        executor: Arc::new(ScriptedExecutor::new()),
        cache: harness.cache.clone(),
        target: harness.target.clone(),
        source: harness.source,
    };
    let work = tempfile::tempdir().unwrap();
    let report = second
        .runner(Some(work.path()))
        .run(&definition(CACHED), &push("master"))
        .await;
    let job = &report.jobs[0];
    assert_eq!(job.cache, CacheStatus::Hit { key: key.clone(), files: 1 });
    assert_eq!(
        std::fs::read(work.path().join(job.id.slug()).join("target/out.bin")).unwrap(),
        b"built"
    );
    assert_eq!(second.cache.put_count(), 1, "a hit is not saved again");
}

#[tokio::test]
async fn test_cache_key_follows_fingerprint() {
    let harness = Harness::new(ScriptedExecutor::new().write_on("cargo build", "target/out.bin", "built"));
    harness.runner(None).run(&definition(CACHED), &push("master")).await;

    std::fs::write(harness.source.path().join("Cargo.lock"), "lock v2").unwrap();
    let report = harness.runner(None).run(&definition(CACHED), &push("master")).await;
    assert!(matches!(report.jobs[0].cache, CacheStatus::Miss { saved: true, .. }));
    assert_eq!(harness.cache.keys().len(), 2);
}

#[tokio::test]
async fn test_cache_not_saved_for_failed_job_or_missing_fingerprint() {
    let harness = Harness::new(
        ScriptedExecutor::new()
            .write_on("cargo build", "target/out.bin", "built")
            .fail_on("cargo build", 101),
    );
    let report = harness.runner(None).run(&definition(CACHED), &push("master")).await;
    assert!(matches!(report.jobs[0].cache, CacheStatus::Miss { saved: false, .. }));
    assert_eq!(harness.cache.put_count(), 0);

    std::fs::remove_file(harness.source.path().join("Cargo.lock")).unwrap();
    let report = harness.runner(None).run(&definition(CACHED), &push("master")).await;
    assert_eq!(report.jobs[0].cache, CacheStatus::Disabled);
    assert_eq!(report.jobs[0].status, JobStatus::Failed);
}

const DOCS: &str = r#"
name: Docs
on: { push: { branches: [master] } }
jobs:
  docs:
    runs-on: ubuntu-latest
    steps:
      - run: cargo doc
    deploy:
      source: target/doc
      target: gh-pages
      clean: true
      clean-exclude: [index.html]
      single-commit: true
"#;

#[tokio::test]
async fn test_clean_deploy_preserves_excluded_files() {
    let target = MemoryDeployTarget::with_files([("index.html", "hand written"), ("old.html", "stale")]);
    let harness = Harness::with_target(
        ScriptedExecutor::new().write_on("cargo doc", "target/doc/new.html", "generated"),
        target,
    );
    let report = harness.runner(None).run(&definition(DOCS), &push("master")).await;

    let job = &report.jobs[0];
    assert_eq!(job.status, JobStatus::Succeeded);
    let listed: Vec<_> = harness.target.list().await.unwrap().into_iter().collect();
    assert_eq!(listed, vec!["index.html", "new.html"]);
    assert_eq!(harness.target.file("index.html").unwrap(), b"hand written");

    let deploy = job.deploy.as_ref().unwrap();
    assert_eq!(deploy.deleted, vec!["old.html"]);
    assert_eq!(deploy.preserved, vec!["index.html"]);
    assert_eq!(harness.target.history().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_deploy_leaves_target_unchanged() {
    let target = MemoryDeployTarget::with_files([("index.html", "hand written"), ("old.html", "stale")])
        .fail_on_write("new.html");
    let harness = Harness::with_target(
        ScriptedExecutor::new().write_on("cargo doc", "target/doc/new.html", "generated"),
        target,
    );
    let report = harness.runner(None).run(&definition(DOCS), &push("master")).await;

    assert_eq!(report.jobs[0].status, JobStatus::Failed);
    assert!(report.jobs[0].deploy.is_none());
    let listed: Vec<_> = harness.target.list().await.unwrap().into_iter().collect();
    assert_eq!(listed, vec!["index.html", "old.html"]);
    assert!(harness.target.history().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_deploy_skipped_when_step_fails() {
    let target = MemoryDeployTarget::with_files([("old.html", "stale")]);
    let harness = Harness::with_target(ScriptedExecutor::new().fail_on("cargo doc", 1), target);
    let report = harness.runner(None).run(&definition(DOCS), &push("master")).await;

    assert_eq!(report.jobs[0].status, JobStatus::Failed);
    assert!(report.jobs[0].deploy.is_none());
    assert!(harness.target.file("old.html").is_some());
}

#[tokio::test]
async fn test_missing_deploy_source_fails_job() {
    let harness = Harness::new(ScriptedExecutor::new());
    let report = harness.runner(None).run(&definition(DOCS), &push("master")).await;
    assert_eq!(report.jobs[0].status, JobStatus::Failed);
    assert!(report.jobs[0]
        .error
        .as_deref()
        .unwrap()
        .contains("does not exist"));
}
