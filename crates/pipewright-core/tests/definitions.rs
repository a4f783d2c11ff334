//! Loads the bundled demo pipelines and checks trigger and matrix behavior
//! end to end through the public API.

use std::path::PathBuf;

use pipewright_core::{
    evaluate_trigger, expand, expand_job, load_definition, Event, EventType, JobContext,
    JobId, StepKind, TriggerDecision,
};

fn demo(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../demos")
        .join(name)
}

#[test]
fn ci_demo_triggers_on_master_only() {
    let def = load_definition(&demo("ci.yml")).unwrap();

    let push_master = Event::new(EventType::Push, "master");
    let push_dev = Event::new(EventType::Push, "dev");
    let pr_master = Event::new(EventType::PullRequest, "master");

    assert_eq!(evaluate_trigger(&def, &push_master), TriggerDecision::Run);
    assert_eq!(
        evaluate_trigger(&def, &push_dev),
        TriggerDecision::BranchNotMatched
    );
    assert_eq!(evaluate_trigger(&def, &pr_master), TriggerDecision::Run);
}

#[test]
fn docs_demo_ignores_pull_requests() {
    let def = load_definition(&demo("docs.yml")).unwrap();
    let decision = evaluate_trigger(&def, &Event::new(EventType::PullRequest, "master"));
    assert_eq!(decision, TriggerDecision::EventNotDeclared);

    let job = def.jobs.get("docs").unwrap();
    let deploy = job.deploy.as_ref().unwrap();
    assert!(deploy.clean);
    assert!(deploy.single_commit);
    assert!(deploy.clean_exclude.contains("index.html"));
}

#[test]
fn ci_demo_expands_to_two_targets() {
    let def = load_definition(&demo("ci.yml")).unwrap();
    let job = def.jobs.get("build").unwrap();
    assert!(!job.strategy.fail_fast);

    let expansion = expand_job(job);
    assert_eq!(expansion.len(), 2);
    assert!(expansion.unmatched_includes.is_empty());

    let contexts: Vec<_> = expansion
        .combinations
        .into_iter()
        .map(|c| JobContext::new(&def.env, "build", job, c))
        .collect();

    assert_eq!(contexts[0].platform, "windows-latest");
    assert_eq!(contexts[0].combination.get("target"), Some("i686-pc-windows-msvc"));
    assert_eq!(contexts[1].platform, "ubuntu-latest");
    assert_eq!(contexts[1].combination.get("target"), Some("i686-unknown-linux-gnu"));
    assert_eq!(contexts[1].env["CARGO_TERM_COLOR"], "always");

    let ids: Vec<JobId> = contexts.iter().map(|c| c.id.clone()).collect();
    assert_ne!(ids[0].digest(), ids[1].digest());
}

#[test]
fn ci_demo_guards_linux_only_step() {
    let def = load_definition(&demo("ci.yml")).unwrap();
    let job = def.jobs.get("build").unwrap();
    let guarded = job
        .steps
        .iter()
        .find(|s| s.name.as_deref() == Some("Install 32-bit libraries"))
        .unwrap();

    let expansion = expand_job(job);
    let outcomes: Vec<bool> = expansion
        .combinations
        .into_iter()
        .map(|c| JobContext::new(&def.env, "build", job, c))
        .map(|ctx| guarded.condition.as_ref().unwrap().evaluate(&ctx))
        .collect();
    assert_eq!(outcomes, vec![false, true]);

    let StepKind::Command { run } = &job.steps[3].kind else {
        panic!("expected a command step");
    };
    assert_eq!(run, "cargo build --target ${{ matrix.target }}");
}

#[test]
fn cross_product_size_matches_axis_cardinalities() {
    use pipewright_core::MatrixSpec;

    for (a, b, c) in [(1, 1, 1), (2, 3, 1), (3, 2, 4), (5, 1, 2)] {
        let axis = |prefix: &str, n: usize| -> Vec<String> {
            (0..n).map(|i| format!("{}{}", prefix, i)).collect()
        };
        let spec = MatrixSpec::new()
            .axis("a", axis("a", a))
            .axis("b", axis("b", b))
            .axis("c", axis("c", c))
            .include([("a", "a0"), ("extra", "yes")]);
        let expansion = expand(&spec);
        assert_eq!(expansion.len(), a * b * c);

        let mut tuples: Vec<_> = expansion.combinations.iter().map(|c| c.values.clone()).collect();
        tuples.sort();
        tuples.dedup();
        assert_eq!(tuples.len(), a * b * c);

        let tagged = expansion
            .combinations
            .iter()
            .filter(|c| c.get("extra") == Some("yes"))
            .count();
        assert_eq!(tagged, b * c);
    }
}
