//! End-to-end runs on the local backend against throwaway git repositories.
//!
//! The "test suite" is a shell script printing pytest-style summary lines,
//! so nothing here needs Docker or Python.

use std::path::Path;
use std::process::Command as StdCommand;
use std::sync::Arc;

use f2p_core::{
    ApplyFailureKind, EnvironmentSpec, ErrorKind, InstanceDescriptor, InstanceReport, RunManifest,
    RunnerKind, StepStatus, TestOutcome, TestRole, TransitionLabel,
};
use f2p_eval::{BackendKind, EngineConfig, Evaluator, RunOrchestrator, MANIFEST_FILE, REPORT_FILE};
use tempfile::TempDir;

const ADD: &str = "tests/test_calc.py::test_add";
const SUB: &str = "tests/test_calc.py::test_sub";

const SUITE: &str = r#"#!/bin/sh
echo "============================= test session starts =============================="
if grep -q fixed calc.txt; then
  echo "PASSED tests/test_calc.py::test_add"
else
  echo "FAILED tests/test_calc.py::test_add - AssertionError: assert 1 == 2"
fi
echo "PASSED tests/test_calc.py::test_sub"
echo "========================= 2 tests in 0.01s ========================="
"#;

fn git(dir: &Path, args: &[&str]) -> String {
    let out = StdCommand::new("git")
        .args(["-c", "user.name=f2p", "-c", "user.email=f2p@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git");
    assert!(
        out.status.success(),
        "git {args:?}: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).to_string()
}

struct Fixture {
    repo: TempDir,
    sha: String,
    /// Turns `calc.txt` from broken to fixed.
    patch: String,
}

fn fixture() -> Fixture {
    let repo = tempfile::tempdir().unwrap();
    let dir = repo.path();
    git(dir, &["init", "--quiet"]);
    std::fs::write(dir.join("calc.txt"), "broken\n").unwrap();
    std::fs::write(dir.join("run_tests.sh"), SUITE).unwrap();
    git(dir, &["add", "calc.txt", "run_tests.sh"]);
    git(dir, &["commit", "--quiet", "-m", "base"]);
    let sha = git(dir, &["rev-parse", "HEAD"]).trim().to_string();

    std::fs::write(dir.join("calc.txt"), "fixed\n").unwrap();
    let patch = git(dir, &["diff"]);
    git(dir, &["checkout", "--quiet", "--", "calc.txt"]);
    assert!(patch.contains("+fixed"));

    Fixture { repo, sha, patch }
}

fn descriptor(fx: &Fixture, id: &str) -> InstanceDescriptor {
    InstanceDescriptor {
        id: id.to_string(),
        repository: fx.repo.path().to_string_lossy().into_owned(),
        base_revision: fx.sha.clone(),
        patch: fx.patch.clone(),
        test_targets: vec![ADD.to_string(), SUB.to_string()],
        target_tests: vec![ADD.to_string()],
        guard_tests: vec![SUB.to_string()],
        environment_spec: EnvironmentSpec::new(
            "export OPENAI_API_KEY=sk-live-do-not-leak\necho ready\n",
            RunnerKind::Pytest,
        )
        .with_test_command(vec!["sh".to_string(), "run_tests.sh".to_string()]),
        timeout_seconds: 30,
    }
}

fn config(out: &Path, concurrency: usize) -> EngineConfig {
    let mut config = EngineConfig::default()
        .with_backend(BackendKind::Local)
        .with_output_dir(out)
        .with_concurrency(concurrency);
    config.kill_grace_ms = 2000;
    config
}

fn instance_file(root: &Path, id: &str, name: &str) -> String {
    std::fs::read_to_string(root.join("instances").join(id).join(name))
        .unwrap_or_else(|e| panic!("{id}/{name}: {e}"))
}

/// Test: a patch that fixes the target without breaking the guard
#[tokio::test]
async fn test_fail2pass_instance() {
    let fx = fixture();
    let out = tempfile::tempdir().unwrap();
    let orch = RunOrchestrator::new(config(out.path(), 2));

    let output = orch
        .run(vec![descriptor(&fx, "calc-1")], Some("run-f2p".to_string()))
        .await
        .expect("run failed");

    let report = &output.report.instances[0];
    assert_eq!(report.verdict, TransitionLabel::FailToPass, "{report:#?}");
    assert_eq!(report.build.status, StepStatus::Succeeded);
    assert_eq!(report.apply.status, StepStatus::Succeeded);
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.transitions.len(), 2);
    assert_eq!(report.label_of(ADD), Some(TransitionLabel::FailToPass));
    assert_eq!(report.label_of(SUB), Some(TransitionLabel::PassToPass));
    let add = report.transitions.iter().find(|t| t.test_id == ADD).unwrap();
    assert_eq!(add.role, TestRole::Target);
    assert_eq!(add.before, TestOutcome::Fail);
    assert_eq!(add.after, TestOutcome::Pass);
    assert!(report.env_digest.is_some());

    // Artifacts on disk
    assert!(output.root.join(REPORT_FILE).is_file());
    assert!(output.root.join(MANIFEST_FILE).is_file());
    let descriptor_json = instance_file(&output.root, "calc-1", "descriptor.json");
    assert!(!descriptor_json.contains("sk-live-do-not-leak"));
    let build_log = instance_file(&output.root, "calc-1", "build.log");
    assert!(build_log.contains("ready"));
    assert!(!build_log.contains("sk-live-do-not-leak"));
    assert!(instance_file(&output.root, "calc-1", "before.stdout").contains("FAILED"));
    assert!(instance_file(&output.root, "calc-1", "after.stdout").contains(&format!("PASSED {ADD}")));
    assert_eq!(instance_file(&output.root, "calc-1", "patch.diff"), fx.patch);

    let persisted: InstanceReport =
        serde_json::from_str(&instance_file(&output.root, "calc-1", "instance_report.json"))
            .unwrap();
    assert_eq!(persisted.verdict, TransitionLabel::FailToPass);
    assert_eq!(
        persisted.artifacts.apply_log.as_deref(),
        Some("instances/calc-1/apply.log")
    );
    assert_eq!(
        persisted.artifacts.redactions.as_deref(),
        Some("instances/calc-1/redactions.json")
    );
}

/// Test: a patch whose context does not match is an apply error
#[tokio::test]
async fn test_apply_error_forces_error_labels() {
    let fx = fixture();
    let out = tempfile::tempdir().unwrap();
    let orch = RunOrchestrator::new(config(out.path(), 1));

    let mut d = descriptor(&fx, "calc-stale");
    d.patch = fx.patch.replace("-broken", "-something else");

    let output = orch.run(vec![d], None).await.expect("run failed");
    let report = &output.report.instances[0];

    assert_eq!(report.verdict, TransitionLabel::Error);
    assert_eq!(report.apply.status, StepStatus::Failed);
    assert_eq!(
        report.apply.failure_kind,
        Some(ApplyFailureKind::ContextMismatch)
    );
    assert!(report.before.is_some(), "before phase stays valid");
    assert!(report.after.is_none(), "no after phase without a clean apply");
    assert!(report
        .transitions
        .iter()
        .all(|t| t.label == TransitionLabel::Error));
    assert!(report.errors.iter().any(|e| e.kind == ErrorKind::ApplyError));

    let apply_log = instance_file(&output.root, "calc-stale", "apply.log");
    assert!(apply_log.contains("git apply"));
    assert!(apply_log.contains("patch does not apply"));
}

/// Test: a suite that outlives its deadline degrades to absent outcomes
#[tokio::test]
async fn test_timeout_keeps_partial_output() {
    let fx = fixture();
    let out = tempfile::tempdir().unwrap();
    let orch = RunOrchestrator::new(config(out.path(), 1));

    let mut d = descriptor(&fx, "calc-slow");
    d.timeout_seconds = 1;
    d.environment_spec.test_command = Some(vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("echo 'PASSED {SUB}'; sleep 30"),
    ]);

    let output = orch.run(vec![d], None).await.expect("run failed");
    let report = &output.report.instances[0];

    let before = report.before.as_ref().unwrap();
    assert!(before.timed_out);
    assert_eq!(before.exit_code, None);
    assert!(before.outcomes.values().all(|o| *o == TestOutcome::Absent));
    assert!(before.duration_ms < 10_000);

    assert_eq!(report.verdict, TransitionLabel::Error);
    assert_eq!(report.label_of(ADD), Some(TransitionLabel::Error));
    assert!(report
        .errors
        .iter()
        .any(|e| e.kind == ErrorKind::ExecutionTimeout));
    assert!(instance_file(&output.root, "calc-slow", "before.stdout").contains("PASSED"));
}

/// Test: a failing provisioning script is a build error with every target labelled error
#[tokio::test]
async fn test_build_error_is_reported_not_raised() {
    let fx = fixture();
    let out = tempfile::tempdir().unwrap();
    let orch = RunOrchestrator::new(config(out.path(), 1));

    let mut d = descriptor(&fx, "calc-unbuildable");
    d.environment_spec.recipe = "echo installing\nexit 3\n".to_string();

    let output = orch.run(vec![d], None).await.expect("run failed");
    let report = &output.report.instances[0];

    assert_eq!(report.verdict, TransitionLabel::Error);
    assert_eq!(report.build.status, StepStatus::Failed);
    assert_eq!(report.apply.status, StepStatus::Skipped);
    assert!(report.before.is_none());
    assert_eq!(report.transitions.len(), 2);
    assert!(report.errors.iter().any(|e| e.kind == ErrorKind::BuildError));
    assert!(instance_file(&output.root, "calc-unbuildable", "build.log").contains("installing"));
}

/// Test: bounded concurrency, reports in input order, one shared manifest
#[tokio::test]
async fn test_concurrency_bound_and_input_order() {
    let fx = fixture();
    let out = tempfile::tempdir().unwrap();
    let config = config(out.path(), 2);
    let evaluator = Evaluator::from_config(&config);
    let gauge = evaluator.builder().gauge();
    let orch = RunOrchestrator::with_evaluator(config, Arc::new(evaluator));

    let mut descriptors: Vec<InstanceDescriptor> = (0..5)
        .map(|i| descriptor(&fx, &format!("calc-{i}")))
        .collect();
    descriptors[3].patch = fx.patch.replace("-broken", "-stale");

    let output = orch
        .run(descriptors, Some("run-many".to_string()))
        .await
        .expect("run failed");

    let ids: Vec<&str> = output
        .report
        .instances
        .iter()
        .map(|r| r.instance_id.as_str())
        .collect();
    assert_eq!(ids, vec!["calc-0", "calc-1", "calc-2", "calc-3", "calc-4"]);
    assert!(gauge.peak() <= 2, "peak handles {}", gauge.peak());
    assert!(gauge.peak() >= 1);
    assert_eq!(gauge.live(), 0, "every handle released");

    assert_eq!(output.report.summary.total, 5);
    assert_eq!(output.report.summary.count(TransitionLabel::FailToPass), 4);
    assert_eq!(output.report.summary.count(TransitionLabel::Error), 1);

    let manifest: RunManifest =
        serde_json::from_str(&std::fs::read_to_string(&output.manifest_path).unwrap()).unwrap();
    assert_eq!(manifest.run_id, "run-many");
    assert_eq!(manifest.verdicts["error"], vec!["calc-3"]);
    assert_eq!(manifest.verdicts["fail2pass"].len(), 4);
}
