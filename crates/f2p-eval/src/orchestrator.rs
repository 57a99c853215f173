//! Run orchestration: many instances, bounded concurrency, one report.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use f2p_core::{
    emit_run_finished, generate_run_id, instance_span, ErrorKind, ErrorRecord, InstanceDescriptor,
    InstanceReport, RunManifest, RunReport, RunSummary, TransitionLabel, METRICS,
};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{error, info, warn, Instrument};

use crate::artifacts::ArtifactStore;
use crate::config::EngineConfig;
use crate::pipeline::{Evaluator, InstanceEvaluator};

/// Outcome of [`RunOrchestrator::run`].
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub report: RunReport,
    /// `<output_dir>/<run_id>`
    pub root: PathBuf,
    pub report_path: PathBuf,
    pub manifest_path: PathBuf,
}

/// Reason a descriptor is not evaluated, or its artifact directory name.
fn admit(descriptors: &[InstanceDescriptor]) -> Vec<Result<String, ErrorRecord>> {
    let mut seen = HashSet::new();
    descriptors
        .iter()
        .map(|d| {
            d.validate().map_err(|e| e.to_record())?;
            let dir = d.artifact_dir_name();
            if !seen.insert(dir.clone()) {
                return Err(ErrorRecord::new(
                    ErrorKind::InvalidInstance,
                    format!("duplicate instance id {:?} (artifact directory {dir})", d.id),
                ));
            }
            Ok(dir)
        })
        .collect()
}

/// Evaluates a batch of instances with at most `concurrency` environments
/// alive at once.
pub struct RunOrchestrator {
    config: EngineConfig,
    evaluator: Arc<dyn InstanceEvaluator>,
    backend: String,
}

impl RunOrchestrator {
    pub fn new(config: EngineConfig) -> Self {
        let backend = config.backend.to_string();
        let evaluator = Arc::new(Evaluator::from_config(&config));
        Self {
            config,
            evaluator,
            backend,
        }
    }

    /// Use a custom evaluator instead of the one derived from `config`.
    pub fn with_evaluator(config: EngineConfig, evaluator: Arc<dyn InstanceEvaluator>) -> Self {
        let backend = config.backend.to_string();
        Self {
            config,
            evaluator,
            backend,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluate every descriptor and persist the run report and manifest.
    ///
    /// Instance failures never fail the run; only an unwritable output
    /// directory does. Reports come back in input order.
    pub async fn run(
        &self,
        descriptors: Vec<InstanceDescriptor>,
        run_id: Option<String>,
    ) -> anyhow::Result<RunOutput> {
        let run_id = run_id.unwrap_or_else(generate_run_id);
        let started = Instant::now();
        let started_at = Utc::now();
        let concurrency = self.config.effective_concurrency();

        let store = ArtifactStore::create(&self.config.output_dir, &run_id).with_context(|| {
            format!(
                "failed to create run directory under {}",
                self.config.output_dir.display()
            )
        })?;

        info!(
            run_id = %run_id,
            instances = descriptors.len(),
            concurrency,
            backend = %self.backend,
            "starting run"
        );

        // Every artifact directory exists before the first evaluation starts.
        let admissions = admit(&descriptors);
        let mut admitted = Vec::with_capacity(descriptors.len());
        for (descriptor, admission) in descriptors.into_iter().zip(admissions) {
            let slot = match admission {
                Ok(dir) => Ok(store.instance(&dir).with_context(|| {
                    format!("failed to create artifact directory for {}", descriptor.id)
                })?),
                Err(record) => Err(record),
            };
            admitted.push((descriptor, slot));
        }

        let gate = Arc::new(Semaphore::new(concurrency));
        let mut identities = Vec::with_capacity(admitted.len());
        let mut tasks = Vec::with_capacity(admitted.len());

        for (descriptor, slot) in admitted {
            identities.push((
                descriptor.id.clone(),
                descriptor.repository.clone(),
                descriptor.base_revision.clone(),
            ));

            let artifacts = match slot {
                Ok(artifacts) => artifacts,
                Err(record) => {
                    warn!(instance_id = %descriptor.id, error = %record.message, "instance rejected");
                    let report = InstanceReport::rejected(
                        descriptor.id,
                        descriptor.repository,
                        descriptor.base_revision,
                        record,
                    );
                    tasks.push(tokio::spawn(async move { report }));
                    continue;
                }
            };

            let evaluator = Arc::clone(&self.evaluator);
            let gate = Arc::clone(&gate);
            let span = instance_span(&run_id, &descriptor.id);

            tasks.push(tokio::spawn(
                async move {
                    // Held until the evaluation has released its environment.
                    let _permit = gate.acquire_owned().await.ok();
                    evaluator.evaluate(&descriptor, &artifacts).await
                }
                .instrument(span),
            ));
        }

        let joined = join_all(tasks).await;
        let mut reports = Vec::with_capacity(joined.len());
        for (joined, (id, repository, base_revision)) in joined.into_iter().zip(identities) {
            let report = match joined {
                Ok(report) => report,
                Err(e) => {
                    error!(instance_id = %id, error = %e, "evaluation task failed");
                    InstanceReport::rejected(
                        id,
                        repository,
                        base_revision,
                        ErrorRecord::new(
                            ErrorKind::Internal,
                            format!("evaluation task failed: {e}"),
                        ),
                    )
                }
            };
            reports.push(report);
        }

        let summary = RunSummary::from_reports(&reports);
        let manifest = RunManifest::from_reports(&run_id, &reports);
        let report = RunReport {
            run_id: run_id.clone(),
            started_at,
            finished_at: Utc::now(),
            concurrency,
            backend: self.backend.clone(),
            summary,
            instances: reports,
        };

        let report_path = store
            .write_report(&report)
            .with_context(|| format!("failed to write run report for {run_id}"))?;
        let manifest_path = store
            .write_manifest(&manifest)
            .with_context(|| format!("failed to write run manifest for {run_id}"))?;

        emit_run_finished(
            &run_id,
            report.summary.total,
            report.summary.count(TransitionLabel::FailToPass),
            report.summary.count(TransitionLabel::Error),
            started.elapsed().as_millis() as u64,
        );
        METRICS.flush();

        Ok(RunOutput {
            report,
            root: store.root().to_path_buf(),
            report_path,
            manifest_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use f2p_core::{EnvironmentSpec, RunnerKind};

    use crate::artifacts::InstanceArtifacts;

    fn descriptor(id: &str) -> InstanceDescriptor {
        InstanceDescriptor {
            id: id.to_string(),
            repository: "https://example.com/repo".to_string(),
            base_revision: "abc123".to_string(),
            patch: "diff --git a/x b/x\n".to_string(),
            test_targets: vec!["t1".to_string()],
            target_tests: vec![],
            guard_tests: vec![],
            environment_spec: EnvironmentSpec::new("FROM python:3.11\n", RunnerKind::Pytest),
            timeout_seconds: 30,
        }
    }

    /// Labels every instance fail2pass after a delay that shrinks with the
    /// input position, so completion order is the reverse of input order.
    #[derive(Default)]
    struct StubEvaluator {
        calls: AtomicUsize,
        live: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl InstanceEvaluator for StubEvaluator {
        async fn evaluate(
            &self,
            descriptor: &InstanceDescriptor,
            _artifacts: &InstanceArtifacts,
        ) -> InstanceReport {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if descriptor.id == "boom" {
                panic!("evaluator crashed");
            }
            let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let position: u64 = descriptor.id.trim_start_matches('i').parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(60 - position * 10)).await;

            self.live.fetch_sub(1, Ordering::SeqCst);
            let mut report = InstanceReport::rejected(
                descriptor.id.clone(),
                descriptor.repository.clone(),
                descriptor.base_revision.clone(),
                ErrorRecord::new(ErrorKind::Internal, "stub"),
            );
            report.verdict = TransitionLabel::FailToPass;
            report.errors.clear();
            report
        }
    }

    fn orchestrator(out: &std::path::Path, concurrency: usize) -> (RunOrchestrator, Arc<StubEvaluator>) {
        let stub = Arc::new(StubEvaluator::default());
        let config = EngineConfig::default()
            .with_output_dir(out)
            .with_concurrency(concurrency);
        (RunOrchestrator::with_evaluator(config, stub.clone()), stub)
    }

    #[test]
    fn test_admit_rejects_invalid_and_duplicates() {
        let mut empty_patch = descriptor("i2");
        empty_patch.patch = String::new();
        let admitted = admit(&[
            descriptor("org/repo-1"),
            descriptor("org_repo-1"),
            empty_patch,
        ]);
        assert_eq!(admitted[0], Ok("org_repo-1".to_string()));
        let dup = admitted[1].as_ref().unwrap_err();
        assert_eq!(dup.kind, ErrorKind::InvalidInstance);
        assert!(dup.message.contains("duplicate"));
        assert_eq!(admitted[2].as_ref().unwrap_err().kind, ErrorKind::InvalidInstance);
    }

    #[tokio::test]
    async fn test_reports_follow_input_order_within_bound() {
        let out = tempfile::tempdir().unwrap();
        let (orch, stub) = orchestrator(out.path(), 2);
        let descriptors = (0..5).map(|i| descriptor(&format!("i{i}"))).collect();

        let output = orch.run(descriptors, Some("run-a".to_string())).await.unwrap();
        let ids: Vec<&str> = output
            .report
            .instances
            .iter()
            .map(|r| r.instance_id.as_str())
            .collect();
        assert_eq!(ids, vec!["i0", "i1", "i2", "i3", "i4"]);
        assert!(stub.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(output.report.summary.count(TransitionLabel::FailToPass), 5);
        assert_eq!(output.root, out.path().join("run-a"));
        assert!(output.report_path.is_file());
        assert!(output.manifest_path.is_file());
    }

    #[tokio::test]
    async fn test_panic_and_rejection_become_error_reports() {
        let out = tempfile::tempdir().unwrap();
        let (orch, _stub) = orchestrator(out.path(), 4);
        let mut invalid = descriptor("i3");
        invalid.timeout_seconds = 0;
        let descriptors = vec![descriptor("i1"), descriptor("boom"), invalid, descriptor("i1")];

        let output = orch.run(descriptors, Some("run-b".to_string())).await.unwrap();
        let verdicts: Vec<TransitionLabel> =
            output.report.instances.iter().map(|r| r.verdict).collect();
        assert_eq!(
            verdicts,
            vec![
                TransitionLabel::FailToPass,
                TransitionLabel::Error,
                TransitionLabel::Error,
                TransitionLabel::Error,
            ]
        );
        assert_eq!(output.report.instances[1].errors[0].kind, ErrorKind::Internal);
        assert_eq!(output.report.instances[2].errors[0].kind, ErrorKind::InvalidInstance);
        assert_eq!(output.report.instances[3].errors[0].kind, ErrorKind::InvalidInstance);

        let manifest: RunManifest = serde_json::from_str(
            &std::fs::read_to_string(&output.manifest_path).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest.verdicts["fail2pass"], vec!["i1"]);
        assert_eq!(manifest.verdicts["error"], vec!["boom", "i3", "i1"]);
    }

    #[tokio::test]
    async fn test_unwritable_instance_dir_fails_before_any_evaluation() {
        let out = tempfile::tempdir().unwrap();
        let (orch, stub) = orchestrator(out.path(), 4);
        let instances = out.path().join("run-c").join("instances");
        std::fs::create_dir_all(&instances).unwrap();
        std::fs::write(instances.join("i2"), "not a directory").unwrap();

        let descriptors = (0..4).map(|i| descriptor(&format!("i{i}"))).collect();
        let err = orch
            .run(descriptors, Some("run-c".to_string()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("i2"), "{err:#}");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
        assert!(!instances.join("i3").exists());
    }
}
