//! Per-instance evaluation pipeline.
//!
//! build → before-run → parse → apply → after-run → parse → classify,
//! strictly in order, inside one exclusively owned environment handle.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use f2p_core::{
    build_outcome_map, classify, emit_apply_finished, emit_instance_finished,
    emit_instance_started, emit_phase_finished, force_error, ArtifactRefs, Classification,
    ErrorKind, ErrorRecord, F2pError, InstanceDescriptor, InstanceReport, Phase, PhaseReport,
    StepReport, TestPartition, METRICS,
};
use f2p_env::{EnvironmentBuilder, EnvironmentHandle, BUILD_LOG_FILE, REDACTIONS_FILE};
use tracing::warn;

use crate::applicator::PatchApplicator;
use crate::artifacts::InstanceArtifacts;
use crate::command::test_command;
use crate::config::EngineConfig;
use crate::executor::TestExecutor;

/// Evaluates one instance into a report. Never fails: every problem ends
/// up in the report's error list.
#[async_trait]
pub trait InstanceEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        descriptor: &InstanceDescriptor,
        artifacts: &InstanceArtifacts,
    ) -> InstanceReport;
}

/// Mutable state of one evaluation, folded into the final report.
struct Evaluation<'a> {
    descriptor: &'a InstanceDescriptor,
    artifacts: &'a InstanceArtifacts,
    partition: TestPartition,
    env_digest: Option<String>,
    build: StepReport,
    apply: StepReport,
    before: Option<PhaseReport>,
    after: Option<PhaseReport>,
    classification: Option<Classification>,
    errors: Vec<ErrorRecord>,
    refs: ArtifactRefs,
}

impl<'a> Evaluation<'a> {
    fn new(descriptor: &'a InstanceDescriptor, artifacts: &'a InstanceArtifacts) -> Self {
        Self {
            descriptor,
            artifacts,
            partition: descriptor.partition(),
            env_digest: None,
            build: StepReport::skipped(),
            apply: StepReport::skipped(),
            before: None,
            after: None,
            classification: None,
            errors: Vec::new(),
            refs: ArtifactRefs::default(),
        }
    }

    fn error(&mut self, err: &F2pError) {
        self.errors.push(err.to_record());
    }

    /// Keep the relative path of a written artifact; a failed write is
    /// recorded but does not stop the evaluation.
    fn artifact(&mut self, written: f2p_core::Result<String>) -> Option<String> {
        match written {
            Ok(rel) => Some(rel),
            Err(e) => {
                warn!(instance_id = %self.descriptor.id, error = %e, "failed to write artifact");
                self.errors.push(ErrorRecord::new(
                    ErrorKind::Internal,
                    format!("artifact write failed: {e}"),
                ));
                None
            }
        }
    }

    /// Parse one phase's output and record its artifacts.
    fn record_phase(&mut self, result: &f2p_core::ExecutionResult) -> PhaseReport {
        let descriptor = self.descriptor;
        emit_phase_finished(
            &descriptor.id,
            result.phase,
            result.exit_code,
            result.duration_ms,
            result.timed_out,
        );

        let written = self.artifacts.write_phase_output(result);
        let (stdout, stderr) = match written {
            Ok((out, err)) => (Some(out), Some(err)),
            Err(e) => {
                let _ = self.artifact(Err(e));
                (None, None)
            }
        };
        match result.phase {
            Phase::Before => {
                self.refs.before_stdout = stdout;
                self.refs.before_stderr = stderr;
            }
            Phase::After => {
                self.refs.after_stdout = stdout;
                self.refs.after_stderr = stderr;
            }
        }

        if result.timed_out {
            METRICS.inc_timeouts();
            self.error(&F2pError::ExecutionTimeout {
                timeout_secs: descriptor.timeout_seconds,
            });
        }

        let parsed = build_outcome_map(
            result,
            descriptor.environment_spec.runner,
            &descriptor.test_targets,
        );
        if let Some(failure) = &parsed.parse_failure {
            METRICS.inc_parse_failures();
            self.error(&F2pError::ParseFailure(format!(
                "{} phase: {}",
                failure.phase, failure.reason
            )));
            if let Some(rel) = self.artifact(self.artifacts.write_parse_failure(failure)) {
                self.refs.parse_failures.push(rel);
            }
        }

        PhaseReport::new(result, parsed.outcomes, parsed.parse_failure.is_some())
    }

    fn finish(mut self, started_at: chrono::DateTime<Utc>) -> InstanceReport {
        let descriptor = self.descriptor;
        let classification = match self.classification.take() {
            Some(c) => c,
            None => force_error(
                self.before.as_ref().map(|p| &p.outcomes),
                self.after.as_ref().map(|p| &p.outcomes),
                &descriptor.test_targets,
                &self.partition,
            ),
        };

        InstanceReport {
            instance_id: descriptor.id.clone(),
            repository: descriptor.repository.clone(),
            base_revision: descriptor.base_revision.clone(),
            env_digest: self.env_digest,
            verdict: classification.verdict,
            build: self.build,
            apply: self.apply,
            before: self.before,
            after: self.after,
            transitions: classification.transitions,
            errors: self.errors,
            artifacts: self.refs,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// The production evaluator: real environments, real commands.
#[derive(Debug, Clone)]
pub struct Evaluator {
    builder: EnvironmentBuilder,
    executor: TestExecutor,
    applicator: PatchApplicator,
}

impl Evaluator {
    pub fn new(
        builder: EnvironmentBuilder,
        executor: TestExecutor,
        applicator: PatchApplicator,
    ) -> Self {
        Self {
            builder,
            executor,
            applicator,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.environment_builder(),
            TestExecutor::new(config.kill_grace()),
            PatchApplicator::new(config.apply_timeout()),
        )
    }

    pub fn builder(&self) -> &EnvironmentBuilder {
        &self.builder
    }

    /// Sanitize, persist the inputs, and build the environment.
    async fn provision(&self, eval: &mut Evaluation<'_>) -> Option<EnvironmentHandle> {
        let descriptor = eval.descriptor;
        let artifacts = eval.artifacts;
        let started = Instant::now();

        let prepared = match self.builder.prepare(descriptor, artifacts.dir()) {
            Ok(prepared) => prepared,
            Err(e) => {
                METRICS.inc_build_failures();
                let err = F2pError::from(e);
                eval.build = StepReport::failed(elapsed_ms(started), err.to_string());
                eval.error(&err);
                return None;
            }
        };
        eval.env_digest = Some(prepared.digest.as_str().to_string());
        eval.refs.redactions = artifacts.existing(REDACTIONS_FILE);
        eval.refs.descriptor =
            eval.artifact(artifacts.write_descriptor(descriptor, &prepared.sanitized.text));
        eval.refs.patch = eval.artifact(artifacts.write_patch(&descriptor.patch));

        let built = self.builder.build(descriptor, &prepared, artifacts.dir()).await;
        eval.refs.build_log = artifacts.existing(BUILD_LOG_FILE);
        match built {
            Ok(handle) => {
                eval.build = StepReport::succeeded(elapsed_ms(started));
                Some(handle)
            }
            Err(e) => {
                METRICS.inc_build_failures();
                let err = F2pError::from(e);
                eval.build = StepReport::failed(elapsed_ms(started), err.to_string());
                eval.error(&err);
                None
            }
        }
    }

    /// Everything that happens inside a built environment.
    async fn exercise(&self, handle: &EnvironmentHandle, eval: &mut Evaluation<'_>) {
        let descriptor = eval.descriptor;
        let argv = test_command(&descriptor.environment_spec, &descriptor.test_targets);
        let timeout = Duration::from_secs(descriptor.timeout_seconds);

        let before = self.executor.run(handle, Phase::Before, &argv, timeout).await;
        let before = eval.record_phase(&before);
        eval.before = Some(before);

        let applied = self
            .applicator
            .apply(&self.executor, handle, &descriptor.patch)
            .await;
        eval.refs.apply_log = eval.artifact(eval.artifacts.write_apply_log(&applied.log));
        let kind = applied.report.failure_kind.map(|k| k.as_str());
        emit_apply_finished(&descriptor.id, applied.applied(), kind);
        if !applied.applied() {
            METRICS.inc_apply_failures();
            let detail = applied.report.detail.clone().unwrap_or_default();
            eval.error(&F2pError::Apply(format!(
                "{}: {detail}",
                kind.unwrap_or("tooling")
            )));
            eval.apply = applied.report;
            return;
        }
        eval.apply = applied.report;

        let after = self.executor.run(handle, Phase::After, &argv, timeout).await;
        let after = eval.record_phase(&after);
        eval.after = Some(after);

        if let (Some(before), Some(after)) = (&eval.before, &eval.after) {
            match classify(&before.outcomes, &after.outcomes, &eval.partition) {
                Ok(c) => eval.classification = Some(c),
                Err(e) => {
                    warn!(instance_id = %descriptor.id, error = %e, "classification failed");
                    eval.error(&e);
                }
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[async_trait]
impl InstanceEvaluator for Evaluator {
    async fn evaluate(
        &self,
        descriptor: &InstanceDescriptor,
        artifacts: &InstanceArtifacts,
    ) -> InstanceReport {
        let started_at = Utc::now();
        emit_instance_started(&descriptor.id, &descriptor.repository, &descriptor.base_revision);
        METRICS.inc_instances_evaluated();

        let mut eval = Evaluation::new(descriptor, artifacts);
        if let Some(handle) = self.provision(&mut eval).await {
            self.exercise(&handle, &mut eval).await;
            if let Err(e) = handle.release().await {
                warn!(instance_id = %descriptor.id, error = %e, "environment release failed");
                eval.errors.push(ErrorRecord::new(
                    ErrorKind::Internal,
                    format!("environment release failed: {e}"),
                ));
            }
        }

        let mut report = eval.finish(started_at);
        if let Err(e) = artifacts.write_report(&report) {
            warn!(instance_id = %descriptor.id, error = %e, "failed to write instance report");
            report.errors.push(ErrorRecord::new(
                ErrorKind::Internal,
                format!("instance report write failed: {e}"),
            ));
        }

        emit_instance_finished(&report.instance_id, report.verdict, report.duration_ms());
        report
    }
}
