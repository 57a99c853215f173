//! Instance and run reports.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::ErrorRecord;
use crate::domain::instance::TestRole;
use crate::domain::outcome::{ExecutionResult, OutcomeMap, Phase, TestOutcome};
use crate::domain::transition::TransitionLabel;

/// Status of a fallible pre-step (build or apply).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    /// Never attempted because an earlier step failed.
    Skipped,
}

/// Structured reason a patch did not apply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplyFailureKind {
    ContextMismatch,
    MissingFile,
    AlreadyExists,
    Malformed,
    EmptyPatch,
    Timeout,
    Tooling,
}

impl ApplyFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyFailureKind::ContextMismatch => "context_mismatch",
            ApplyFailureKind::MissingFile => "missing_file",
            ApplyFailureKind::AlreadyExists => "already_exists",
            ApplyFailureKind::Malformed => "malformed",
            ApplyFailureKind::EmptyPatch => "empty_patch",
            ApplyFailureKind::Timeout => "timeout",
            ApplyFailureKind::Tooling => "tooling",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepReport {
    pub status: StepStatus,
    pub duration_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<ApplyFailureKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StepReport {
    pub fn succeeded(duration_ms: u64) -> Self {
        Self {
            status: StepStatus::Succeeded,
            duration_ms,
            failure_kind: None,
            detail: None,
        }
    }

    pub fn failed(duration_ms: u64, detail: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            duration_ms,
            failure_kind: None,
            detail: Some(detail.into()),
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: StepStatus::Skipped,
            duration_ms: 0,
            failure_kind: None,
            detail: None,
        }
    }

    pub fn with_failure_kind(mut self, kind: ApplyFailureKind) -> Self {
        self.failure_kind = Some(kind);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Succeeded
    }
}

/// Summary of one test phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseReport {
    pub phase: Phase,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub timed_out: bool,

    /// No recognizable runner report was found in the output.
    pub parse_failure: bool,

    pub outcomes: OutcomeMap,
}

impl PhaseReport {
    pub fn new(result: &ExecutionResult, outcomes: OutcomeMap, parse_failure: bool) -> Self {
        Self {
            phase: result.phase,
            exit_code: result.exit_code,
            duration_ms: result.duration_ms,
            timed_out: result.timed_out,
            parse_failure,
            outcomes,
        }
    }
}

/// One classified row of an instance report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestTransition {
    pub test_id: String,
    pub before: TestOutcome,
    pub after: TestOutcome,
    pub label: TransitionLabel,
    pub role: TestRole,
}

/// Paths of an instance's artifacts, relative to the run directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redactions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parse_failures: Vec<String>,
}

/// Final record of one instance evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceReport {
    pub instance_id: String,
    pub repository: String,
    pub base_revision: String,

    /// Environment cache key, when the recipe was sanitized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_digest: Option<String>,

    pub verdict: TransitionLabel,
    pub build: StepReport,
    pub apply: StepReport,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<PhaseReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<PhaseReport>,

    pub transitions: Vec<TestTransition>,

    #[serde(default)]
    pub errors: Vec<ErrorRecord>,

    #[serde(default)]
    pub artifacts: ArtifactRefs,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl InstanceReport {
    /// Report for an instance that was never evaluated.
    pub fn rejected(
        instance_id: impl Into<String>,
        repository: impl Into<String>,
        base_revision: impl Into<String>,
        error: ErrorRecord,
    ) -> Self {
        let now = Utc::now();
        Self {
            instance_id: instance_id.into(),
            repository: repository.into(),
            base_revision: base_revision.into(),
            env_digest: None,
            verdict: TransitionLabel::Error,
            build: StepReport::skipped(),
            apply: StepReport::skipped(),
            before: None,
            after: None,
            transitions: Vec::new(),
            errors: vec![error],
            artifacts: ArtifactRefs::default(),
            started_at: now,
            finished_at: now,
        }
    }

    /// Number of rows carrying each label.
    pub fn label_counts(&self) -> BTreeMap<TransitionLabel, usize> {
        let mut counts = BTreeMap::new();
        for row in &self.transitions {
            *counts.entry(row.label).or_insert(0) += 1;
        }
        counts
    }

    pub fn label_of(&self, test_id: &str) -> Option<TransitionLabel> {
        self.transitions
            .iter()
            .find(|row| row.test_id == test_id)
            .map(|row| row.label)
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// Verdict counts for a whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub by_verdict: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn from_reports(reports: &[InstanceReport]) -> Self {
        let mut by_verdict: BTreeMap<String, usize> = TransitionLabel::ALL
            .iter()
            .map(|label| (label.as_str().to_string(), 0))
            .collect();
        for report in reports {
            *by_verdict
                .entry(report.verdict.as_str().to_string())
                .or_insert(0) += 1;
        }
        Self {
            total: reports.len(),
            by_verdict,
        }
    }

    pub fn count(&self, label: TransitionLabel) -> usize {
        self.by_verdict.get(label.as_str()).copied().unwrap_or(0)
    }
}

/// Fresh run id: `<UTC timestamp>-<first 8 hex of a v4 uuid>`.
pub fn generate_run_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%SZ"), &suffix[..8])
}

/// Everything produced by one orchestrated run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub concurrency: usize,
    pub backend: String,
    pub summary: RunSummary,
    pub instances: Vec<InstanceReport>,
}

/// Instance ids grouped by verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunManifest {
    pub run_id: String,
    pub verdicts: BTreeMap<String, Vec<String>>,
}

impl RunManifest {
    pub fn from_reports(run_id: impl Into<String>, reports: &[InstanceReport]) -> Self {
        let mut verdicts: BTreeMap<String, Vec<String>> = TransitionLabel::ALL
            .iter()
            .map(|label| (label.as_str().to_string(), Vec::new()))
            .collect();
        for report in reports {
            verdicts
                .entry(report.verdict.as_str().to_string())
                .or_default()
                .push(report.instance_id.clone());
        }
        Self {
            run_id: run_id.into(),
            verdicts,
        }
    }
}
