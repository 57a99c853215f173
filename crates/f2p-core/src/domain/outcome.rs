//! Per-test outcomes and raw execution results.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of a single test in a single phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    Pass,
    Fail,
    Error,
    Skipped,
    /// The identifier did not appear in the runner's report.
    Absent,
}

impl TestOutcome {
    /// Rank used when the same identifier is reported more than once.
    fn severity(&self) -> u8 {
        match self {
            TestOutcome::Absent => 0,
            TestOutcome::Skipped => 1,
            TestOutcome::Pass => 2,
            TestOutcome::Fail => 3,
            TestOutcome::Error => 4,
        }
    }

    /// Combine two observations of one identifier; the more severe wins.
    pub fn merge(self, other: TestOutcome) -> TestOutcome {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TestOutcome::Pass => "pass",
            TestOutcome::Fail => "fail",
            TestOutcome::Error => "error",
            TestOutcome::Skipped => "skipped",
            TestOutcome::Absent => "absent",
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Test identifier → outcome, ordered for deterministic reports.
pub type OutcomeMap = BTreeMap<String, TestOutcome>;

/// Record `outcome` for `id`, merging with any earlier observation.
pub fn record_outcome(map: &mut OutcomeMap, id: impl Into<String>, outcome: TestOutcome) {
    map.entry(id.into())
        .and_modify(|existing| *existing = existing.merge(outcome))
        .or_insert(outcome);
}

/// Which side of the patch a test run belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Before,
    After,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Before => "before",
            Phase::After => "after",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw result of one test-suite invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionResult {
    pub phase: Phase,

    /// `None` when the process was killed or never started.
    pub exit_code: Option<i32>,

    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl ExecutionResult {
    /// Result for a command that could not be started at all.
    pub fn spawn_failure(phase: Phase, error: impl fmt::Display) -> Self {
        Self {
            phase,
            exit_code: None,
            stdout: String::new(),
            stderr: format!("failed to start test command: {error}"),
            duration_ms: 0,
            timed_out: false,
        }
    }

    /// Whether the process ran to completion with exit status zero.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}
