//! Transition labels between the before and after phases.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::outcome::TestOutcome;

/// Per-test transition across the patch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransitionLabel {
    #[serde(rename = "fail2pass")]
    FailToPass,
    #[serde(rename = "fail2fail")]
    FailToFail,
    #[serde(rename = "pass2pass")]
    PassToPass,
    #[serde(rename = "pass2fail")]
    PassToFail,
    #[serde(rename = "error")]
    Error,
}

impl TransitionLabel {
    /// Label for one identifier given its outcome in each phase.
    ///
    /// Anything other than a clean pass/fail on both sides is `error`.
    pub fn from_outcomes(before: TestOutcome, after: TestOutcome) -> Self {
        match (before, after) {
            (TestOutcome::Fail, TestOutcome::Pass) => TransitionLabel::FailToPass,
            (TestOutcome::Fail, TestOutcome::Fail) => TransitionLabel::FailToFail,
            (TestOutcome::Pass, TestOutcome::Pass) => TransitionLabel::PassToPass,
            (TestOutcome::Pass, TestOutcome::Fail) => TransitionLabel::PassToFail,
            _ => TransitionLabel::Error,
        }
    }

    /// Verdict severity: `error > pass2fail > fail2fail > pass2pass > fail2pass`.
    pub fn severity(&self) -> u8 {
        match self {
            TransitionLabel::FailToPass => 0,
            TransitionLabel::PassToPass => 1,
            TransitionLabel::FailToFail => 2,
            TransitionLabel::PassToFail => 3,
            TransitionLabel::Error => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionLabel::FailToPass => "fail2pass",
            TransitionLabel::FailToFail => "fail2fail",
            TransitionLabel::PassToPass => "pass2pass",
            TransitionLabel::PassToFail => "pass2fail",
            TransitionLabel::Error => "error",
        }
    }

    pub const ALL: [TransitionLabel; 5] = [
        TransitionLabel::FailToPass,
        TransitionLabel::FailToFail,
        TransitionLabel::PassToPass,
        TransitionLabel::PassToFail,
        TransitionLabel::Error,
    ];
}

impl fmt::Display for TransitionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
