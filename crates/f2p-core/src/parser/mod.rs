//! Test-runner output parsing.
//!
//! Each runner family gets its own [`OutcomeParser`]. The parser only
//! extracts what the runner reported; [`build_outcome_map`] then reconciles
//! that against the requested targets, filling in `absent` where a target
//! never showed up.

pub mod cargo;
pub mod go;
pub mod pytest;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::instance::{selector_matches, RunnerKind};
use crate::domain::outcome::{ExecutionResult, OutcomeMap, Phase, TestOutcome};

pub use cargo::CargoTestParser;
pub use go::GoTestParser;
pub use pytest::PytestParser;

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap());

const EXCERPT_CHARS: usize = 2000;

/// Identifiers a parser found in raw output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    pub outcomes: OutcomeMap,

    /// Whether any report structure of the runner was recognized at all.
    pub recognized: bool,
}

/// Runner-specific output parser.
pub trait OutcomeParser: Send + Sync {
    fn runner(&self) -> RunnerKind;

    /// Extract reported outcomes from already de-colored output.
    fn parse(&self, output: &str) -> ParsedOutput;
}

/// Parser for the declared runner family.
pub fn parser_for(runner: RunnerKind) -> Box<dyn OutcomeParser> {
    match runner {
        RunnerKind::Pytest => Box::new(PytestParser),
        RunnerKind::Cargo => Box::new(CargoTestParser),
        RunnerKind::Go => Box::new(GoTestParser),
    }
}

/// Remove terminal color sequences.
pub fn strip_ansi(text: &str) -> std::borrow::Cow<'_, str> {
    ANSI_ESCAPE.replace_all(text, "")
}

/// Structured marker written next to a phase's logs when parsing failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParseFailure {
    pub phase: Phase,
    pub runner: RunnerKind,
    pub reason: String,
    pub exit_code: Option<i32>,
    pub stdout_bytes: usize,
    pub stderr_bytes: usize,

    /// Tail of the combined output.
    pub excerpt: String,
}

/// Outcome map for one phase plus the parse-failure marker, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseOutcomes {
    pub outcomes: OutcomeMap,
    pub parse_failure: Option<ParseFailure>,
}

fn all_absent(targets: &[String]) -> OutcomeMap {
    targets
        .iter()
        .map(|t| (t.clone(), TestOutcome::Absent))
        .collect()
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

/// Fill in targets the runner did not report.
///
/// A target is satisfied by an observed identifier it selects. Otherwise it
/// inherits the outcome of an observed identifier that contains it (a file
/// whose collection errored), else it is `absent`.
pub fn reconcile_targets(observed: &mut OutcomeMap, targets: &[String]) {
    for target in targets {
        if observed.keys().any(|id| selector_matches(target, id)) {
            continue;
        }
        let inherited = observed
            .iter()
            .filter(|(id, _)| selector_matches(id, target))
            .map(|(_, outcome)| *outcome)
            .reduce(TestOutcome::merge);
        observed.insert(target.clone(), inherited.unwrap_or(TestOutcome::Absent));
    }
}

/// Turn one phase's raw result into an outcome map.
///
/// A timed-out phase degrades to every target `absent`; so does output with
/// no recognizable report structure, which additionally yields a
/// [`ParseFailure`].
pub fn build_outcome_map(
    result: &ExecutionResult,
    runner: RunnerKind,
    targets: &[String],
) -> PhaseOutcomes {
    if result.timed_out {
        debug!(phase = %result.phase, "phase timed out, all targets absent");
        return PhaseOutcomes {
            outcomes: all_absent(targets),
            parse_failure: None,
        };
    }

    let combined = format!("{}\n{}", result.stdout, result.stderr);
    let cleaned = strip_ansi(&combined);
    let parsed = parser_for(runner).parse(&cleaned);

    if !parsed.recognized {
        warn!(
            phase = %result.phase,
            runner = %runner,
            exit_code = ?result.exit_code,
            "no recognizable test report in output"
        );
        return PhaseOutcomes {
            outcomes: all_absent(targets),
            parse_failure: Some(ParseFailure {
                phase: result.phase,
                runner,
                reason: format!("no {runner} report structure found in output"),
                exit_code: result.exit_code,
                stdout_bytes: result.stdout.len(),
                stderr_bytes: result.stderr.len(),
                excerpt: tail(cleaned.trim_end(), EXCERPT_CHARS),
            }),
        };
    }

    let mut outcomes = parsed.outcomes;
    reconcile_targets(&mut outcomes, targets);
    debug!(phase = %result.phase, tests = outcomes.len(), "parsed test outcomes");
    PhaseOutcomes {
        outcomes,
        parse_failure: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(stdout: &str, timed_out: bool) -> ExecutionResult {
        ExecutionResult {
            phase: Phase::Before,
            exit_code: if timed_out { None } else { Some(1) },
            stdout: stdout.to_string(),
            stderr: String::new(),
            duration_ms: 10,
            timed_out,
        }
    }

    fn targets(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_missing_target_is_absent() {
        let out = "tests/t.py::test_a PASSED\n";
        let map = build_outcome_map(
            &result(out, false),
            RunnerKind::Pytest,
            &targets(&["tests/t.py::test_a", "tests/t.py::test_b"]),
        );
        assert!(map.parse_failure.is_none());
        assert_eq!(map.outcomes["tests/t.py::test_a"], TestOutcome::Pass);
        assert_eq!(map.outcomes["tests/t.py::test_b"], TestOutcome::Absent);
    }

    #[test]
    fn test_timeout_degrades_all_targets() {
        let out = "tests/t.py::test_a PASSED\n";
        let map = build_outcome_map(
            &result(out, true),
            RunnerKind::Pytest,
            &targets(&["tests/t.py::test_a"]),
        );
        assert_eq!(map.outcomes.len(), 1);
        assert_eq!(map.outcomes["tests/t.py::test_a"], TestOutcome::Absent);
        assert!(map.parse_failure.is_none());
    }

    #[test]
    fn test_unrecognized_output_flags_parse_failure() {
        let map = build_outcome_map(
            &result("Segmentation fault (core dumped)\n", false),
            RunnerKind::Pytest,
            &targets(&["t1"]),
        );
        assert_eq!(map.outcomes["t1"], TestOutcome::Absent);
        let failure = map.parse_failure.expect("parse failure");
        assert_eq!(failure.runner, RunnerKind::Pytest);
        assert!(failure.excerpt.contains("Segmentation fault"));
    }

    #[test]
    fn test_file_selector_satisfied_by_child() {
        let out = "tests/t.py::test_a FAILED\ntests/t.py::test_b PASSED\n";
        let map = build_outcome_map(
            &result(out, false),
            RunnerKind::Pytest,
            &targets(&["tests/t.py"]),
        );
        assert!(!map.outcomes.contains_key("tests/t.py"));
        assert_eq!(map.outcomes.len(), 2);
    }

    #[test]
    fn test_target_inherits_collection_error() {
        let out = "ERROR tests/t.py - ImportError: cannot import name 'x'\n\
                   ==== 1 error in 0.12s ====\n";
        let map = build_outcome_map(
            &result(out, false),
            RunnerKind::Pytest,
            &targets(&["tests/t.py::test_a"]),
        );
        assert_eq!(map.outcomes["tests/t.py"], TestOutcome::Error);
        assert_eq!(map.outcomes["tests/t.py::test_a"], TestOutcome::Error);
    }

    #[test]
    fn test_parser_for_follows_declared_runner() {
        for kind in [RunnerKind::Pytest, RunnerKind::Cargo, RunnerKind::Go] {
            assert_eq!(parser_for(kind).runner(), kind);
        }
    }

    #[test]
    fn test_runner_is_not_sniffed() {
        // Valid cargo output under a pytest declaration is not recognized.
        let map = build_outcome_map(
            &result("running 1 test\ntest a::b ... ok\n", false),
            RunnerKind::Pytest,
            &targets(&["a::b"]),
        );
        assert!(map.parse_failure.is_some());
        assert_eq!(map.outcomes["a::b"], TestOutcome::Absent);
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[32mPASSED\x1b[0m"), "PASSED");
    }

    #[test]
    fn test_tail_keeps_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
    }
}
