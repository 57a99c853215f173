//! pytest output parser.
//!
//! Understands verbose result lines (`<nodeid> PASSED [ 50%]`), the `-rA`
//! short summary (`FAILED <nodeid> - AssertionError`) and collection errors.

use std::sync::LazyLock;

use regex::Regex;

use super::{OutcomeParser, ParsedOutput};
use crate::domain::instance::RunnerKind;
use crate::domain::outcome::{record_outcome, TestOutcome};

const STATUSES: &str = "PASSED|FAILED|ERROR|SKIPPED|XFAIL|XPASS";

static VERBOSE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?P<id>\S+::\S.*?)\s+(?P<status>{STATUSES})(?:\s+\(.*\))?(?:\s+\[\s*\d+%\])?\s*$"
    ))
    .unwrap()
});

// Parametrize brackets may themselves contain ` - `.
static SUMMARY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?P<status>{STATUSES}) (?P<id>[^\s\[]+(?:\[.*?\])?)(?: - .*)?\s*$"
    ))
    .unwrap()
});

static COLLECTING_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^_+ ERROR collecting (?P<id>\S+) _+$").unwrap());

static SESSION_BANNER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^=+ test session starts =+$").unwrap());

static FINAL_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^=+ .*(?:\bin \d+(?:\.\d+)?s\b|no tests ran).* =+$").unwrap()
});

fn outcome_of(status: &str) -> TestOutcome {
    match status {
        "PASSED" | "XFAIL" | "XPASS" => TestOutcome::Pass,
        "FAILED" => TestOutcome::Fail,
        "ERROR" => TestOutcome::Error,
        _ => TestOutcome::Skipped,
    }
}

pub struct PytestParser;

impl OutcomeParser for PytestParser {
    fn runner(&self) -> RunnerKind {
        RunnerKind::Pytest
    }

    fn parse(&self, output: &str) -> ParsedOutput {
        let mut parsed = ParsedOutput::default();

        for raw in output.lines() {
            let line = raw.trim_end();

            if let Some(caps) = VERBOSE_LINE.captures(line) {
                record_outcome(
                    &mut parsed.outcomes,
                    caps["id"].trim(),
                    outcome_of(&caps["status"]),
                );
                parsed.recognized = true;
            } else if let Some(caps) = SUMMARY_LINE.captures(line) {
                // `SKIPPED [1] path:line: reason` carries no node id.
                record_outcome(
                    &mut parsed.outcomes,
                    caps["id"].trim(),
                    outcome_of(&caps["status"]),
                );
                parsed.recognized = true;
            } else if let Some(caps) = COLLECTING_HEADER.captures(line) {
                record_outcome(&mut parsed.outcomes, &caps["id"], TestOutcome::Error);
                parsed.recognized = true;
            } else if SESSION_BANNER.is_match(line) || FINAL_SUMMARY.is_match(line) {
                parsed.recognized = true;
            }
        }

        parsed
    }
}
