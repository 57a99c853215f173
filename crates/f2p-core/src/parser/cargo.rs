//! libtest (`cargo test`) output parser.

use std::sync::LazyLock;

use regex::Regex;

use super::{OutcomeParser, ParsedOutput};
use crate::domain::instance::RunnerKind;
use crate::domain::outcome::{record_outcome, TestOutcome};

static TEST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^test (?P<id>\S+)(?: - should panic)?(?: - compile(?: fail)?)? \.\.\. (?P<status>ok|FAILED|ignored)\b",
    )
    .unwrap()
});

static RUNNING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^running \d+ tests?$").unwrap());

static RESULT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^test result: ").unwrap());

pub struct CargoTestParser;

impl OutcomeParser for CargoTestParser {
    fn runner(&self) -> RunnerKind {
        RunnerKind::Cargo
    }

    fn parse(&self, output: &str) -> ParsedOutput {
        let mut parsed = ParsedOutput::default();

        for raw in output.lines() {
            let line = raw.trim_end();
            if let Some(caps) = TEST_LINE.captures(line) {
                let outcome = match &caps["status"] {
                    "ok" => TestOutcome::Pass,
                    "FAILED" => TestOutcome::Fail,
                    _ => TestOutcome::Skipped,
                };
                record_outcome(&mut parsed.outcomes, &caps["id"], outcome);
                parsed.recognized = true;
            } else if RUNNING.is_match(line) || RESULT.is_match(line) {
                parsed.recognized = true;
            }
        }

        parsed
    }
}
