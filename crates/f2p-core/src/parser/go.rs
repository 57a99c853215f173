//! `go test -v` output parser.

use std::sync::LazyLock;

use regex::Regex;

use super::{OutcomeParser, ParsedOutput};
use crate::domain::instance::RunnerKind;
use crate::domain::outcome::{record_outcome, TestOutcome};

static RESULT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*--- (?P<status>PASS|FAIL|SKIP): (?P<id>\S+)(?: \([\d.]+s\))?").unwrap()
});

static STRUCTURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:=== (?:RUN|PAUSE|CONT) |ok\s+\S+|FAIL\s+\S+|PASS$|FAIL$)").unwrap()
});

pub struct GoTestParser;

impl OutcomeParser for GoTestParser {
    fn runner(&self) -> RunnerKind {
        RunnerKind::Go
    }

    fn parse(&self, output: &str) -> ParsedOutput {
        let mut parsed = ParsedOutput::default();

        for raw in output.lines() {
            let line = raw.trim_end();
            if let Some(caps) = RESULT_LINE.captures(line) {
                let outcome = match &caps["status"] {
                    "PASS" => TestOutcome::Pass,
                    "FAIL" => TestOutcome::Fail,
                    _ => TestOutcome::Skipped,
                };
                record_outcome(&mut parsed.outcomes, &caps["id"], outcome);
                parsed.recognized = true;
            } else if STRUCTURE.is_match(line) {
                parsed.recognized = true;
            }
        }

        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_verbose_output() {
        let out = "\
=== RUN   TestParse
=== RUN   TestParse/empty
=== RUN   TestParse/unicode
    parse_test.go:42: got \"\", want \"é\"
--- FAIL: TestParse (0.00s)
    --- PASS: TestParse/empty (0.00s)
    --- FAIL: TestParse/unicode (0.00s)
=== RUN   TestLegacy
    legacy_test.go:9: skipping legacy path
--- SKIP: TestLegacy (0.00s)
FAIL
FAIL\texample.com/parse\t0.004s
";
        let parsed = GoTestParser.parse(out);
        assert!(parsed.recognized);
        let o = &parsed.outcomes;
        assert_eq!(o["TestParse"], TestOutcome::Fail);
        assert_eq!(o["TestParse/empty"], TestOutcome::Pass);
        assert_eq!(o["TestParse/unicode"], TestOutcome::Fail);
        assert_eq!(o["TestLegacy"], TestOutcome::Skipped);
    }

    #[test]
    fn test_build_failure_has_structure_but_no_tests() {
        let out = "# example.com/parse\n./parse.go:3:2: undefined: x\nFAIL\texample.com/parse [build failed]\n";
        let parsed = GoTestParser.parse(out);
        assert!(parsed.recognized);
        assert!(parsed.outcomes.is_empty());
    }

    #[test]
    fn test_plain_text_is_unrecognized() {
        assert!(!GoTestParser.parse("go: command not found\n").recognized);
    }
}
