//! Applies a candidate patch inside an environment handle.

use std::fmt::Write as _;
use std::time::Duration;

use f2p_core::{ApplyFailureKind, StepReport};
use f2p_env::EnvironmentHandle;
use tracing::{debug, warn};

use crate::executor::{CommandOutput, TestExecutor};

/// Result of the single apply attempt.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub report: StepReport,
    /// Command line and captured output, stored as `apply.log`.
    pub log: String,
}

impl ApplyOutcome {
    pub fn applied(&self) -> bool {
        self.report.is_success()
    }
}

/// Map git's diagnostics to a failure kind.
pub fn classify_apply_failure(stderr: &str) -> ApplyFailureKind {
    let text = stderr.to_ascii_lowercase();
    if text.contains("corrupt patch")
        || text.contains("no valid patches")
        || text.contains("unrecognized input")
        || text.contains("patch fragment without header")
        || text.contains("garbage")
    {
        ApplyFailureKind::Malformed
    } else if text.contains("already exists") {
        ApplyFailureKind::AlreadyExists
    } else if text.contains("no such file") || text.contains("does not exist in index") {
        ApplyFailureKind::MissingFile
    } else if text.contains("patch does not apply") || text.contains("patch failed") {
        ApplyFailureKind::ContextMismatch
    } else {
        ApplyFailureKind::Tooling
    }
}

fn apply_log(argv: &[String], output: &CommandOutput) -> String {
    let mut log = String::new();
    let _ = writeln!(log, "$ {}", argv.join(" "));
    let _ = writeln!(
        log,
        "exit: {}",
        output
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    if output.timed_out {
        let _ = writeln!(log, "timed out");
    }
    for (label, text) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
        if !text.is_empty() {
            let _ = writeln!(log, "--- {label}");
            log.push_str(text);
            if !text.ends_with('\n') {
                log.push('\n');
            }
        }
    }
    log
}

fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim()
}

/// `git apply` runner. Atomic: either every hunk lands or the tree is
/// untouched. Attempted once, never retried.
#[derive(Debug, Clone)]
pub struct PatchApplicator {
    timeout: Duration,
}

impl PatchApplicator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn command() -> Vec<String> {
        ["git", "apply", "--whitespace=nowarn", "-"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub async fn apply(
        &self,
        executor: &TestExecutor,
        handle: &EnvironmentHandle,
        patch: &str,
    ) -> ApplyOutcome {
        let argv = Self::command();

        if patch.trim().is_empty() {
            return ApplyOutcome {
                report: StepReport::failed(0, "patch is empty")
                    .with_failure_kind(ApplyFailureKind::EmptyPatch),
                log: format!("$ {}\npatch is empty, nothing applied\n", argv.join(" ")),
            };
        }

        let mut input = patch.to_string();
        if !input.ends_with('\n') {
            input.push('\n');
        }

        let output = match executor
            .run_command(handle, &argv, Some(input.as_bytes()), self.timeout)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(instance_id = %handle.instance_id(), error = %e, "git apply did not start");
                return ApplyOutcome {
                    report: StepReport::failed(0, e.to_string())
                        .with_failure_kind(ApplyFailureKind::Tooling),
                    log: format!("$ {}\nfailed to start: {e}\n", argv.join(" ")),
                };
            }
        };

        let log = apply_log(&argv, &output);
        let report = if output.success() {
            debug!(instance_id = %handle.instance_id(), "patch applied");
            StepReport::succeeded(output.duration_ms)
        } else if output.timed_out {
            StepReport::failed(
                output.duration_ms,
                format!("git apply timed out after {}s", self.timeout.as_secs()),
            )
            .with_failure_kind(ApplyFailureKind::Timeout)
        } else {
            let kind = classify_apply_failure(&output.stderr);
            let detail = match last_line(&output.stderr) {
                "" => format!("git apply exited with {:?}", output.exit_code),
                line => line.to_string(),
            };
            StepReport::failed(output.duration_ms, detail).with_failure_kind(kind)
        };

        ApplyOutcome { report, log }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_git_diagnostics() {
        let cases = [
            (
                "error: patch failed: src/lib.rs:10\nerror: src/lib.rs: patch does not apply\n",
                ApplyFailureKind::ContextMismatch,
            ),
            (
                "error: src/missing.rs: No such file or directory\n",
                ApplyFailureKind::MissingFile,
            ),
            (
                "error: new.rs: already exists in working directory\n",
                ApplyFailureKind::AlreadyExists,
            ),
            ("error: corrupt patch at line 7\n", ApplyFailureKind::Malformed),
            ("error: No valid patches in input\n", ApplyFailureKind::Malformed),
            ("fatal: not a git repository\n", ApplyFailureKind::Tooling),
        ];
        for (stderr, expected) in cases {
            assert_eq!(classify_apply_failure(stderr), expected, "{stderr}");
        }
    }

    #[test]
    fn test_apply_log_shape() {
        let output = CommandOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "error: README: patch does not apply".to_string(),
            duration_ms: 4,
            timed_out: false,
        };
        let log = apply_log(&PatchApplicator::command(), &output);
        assert!(log.starts_with("$ git apply --whitespace=nowarn -\nexit: 1\n"));
        assert!(log.contains("--- stderr\nerror: README: patch does not apply\n"));
        assert!(!log.contains("--- stdout"));
    }

    #[test]
    fn test_last_line_skips_blanks() {
        assert_eq!(last_line("error: a\nerror: b\n\n"), "error: b");
        assert_eq!(last_line(""), "");
    }
}
