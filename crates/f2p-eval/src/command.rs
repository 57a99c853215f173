//! Test-suite command lines per runner.

use f2p_core::{EnvironmentSpec, RunnerKind};

/// Default invocation for a runner, before targets are added.
pub fn default_command(runner: RunnerKind) -> Vec<String> {
    let argv: &[&str] = match runner {
        RunnerKind::Pytest => &[
            "python",
            "-m",
            "pytest",
            "-rA",
            "--tb=short",
            "-p",
            "no:cacheprovider",
        ],
        RunnerKind::Cargo => &["cargo", "test", "--no-fail-fast", "--"],
        RunnerKind::Go => &["go", "test", "-v"],
    };
    argv.iter().map(|s| s.to_string()).collect()
}

/// `-run` pattern selecting the top-level Go tests named by `targets`.
///
/// Subtest selectors (`TestX/case`) select their parent; `go test -run`
/// splits patterns on `/`, so they cannot be passed through verbatim.
fn go_run_pattern(targets: &[String]) -> Option<String> {
    let mut names: Vec<&str> = Vec::new();
    for target in targets {
        let top = target.split('/').next().unwrap_or(target);
        if !top.is_empty() && !names.contains(&top) {
            names.push(top);
        }
    }
    if names.is_empty() {
        return None;
    }
    let alternatives: Vec<String> = names.iter().map(|n| regex::escape(n)).collect();
    Some(format!("^({})$", alternatives.join("|")))
}

/// Full argv for running `targets` under `spec`.
///
/// An explicit `test_command` replaces the runner default; targets are
/// appended either way.
pub fn test_command(spec: &EnvironmentSpec, targets: &[String]) -> Vec<String> {
    if let Some(custom) = &spec.test_command {
        let mut argv = custom.clone();
        argv.extend(targets.iter().cloned());
        return argv;
    }

    let mut argv = default_command(spec.runner);
    match spec.runner {
        RunnerKind::Go => {
            if let Some(pattern) = go_run_pattern(targets) {
                argv.push("-run".to_string());
                argv.push(pattern);
            }
            argv.push("./...".to_string());
        }
        RunnerKind::Pytest | RunnerKind::Cargo => argv.extend(targets.iter().cloned()),
    }
    argv
}
