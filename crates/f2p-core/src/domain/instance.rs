//! Instance descriptors: the immutable unit of evaluation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::error::{F2pError, Result};

/// Default in-container path of the checked-out repository.
pub const DEFAULT_WORKDIR: &str = "/testbed";

/// Test-runner family declared by an environment spec.
///
/// Drives both the default test command and the outcome parser; output is
/// never sniffed to guess the runner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    /// `python -m pytest`
    Pytest,
    /// `cargo test`
    Cargo,
    /// `go test -v`
    Go,
}

impl RunnerKind {
    pub fn name(&self) -> &'static str {
        match self {
            RunnerKind::Pytest => "pytest",
            RunnerKind::Cargo => "cargo",
            RunnerKind::Go => "go",
        }
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for RunnerKind {
    type Err = F2pError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pytest" => Ok(RunnerKind::Pytest),
            "cargo" => Ok(RunnerKind::Cargo),
            "go" => Ok(RunnerKind::Go),
            other => Err(F2pError::InvalidInstance(format!(
                "unknown runner kind: {other}"
            ))),
        }
    }
}

fn default_workdir() -> String {
    DEFAULT_WORKDIR.to_string()
}

/// Build recipe for an instance's execution environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentSpec {
    /// Dockerfile text (docker backend) or provisioning shell script (local backend).
    pub recipe: String,

    /// Runner family used to run and parse the suite.
    pub runner: RunnerKind,

    /// Overrides the runner's default test command; targets are appended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<Vec<String>>,

    /// Checkout location inside the environment.
    #[serde(default = "default_workdir")]
    pub workdir: String,
}

impl EnvironmentSpec {
    pub fn new(recipe: impl Into<String>, runner: RunnerKind) -> Self {
        Self {
            recipe: recipe.into(),
            runner,
            test_command: None,
            workdir: default_workdir(),
        }
    }

    pub fn with_test_command(mut self, command: Vec<String>) -> Self {
        self.test_command = Some(command);
        self
    }
}

/// Role a test plays in the aggregate verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TestRole {
    /// Expected to reproduce the defect (fail before, pass after).
    Target,
    /// Expected to keep passing.
    Guard,
    Other,
}

/// Target/guard split used to compute the aggregate verdict.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestPartition {
    pub targets: Vec<String>,
    pub guards: Vec<String>,
}

impl TestPartition {
    pub fn new(targets: Vec<String>, guards: Vec<String>) -> Self {
        Self { targets, guards }
    }

    /// The most specific matching selector decides; a target and a guard
    /// selector of equal length resolve to target.
    pub fn role_of(&self, test_id: &str) -> TestRole {
        let target = longest_match(&self.targets, test_id);
        let guard = longest_match(&self.guards, test_id);
        match (target, guard) {
            (Some(t), Some(g)) if g > t => TestRole::Guard,
            (Some(_), _) => TestRole::Target,
            (None, Some(_)) => TestRole::Guard,
            (None, None) => TestRole::Other,
        }
    }
}

fn longest_match(selectors: &[String], test_id: &str) -> Option<usize> {
    selectors
        .iter()
        .filter(|s| selector_matches(s, test_id))
        .map(String::len)
        .max()
}

/// Whether `selector` selects the test identifier `id`.
///
/// A selector matches itself and any identifier that continues it with
/// `::`, `/` or `[`, so `tests/test_io.py` selects
/// `tests/test_io.py::test_read[utf8]` and `TestParse` selects `TestParse/empty`.
pub fn selector_matches(selector: &str, id: &str) -> bool {
    if selector.is_empty() {
        return false;
    }
    match id.strip_prefix(selector) {
        Some("") => true,
        Some(rest) => rest.starts_with("::") || rest.starts_with('/') || rest.starts_with('['),
        None => false,
    }
}

/// One defect-and-patch evaluation unit, fully resolved by the dataset pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceDescriptor {
    pub id: String,

    /// Anything `git clone` accepts.
    pub repository: String,

    pub base_revision: String,

    /// Unified diff applied between the two phases.
    pub patch: String,

    /// Ordered test identifiers or files handed to the runner.
    pub test_targets: Vec<String>,

    /// Selectors for tests expected to go from fail to pass.
    #[serde(default)]
    pub target_tests: Vec<String>,

    /// Selectors for tests expected to keep passing.
    #[serde(default)]
    pub guard_tests: Vec<String>,

    pub environment_spec: EnvironmentSpec,

    /// Per-phase test execution deadline.
    pub timeout_seconds: u64,
}

impl InstanceDescriptor {
    /// Check that the descriptor is fully resolved.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(F2pError::InvalidInstance("id cannot be empty".to_string()));
        }
        if self.repository.trim().is_empty() {
            return Err(F2pError::InvalidInstance(
                "repository cannot be empty".to_string(),
            ));
        }
        if self.base_revision.trim().is_empty() {
            return Err(F2pError::InvalidInstance(
                "base_revision cannot be empty".to_string(),
            ));
        }
        if self.patch.trim().is_empty() {
            return Err(F2pError::InvalidInstance("patch cannot be empty".to_string()));
        }
        if self.timeout_seconds == 0 {
            return Err(F2pError::InvalidInstance(
                "timeout_seconds must be > 0".to_string(),
            ));
        }
        let selectors = self
            .test_targets
            .iter()
            .chain(&self.target_tests)
            .chain(&self.guard_tests);
        for selector in selectors {
            if selector.trim().is_empty() {
                return Err(F2pError::InvalidInstance(
                    "test selectors cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// The target/guard partition of this instance.
    ///
    /// With no explicit target selectors every `test_targets` entry a guard
    /// does not select counts as a target.
    pub fn partition(&self) -> TestPartition {
        let targets = if self.target_tests.is_empty() {
            self.test_targets
                .iter()
                .filter(|t| !self.guard_tests.iter().any(|g| selector_matches(g, t)))
                .cloned()
                .collect()
        } else {
            self.target_tests.clone()
        };
        TestPartition::new(targets, self.guard_tests.clone())
    }

    pub fn role_of(&self, test_id: &str) -> TestRole {
        self.partition().role_of(test_id)
    }

    /// Filesystem-safe form of the id used for the artifact directory.
    pub fn artifact_dir_name(&self) -> String {
        sanitize_path_component(&self.id)
    }
}

/// Keep `[A-Za-z0-9._-]`, replace everything else with `_`.
pub fn sanitize_path_component(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> InstanceDescriptor {
        InstanceDescriptor {
            id: "psf__requests-2317".to_string(),
            repository: "https://github.com/psf/requests.git".to_string(),
            base_revision: "091991be0da19de9108dbe5e3752917fea3d7fdc".to_string(),
            patch: "diff --git a/x b/x\n".to_string(),
            test_targets: vec![
                "tests/test_requests.py::test_method_str".to_string(),
                "tests/test_requests.py::test_basic".to_string(),
            ],
            target_tests: vec![],
            guard_tests: vec!["tests/test_requests.py::test_basic".to_string()],
            environment_spec: EnvironmentSpec::new("FROM python:3.9", RunnerKind::Pytest),
            timeout_seconds: 600,
        }
    }

    #[test]
    fn test_validate_accepts_resolved_descriptor() {
        assert!(descriptor().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_patch() {
        let mut d = descriptor();
        d.patch = "  \n".to_string();
        let err = d.validate().unwrap_err();
        assert!(err.to_string().contains("patch"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut d = descriptor();
        d.timeout_seconds = 0;
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_selector() {
        let mut d = descriptor();
        d.guard_tests.push(String::new());
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_selector_matches_file_and_parametrized() {
        assert!(selector_matches("tests/test_io.py", "tests/test_io.py"));
        assert!(selector_matches("tests/test_io.py", "tests/test_io.py::test_read"));
        assert!(selector_matches("t.py::test_a", "t.py::test_a[utf8]"));
        assert!(selector_matches("TestParse", "TestParse/empty"));
        assert!(!selector_matches("t.py::test_a", "t.py::test_ab"));
        assert!(!selector_matches("", "anything"));
    }

    #[test]
    fn test_role_defaults_targets_to_test_targets() {
        let d = descriptor();
        assert_eq!(
            d.role_of("tests/test_requests.py::test_method_str"),
            TestRole::Target
        );
        assert_eq!(d.role_of("tests/test_requests.py::test_basic"), TestRole::Guard);
        assert_eq!(d.role_of("tests/test_other.py::test_x"), TestRole::Other);
        assert_eq!(
            d.partition().targets,
            vec!["tests/test_requests.py::test_method_str".to_string()]
        );
    }

    #[test]
    fn test_guard_inside_file_level_target() {
        let partition = TestPartition::new(
            vec!["t.py".to_string()],
            vec!["t.py::test_stable".to_string()],
        );
        assert_eq!(partition.role_of("t.py::test_bug"), TestRole::Target);
        assert_eq!(partition.role_of("t.py::test_stable"), TestRole::Guard);
        assert_eq!(partition.role_of("t.py::test_stable[utf8]"), TestRole::Guard);

        let both = TestPartition::new(vec!["t.py::a".to_string()], vec!["t.py::a".to_string()]);
        assert_eq!(both.role_of("t.py::a"), TestRole::Target);
    }

    #[test]
    fn test_role_uses_explicit_partition() {
        let mut d = descriptor();
        d.target_tests = vec!["tests/test_requests.py::test_method_str".to_string()];
        assert_eq!(
            d.role_of("tests/test_requests.py::test_method_str"),
            TestRole::Target
        );
        assert_eq!(d.role_of("tests/test_requests.py::test_basic"), TestRole::Guard);
    }

    #[test]
    fn test_runner_kind_from_str() {
        assert_eq!("PyTest".parse::<RunnerKind>().unwrap(), RunnerKind::Pytest);
        assert_eq!("go".parse::<RunnerKind>().unwrap(), RunnerKind::Go);
        assert!("jest".parse::<RunnerKind>().is_err());
    }

    #[test]
    fn test_spec_workdir_defaults_on_deserialize() {
        let spec: EnvironmentSpec =
            serde_json::from_str(r#"{"recipe":"FROM rust:1.79","runner":"cargo"}"#).unwrap();
        assert_eq!(spec.workdir, DEFAULT_WORKDIR);
        assert!(spec.test_command.is_none());
    }

    #[test]
    fn test_sanitize_path_component() {
        assert_eq!(sanitize_path_component("django__django-11099"), "django__django-11099");
        assert_eq!(sanitize_path_component("owner/repo#12"), "owner_repo_12");
        assert_eq!(sanitize_path_component(".."), "_");
        assert_eq!(sanitize_path_component(""), "_");
    }
}
