//! f2p-eval - Fail2Pass evaluation
//!
//! Drives each instance through its two test phases:
//! - Runs the suite before and after the patch under a deadline
//! - Applies the patch once, with structured failure kinds
//! - Classifies every test transition and persists the artifacts
//! - Orchestrates many instances under a concurrency bound

pub mod applicator;
pub mod artifacts;
pub mod command;
pub mod config;
pub mod executor;
pub mod orchestrator;
pub mod pipeline;

// Re-export key types
pub use applicator::{classify_apply_failure, ApplyOutcome, PatchApplicator};
pub use artifacts::{ArtifactStore, InstanceArtifacts, MANIFEST_FILE, REPORT_FILE};
pub use command::{default_command, test_command};
pub use config::{BackendKind, ConfigError, EngineConfig};
pub use executor::{CommandOutput, TestExecutor};
pub use orchestrator::{RunOrchestrator, RunOutput};
pub use pipeline::{Evaluator, InstanceEvaluator};
