//! Domain models for Fail2Pass evaluation.
//!
//! - `InstanceDescriptor`: one defect/patch unit to evaluate
//! - `ExecutionResult` / `OutcomeMap`: raw and parsed test runs
//! - `TransitionLabel`: per-test before/after classification
//! - `InstanceReport` / `RunReport`: persisted results

pub mod digest;
pub mod error;
pub mod instance;
pub mod outcome;
pub mod report;
pub mod transition;

pub use error::{ErrorKind, ErrorRecord, F2pError, Result};
pub use instance::{
    sanitize_path_component, selector_matches, EnvironmentSpec, InstanceDescriptor, RunnerKind,
    TestPartition, TestRole, DEFAULT_WORKDIR,
};
pub use outcome::{record_outcome, ExecutionResult, OutcomeMap, Phase, TestOutcome};
pub use report::{
    generate_run_id, ApplyFailureKind, ArtifactRefs, InstanceReport, PhaseReport, RunManifest,
    RunReport, RunSummary, StepReport, StepStatus, TestTransition,
};
pub use transition::TransitionLabel;
