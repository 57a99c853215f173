//! Fail2Pass core library
//!
//! Domain model, runner output parsing and differential classification for
//! judging whether a patch turns failing tests into passing ones.

pub mod classifier;
pub mod domain;
pub mod metrics;
pub mod obs;
pub mod parser;
pub mod telemetry;

pub use classifier::{classify, compute_verdict, force_error, Classification};

pub use domain::{
    generate_run_id, record_outcome, sanitize_path_component, selector_matches,
    ApplyFailureKind, ArtifactRefs, EnvironmentSpec, ErrorKind, ErrorRecord, ExecutionResult,
    F2pError, InstanceDescriptor, InstanceReport, OutcomeMap, Phase, PhaseReport, Result,
    RunManifest, RunReport, RunSummary, RunnerKind, StepReport, StepStatus, TestOutcome,
    TestPartition, TestRole, TestTransition, TransitionLabel, DEFAULT_WORKDIR,
};

pub use domain::digest::{canonical_json, compute_digest, short_digest};

pub use metrics::METRICS;

pub use obs::{
    emit_apply_finished, emit_instance_finished, emit_instance_started, emit_phase_finished,
    emit_run_finished, emit_secrets_redacted, instance_span,
};

pub use parser::{
    build_outcome_map, parser_for, OutcomeParser, ParseFailure, ParsedOutput, PhaseOutcomes,
};

pub use telemetry::init_tracing;

/// Crate version, reported in run manifests and `f2p --version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
