//! Structured lifecycle events for instance evaluation.
//!
//! Every event carries an `event` field so log pipelines can filter on it
//! without parsing messages.

use tracing::{info, warn};

use crate::domain::outcome::Phase;
use crate::domain::transition::TransitionLabel;

/// Instance-scoped span, attached to the evaluation future with
/// `tracing::Instrument` so it survives `.await` points.
pub fn instance_span(run_id: &str, instance_id: &str) -> tracing::Span {
    tracing::info_span!("f2p.instance", run_id = %run_id, instance_id = %instance_id)
}

pub fn emit_instance_started(instance_id: &str, repository: &str, base_revision: &str) {
    info!(
        event = "instance.started",
        instance_id = %instance_id,
        repository = %repository,
        base_revision = %base_revision,
    );
}

pub fn emit_phase_finished(
    instance_id: &str,
    phase: Phase,
    exit_code: Option<i32>,
    duration_ms: u64,
    timed_out: bool,
) {
    info!(
        event = "phase.finished",
        instance_id = %instance_id,
        phase = %phase,
        exit_code = ?exit_code,
        duration_ms = duration_ms,
        timed_out = timed_out,
    );
}

pub fn emit_apply_finished(instance_id: &str, applied: bool, failure_kind: Option<&str>) {
    info!(
        event = "apply.finished",
        instance_id = %instance_id,
        applied = applied,
        failure_kind = failure_kind.unwrap_or("none"),
    );
}

/// Names only; values never reach the log.
pub fn emit_secrets_redacted(instance_id: &str, count: usize, names: &[String]) {
    warn!(
        event = "secrets.redacted",
        instance_id = %instance_id,
        count = count,
        names = %names.join(","),
    );
}

pub fn emit_instance_finished(instance_id: &str, verdict: TransitionLabel, duration_ms: u64) {
    info!(
        event = "instance.finished",
        instance_id = %instance_id,
        verdict = %verdict,
        duration_ms = duration_ms,
    );
}

pub fn emit_run_finished(
    run_id: &str,
    instances: usize,
    fail2pass: usize,
    errors: usize,
    duration_ms: u64,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        instances = instances,
        fail2pass = fail2pass,
        errors = errors,
        duration_ms = duration_ms,
    );
}
