//! Process-wide evaluation counters.
//!
//! Incremented at the call site; [`Metrics::flush`] emits all values as one
//! `info!` event at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub instances_evaluated: u64,
    pub build_failures: u64,
    pub apply_failures: u64,
    pub timeouts: u64,
    pub parse_failures: u64,
    pub secrets_redacted: u64,
}

pub struct Metrics {
    instances_evaluated: AtomicU64,
    build_failures: AtomicU64,
    apply_failures: AtomicU64,
    timeouts: AtomicU64,
    parse_failures: AtomicU64,
    secrets_redacted: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            instances_evaluated: AtomicU64::new(0),
            build_failures: AtomicU64::new(0),
            apply_failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            parse_failures: AtomicU64::new(0),
            secrets_redacted: AtomicU64::new(0),
        }
    }

    pub fn inc_instances_evaluated(&self) {
        self.instances_evaluated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "instances_evaluated", "counter incremented");
    }

    pub fn inc_build_failures(&self) {
        self.build_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "build_failures", "counter incremented");
    }

    pub fn inc_apply_failures(&self) {
        self.apply_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "apply_failures", "counter incremented");
    }

    pub fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "timeouts", "counter incremented");
    }

    pub fn inc_parse_failures(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "parse_failures", "counter incremented");
    }

    /// Add the number of redacted recipe lines.
    pub fn add_secrets_redacted(&self, count: u64) {
        if count > 0 {
            self.secrets_redacted.fetch_add(count, Ordering::Relaxed);
            tracing::trace!(metric = "secrets_redacted", count, "counter incremented");
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            instances_evaluated: self.instances_evaluated.load(Ordering::Relaxed),
            build_failures: self.build_failures.load(Ordering::Relaxed),
            apply_failures: self.apply_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            secrets_redacted: self.secrets_redacted.load(Ordering::Relaxed),
        }
    }

    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            instances_evaluated = s.instances_evaluated,
            build_failures = s.build_failures,
            apply_failures = s.apply_failures,
            timeouts = s.timeouts,
            parse_failures = s.parse_failures,
            secrets_redacted = s.secrets_redacted,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.instances_evaluated.store(0, Ordering::Relaxed);
        self.build_failures.store(0, Ordering::Relaxed);
        self.apply_failures.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.parse_failures.store(0, Ordering::Relaxed);
        self.secrets_redacted.store(0, Ordering::Relaxed);
    }
}
