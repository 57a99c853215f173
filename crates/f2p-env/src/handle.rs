//! Environment handles: exclusive, release-once ownership of one environment.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::backend::{EnvironmentBackend, Placement};
use crate::recipe::EnvDigest;
use crate::Result;

/// Live and peak count of environment handles.
#[derive(Debug, Default)]
pub struct HandleGauge {
    live: AtomicUsize,
    peak: AtomicUsize,
}

impl HandleGauge {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self) {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn release(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Ownership token for one provisioned environment.
///
/// Not `Clone`: exactly one evaluation owns it. Consumed by
/// [`EnvironmentHandle::release`]; a handle dropped without release (panic
/// path) tears its environment down synchronously in `Drop`.
#[derive(Debug)]
pub struct EnvironmentHandle {
    id: String,
    instance_id: String,
    digest: EnvDigest,
    backend: Arc<dyn EnvironmentBackend>,
    placement: Placement,
    scratch: Option<TempDir>,
    gauge: Arc<HandleGauge>,
    released: bool,
}

impl EnvironmentHandle {
    pub(crate) fn new(
        id: String,
        instance_id: String,
        digest: EnvDigest,
        backend: Arc<dyn EnvironmentBackend>,
        placement: Placement,
        scratch: TempDir,
        gauge: Arc<HandleGauge>,
    ) -> Self {
        gauge.acquire();
        Self {
            id,
            instance_id,
            digest,
            backend,
            placement,
            scratch: Some(scratch),
            gauge,
            released: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn digest(&self) -> &EnvDigest {
        &self.digest
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Working directory commands start in.
    pub fn workdir(&self) -> &str {
        &self.placement.workdir
    }

    /// Command running `argv` inside this environment; `stdin` keeps the
    /// input stream attached.
    pub fn command(&self, argv: &[String], stdin: bool) -> Result<Command> {
        self.backend.command(&self.placement, argv, stdin)
    }

    /// Stop everything running in the environment.
    ///
    /// `pid` is the host process id of the command being interrupted.
    pub async fn interrupt(&self, pid: Option<u32>) -> Result<()> {
        debug!(handle = %self.id, ?pid, "interrupting environment");
        self.backend.interrupt(&self.placement, pid).await
    }

    /// Tear the environment down. Consumes the handle, so it happens once.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let result = self.backend.teardown(&self.placement).await;
        self.scratch.take();
        self.gauge.release();
        debug!(handle = %self.id, instance_id = %self.instance_id, "environment released");
        result
    }
}

impl Drop for EnvironmentHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(
            handle = %self.id,
            instance_id = %self.instance_id,
            "environment handle dropped without release, tearing down"
        );
        self.backend.teardown_blocking(&self.placement);
        self.scratch.take();
        self.gauge.release();
    }
}
