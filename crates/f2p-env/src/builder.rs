//! Environment builder: sanitize, key, provision.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use f2p_core::{emit_secrets_redacted, InstanceDescriptor, METRICS};
use tracing::{info, warn};

use crate::backend::{BuildLog, EnvironmentBackend, ProvisionRequest};
use crate::error::EnvError;
use crate::handle::{EnvironmentHandle, HandleGauge};
use crate::recipe::EnvDigest;
use crate::redact::{sanitize_recipe, SanitizedRecipe, SecretPolicy};
use crate::Result;

/// Warning artifact listing redacted recipe lines.
pub const REDACTIONS_FILE: &str = "redactions.json";

/// Captured output of every build step.
pub const BUILD_LOG_FILE: &str = "build.log";

/// Sanitized recipe and cache key of one instance, computed before any build.
#[derive(Debug, Clone)]
pub struct PreparedEnvironment {
    pub sanitized: SanitizedRecipe,
    pub digest: EnvDigest,
}

/// Builds environment handles on one backend.
#[derive(Debug, Clone)]
pub struct EnvironmentBuilder {
    backend: Arc<dyn EnvironmentBackend>,
    policy: SecretPolicy,
    build_timeout: Duration,
    scratch_root: Option<PathBuf>,
    gauge: Arc<HandleGauge>,
}

impl EnvironmentBuilder {
    pub fn new(
        backend: Arc<dyn EnvironmentBackend>,
        policy: SecretPolicy,
        build_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            policy,
            build_timeout,
            scratch_root: None,
            gauge: Arc::new(HandleGauge::new()),
        }
    }

    /// Create handle scratch directories under `root` instead of the system temp dir.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn gauge(&self) -> Arc<HandleGauge> {
        Arc::clone(&self.gauge)
    }

    /// Sanitize the recipe and compute the cache key.
    ///
    /// Always writes `redactions.json` into `artifact_dir`, even when nothing
    /// was redacted.
    pub fn prepare(
        &self,
        descriptor: &InstanceDescriptor,
        artifact_dir: &Path,
    ) -> Result<PreparedEnvironment> {
        let spec = &descriptor.environment_spec;
        let sanitized = sanitize_recipe(&spec.recipe, &self.policy);

        let report = serde_json::to_string_pretty(&sanitized.report())?;
        std::fs::write(artifact_dir.join(REDACTIONS_FILE), report)?;

        if !sanitized.redactions.is_empty() {
            METRICS.add_secrets_redacted(sanitized.redactions.len() as u64);
            emit_secrets_redacted(
                &descriptor.id,
                sanitized.redactions.len(),
                &sanitized.redacted_names(),
            );
        }

        let digest = EnvDigest::compute(
            &descriptor.repository,
            &descriptor.base_revision,
            &sanitized.text,
            &spec.workdir,
        )?;

        Ok(PreparedEnvironment { sanitized, digest })
    }

    /// Provision a fresh handle for `descriptor`.
    ///
    /// The build log is written to `artifact_dir` whether or not the build
    /// succeeds.
    pub async fn build(
        &self,
        descriptor: &InstanceDescriptor,
        prepared: &PreparedEnvironment,
        artifact_dir: &Path,
    ) -> Result<EnvironmentHandle> {
        let mut log = BuildLog::new();
        let result = self.provision(descriptor, prepared, &mut log).await;

        if let Err(e) = &result {
            log.note(&format!("build failed: {e}"));
            warn!(instance_id = %descriptor.id, error = %e, "environment build failed");
        }
        tokio::fs::write(artifact_dir.join(BUILD_LOG_FILE), log.as_str()).await?;
        result
    }

    async fn provision(
        &self,
        descriptor: &InstanceDescriptor,
        prepared: &PreparedEnvironment,
        log: &mut BuildLog,
    ) -> Result<EnvironmentHandle> {
        self.backend.validate(&prepared.sanitized.text)?;

        let scratch = match &self.scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                tempfile::Builder::new().prefix("f2p-").tempdir_in(root)?
            }
            None => tempfile::Builder::new().prefix("f2p-").tempdir()?,
        };

        let handle_id = uuid::Uuid::new_v4().simple().to_string();
        let request = ProvisionRequest {
            handle_id: &handle_id,
            instance_id: &descriptor.id,
            repository: &descriptor.repository,
            base_revision: &descriptor.base_revision,
            recipe: &prepared.sanitized.text,
            workdir: &descriptor.environment_spec.workdir,
            digest: &prepared.digest,
            scratch: scratch.path(),
        };

        info!(
            instance_id = %descriptor.id,
            backend = self.backend.name(),
            digest = %prepared.digest.short(),
            "building environment"
        );

        let placement =
            match tokio::time::timeout(self.build_timeout, self.backend.provision(&request, log))
                .await
            {
                Ok(placement) => placement?,
                Err(_) => {
                    return Err(EnvError::Timeout {
                        step: "environment build".to_string(),
                        timeout_secs: self.build_timeout.as_secs(),
                    })
                }
            };

        Ok(EnvironmentHandle::new(
            handle_id,
            descriptor.id.clone(),
            prepared.digest.clone(),
            Arc::clone(&self.backend),
            placement,
            scratch,
            Arc::clone(&self.gauge),
        ))
    }
}
