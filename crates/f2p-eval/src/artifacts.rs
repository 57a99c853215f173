//! On-disk artifact layout of a run.
//!
//! ```text
//! <output_dir>/<run_id>/
//!   report.json
//!   manifest.json
//!   instances/<sanitized-id>/
//!     descriptor.json  redactions.json  build.log  patch.diff  apply.log
//!     before.stdout  before.stderr  after.stdout  after.stderr
//!     before.parse_failure.json  after.parse_failure.json
//!     instance_report.json
//! ```

use std::path::{Path, PathBuf};

use f2p_core::{
    ExecutionResult, InstanceDescriptor, InstanceReport, ParseFailure, Phase, Result, RunManifest,
    RunReport,
};
use serde::Serialize;

pub const REPORT_FILE: &str = "report.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const INSTANCES_DIR: &str = "instances";
pub const DESCRIPTOR_FILE: &str = "descriptor.json";
pub const PATCH_FILE: &str = "patch.diff";
pub const APPLY_LOG_FILE: &str = "apply.log";
pub const INSTANCE_REPORT_FILE: &str = "instance_report.json";

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Artifact root of one run.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create `<output_dir>/<run_id>/instances/`.
    pub fn create(output_dir: &Path, run_id: &str) -> Result<Self> {
        let root = output_dir.join(f2p_core::sanitize_path_component(run_id));
        std::fs::create_dir_all(root.join(INSTANCES_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Artifact directory for one instance, created on demand.
    pub fn instance(&self, dir_name: &str) -> Result<InstanceArtifacts> {
        let dir = self.root.join(INSTANCES_DIR).join(dir_name);
        std::fs::create_dir_all(&dir)?;
        Ok(InstanceArtifacts {
            dir,
            prefix: format!("{INSTANCES_DIR}/{dir_name}"),
        })
    }

    pub fn write_report(&self, report: &RunReport) -> Result<PathBuf> {
        let path = self.root.join(REPORT_FILE);
        write_json(&path, report)?;
        Ok(path)
    }

    pub fn write_manifest(&self, manifest: &RunManifest) -> Result<PathBuf> {
        let path = self.root.join(MANIFEST_FILE);
        write_json(&path, manifest)?;
        Ok(path)
    }
}

/// One instance's artifact directory. Writers return the path relative to
/// the run root, as recorded in the instance report.
#[derive(Debug, Clone)]
pub struct InstanceArtifacts {
    dir: PathBuf,
    prefix: String,
}

impl InstanceArtifacts {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn relative(&self, name: &str) -> String {
        format!("{}/{name}", self.prefix)
    }

    /// Relative path of `name` if some earlier step already wrote it.
    pub fn existing(&self, name: &str) -> Option<String> {
        self.dir.join(name).is_file().then(|| self.relative(name))
    }

    pub fn write_text(&self, name: &str, contents: &str) -> Result<String> {
        std::fs::write(self.dir.join(name), contents)?;
        Ok(self.relative(name))
    }

    /// Descriptor copy with the recipe replaced by its sanitized form.
    pub fn write_descriptor(
        &self,
        descriptor: &InstanceDescriptor,
        sanitized_recipe: &str,
    ) -> Result<String> {
        let mut copy = descriptor.clone();
        copy.environment_spec.recipe = sanitized_recipe.to_string();
        write_json(&self.dir.join(DESCRIPTOR_FILE), &copy)?;
        Ok(self.relative(DESCRIPTOR_FILE))
    }

    pub fn write_patch(&self, patch: &str) -> Result<String> {
        self.write_text(PATCH_FILE, patch)
    }

    pub fn write_apply_log(&self, log: &str) -> Result<String> {
        self.write_text(APPLY_LOG_FILE, log)
    }

    /// `<phase>.stdout` and `<phase>.stderr`.
    pub fn write_phase_output(&self, result: &ExecutionResult) -> Result<(String, String)> {
        let stdout = self.write_text(&format!("{}.stdout", result.phase), &result.stdout)?;
        let stderr = self.write_text(&format!("{}.stderr", result.phase), &result.stderr)?;
        Ok((stdout, stderr))
    }

    pub fn write_parse_failure(&self, failure: &ParseFailure) -> Result<String> {
        let name = parse_failure_file(failure.phase);
        write_json(&self.dir.join(&name), failure)?;
        Ok(self.relative(&name))
    }

    pub fn write_report(&self, report: &InstanceReport) -> Result<String> {
        write_json(&self.dir.join(INSTANCE_REPORT_FILE), report)?;
        Ok(self.relative(INSTANCE_REPORT_FILE))
    }
}

pub fn parse_failure_file(phase: Phase) -> String {
    format!("{phase}.parse_failure.json")
}
