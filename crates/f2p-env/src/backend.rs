//! Execution backends.
//!
//! A backend knows how to materialize an environment for one handle, how to
//! run a command inside it, how to stop everything running in it, and how to
//! tear it down. The Docker backend is the isolation boundary used for real
//! evaluations; the local backend runs in a throwaway checkout on the host.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::EnvError;
use crate::recipe::EnvDigest;
use crate::Result;

/// Accumulated output of every build step, persisted as `build.log`.
#[derive(Debug, Default, Clone)]
pub struct BuildLog {
    text: String,
}

impl BuildLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&mut self, title: &str) {
        self.text.push_str(&format!("==> {title}\n"));
    }

    pub fn note(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
    }

    pub fn record_output(&mut self, output: &std::process::Output) {
        self.text.push_str(&String::from_utf8_lossy(&output.stdout));
        self.text.push_str(&String::from_utf8_lossy(&output.stderr));
        if !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        self.text.push_str(&format!("--> {}\n", output.status));
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// Everything a backend needs to provision one handle.
#[derive(Debug)]
pub struct ProvisionRequest<'a> {
    pub handle_id: &'a str,
    pub instance_id: &'a str,
    pub repository: &'a str,
    pub base_revision: &'a str,
    /// Already sanitized.
    pub recipe: &'a str,
    pub workdir: &'a str,
    pub digest: &'a EnvDigest,
    /// Per-handle scratch directory on the host.
    pub scratch: &'a Path,
}

/// Where a provisioned environment lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Directory commands start in, as seen from inside the environment.
    pub workdir: String,
    pub container: Option<String>,
}

#[async_trait]
pub trait EnvironmentBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Reject recipes this backend cannot build.
    fn validate(&self, recipe: &str) -> Result<()>;

    async fn provision(&self, request: &ProvisionRequest<'_>, log: &mut BuildLog)
        -> Result<Placement>;

    /// Command that runs `argv` inside the environment.
    fn command(&self, placement: &Placement, argv: &[String], stdin: bool) -> Result<Command>;

    /// Stop every process running in the environment, keeping its filesystem.
    async fn interrupt(&self, placement: &Placement, pid: Option<u32>) -> Result<()>;

    async fn teardown(&self, placement: &Placement) -> Result<()>;

    /// Best-effort synchronous teardown for handles dropped without release.
    fn teardown_blocking(&self, placement: &Placement);
}

fn tail_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Run one build step to completion, appending its output to `log`.
pub(crate) async fn run_step(
    mut cmd: Command,
    step: &str,
    log: &mut BuildLog,
) -> Result<std::process::Output> {
    log.step(step);
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| EnvError::CommandFailed {
            step: step.to_string(),
            detail: format!("failed to start: {e}"),
        })?;
    log.record_output(&output);

    if output.status.success() {
        Ok(output)
    } else {
        let last = tail_line(&output.stderr);
        let detail = if last.is_empty() {
            output.status.to_string()
        } else {
            format!("{}: {last}", output.status)
        };
        Err(EnvError::CommandFailed {
            step: step.to_string(),
            detail,
        })
    }
}

/// Clone `repository` into `dest` and detach at `revision`.
pub(crate) async fn checkout(
    repository: &str,
    revision: &str,
    dest: &Path,
    log: &mut BuildLog,
) -> Result<()> {
    let mut clone = Command::new("git");
    clone
        .args(["clone", "--no-checkout", "--quiet", repository])
        .arg(dest);
    run_step(clone, "git clone", log).await?;

    let mut co = Command::new("git");
    co.arg("-C")
        .arg(dest)
        .args(["checkout", "--detach", "--quiet", revision]);
    run_step(co, "git checkout", log).await?;
    Ok(())
}

fn split_argv(argv: &[String]) -> Result<(&String, &[String])> {
    argv.split_first()
        .ok_or_else(|| EnvError::MalformedSpec("empty command".to_string()))
}

/// Docker-backed environments: one image per digest, one container per handle.
#[derive(Debug, Clone, Default)]
pub struct DockerBackend {
    /// Allow network access from containers.
    pub network: bool,
    /// `--memory` limit, e.g. `4g`.
    pub memory: Option<String>,
}

impl DockerBackend {
    pub fn new(network: bool, memory: Option<String>) -> Self {
        Self { network, memory }
    }

    pub fn container_name(handle_id: &str) -> String {
        format!("f2p-{handle_id}")
    }

    async fn image_exists(tag: &str) -> bool {
        Command::new("docker")
            .args(["image", "inspect", tag])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn run_args(&self, name: &str, instance_id: &str, tag: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--label".to_string(),
            format!("f2p.instance={instance_id}"),
        ];
        if !self.network {
            args.push("--network=none".to_string());
        }
        if let Some(memory) = &self.memory {
            args.push(format!("--memory={memory}"));
        }
        args.extend([tag.to_string(), "sleep".to_string(), "infinity".to_string()]);
        args
    }
}

#[async_trait]
impl EnvironmentBackend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn validate(&self, recipe: &str) -> Result<()> {
        let first = recipe
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#') && *l != "\\");
        match first {
            None => Err(EnvError::MalformedSpec("Dockerfile is empty".to_string())),
            Some(line) => {
                let instruction = line
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .to_ascii_uppercase();
                if instruction == "FROM" || instruction == "ARG" {
                    Ok(())
                } else {
                    Err(EnvError::MalformedSpec(format!(
                        "Dockerfile must start with FROM or ARG, found {instruction}"
                    )))
                }
            }
        }
    }

    async fn provision(
        &self,
        request: &ProvisionRequest<'_>,
        log: &mut BuildLog,
    ) -> Result<Placement> {
        let tag = request.digest.image_tag();

        if Self::image_exists(&tag).await {
            info!(instance_id = %request.instance_id, image = %tag, "environment cache hit");
            log.note(&format!("cache hit: {tag}"));
        } else {
            let context = request.scratch.join("context");
            checkout(request.repository, request.base_revision, &context, log).await?;

            let dockerfile = request.scratch.join("Dockerfile");
            tokio::fs::write(&dockerfile, request.recipe).await?;

            info!(instance_id = %request.instance_id, image = %tag, "building environment image");
            let mut build = Command::new("docker");
            build
                .args(["build", "-t", tag.as_str(), "-f"])
                .arg(&dockerfile)
                .arg(&context);
            run_step(build, "docker build", log).await?;
        }

        let name = Self::container_name(request.handle_id);
        let mut run = Command::new("docker");
        run.args(self.run_args(&name, request.instance_id, &tag));
        run_step(run, "docker run", log).await?;
        debug!(container = %name, "container started");

        Ok(Placement {
            workdir: request.workdir.to_string(),
            container: Some(name),
        })
    }

    fn command(&self, placement: &Placement, argv: &[String], stdin: bool) -> Result<Command> {
        let container = placement
            .container
            .as_deref()
            .ok_or_else(|| EnvError::MalformedSpec("docker placement without container".into()))?;
        split_argv(argv)?;

        let mut cmd = Command::new("docker");
        cmd.arg("exec");
        if stdin {
            cmd.arg("-i");
        }
        cmd.args(["-w", placement.workdir.as_str(), container]).args(argv);
        Ok(cmd)
    }

    async fn interrupt(&self, placement: &Placement, _pid: Option<u32>) -> Result<()> {
        let Some(container) = placement.container.as_deref() else {
            return Ok(());
        };
        let mut restart = Command::new("docker");
        restart.args(["restart", "-t", "0", container]);
        let mut log = BuildLog::new();
        run_step(restart, "docker restart", &mut log).await?;
        Ok(())
    }

    async fn teardown(&self, placement: &Placement) -> Result<()> {
        let Some(container) = placement.container.as_deref() else {
            return Ok(());
        };
        let mut rm = Command::new("docker");
        rm.args(["rm", "-f", container]);
        let mut log = BuildLog::new();
        run_step(rm, "docker rm", &mut log).await?;
        Ok(())
    }

    fn teardown_blocking(&self, placement: &Placement) {
        if let Some(container) = placement.container.as_deref() {
            let result = std::process::Command::new("docker")
                .args(["rm", "-f", container])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if let Err(e) = result {
                warn!(container = %container, error = %e, "failed to remove container");
            }
        }
    }
}

/// Host-local environments in a fresh checkout.
///
/// Offers no isolation beyond a private working tree; meant for trusted
/// repositories and for exercising the engine without Docker.
#[derive(Debug, Clone, Default)]
pub struct LocalBackend;

pub const PROVISION_SCRIPT: &str = "provision.sh";

#[async_trait]
impl EnvironmentBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn validate(&self, _recipe: &str) -> Result<()> {
        Ok(())
    }

    async fn provision(
        &self,
        request: &ProvisionRequest<'_>,
        log: &mut BuildLog,
    ) -> Result<Placement> {
        let repo: PathBuf = request.scratch.join("repo");
        checkout(request.repository, request.base_revision, &repo, log).await?;

        if !request.recipe.trim().is_empty() {
            let script = request.scratch.join(PROVISION_SCRIPT);
            tokio::fs::write(&script, request.recipe).await?;
            let mut provision = Command::new("sh");
            provision.arg("-e").arg(&script).current_dir(&repo);
            run_step(provision, "provision", log).await?;
        }

        Ok(Placement {
            workdir: repo.to_string_lossy().into_owned(),
            container: None,
        })
    }

    fn command(&self, placement: &Placement, argv: &[String], _stdin: bool) -> Result<Command> {
        let (program, args) = split_argv(argv)?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&placement.workdir);
        #[cfg(unix)]
        cmd.process_group(0);
        Ok(cmd)
    }

    async fn interrupt(&self, _placement: &Placement, pid: Option<u32>) -> Result<()> {
        let Some(pid) = pid else {
            return Ok(());
        };
        // The command leads its own process group; signal the whole group.
        let status = Command::new("kill")
            .args(["-KILL", "--", &format!("-{pid}")])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            debug!(pid, "process group already gone");
        }
        Ok(())
    }

    async fn teardown(&self, _placement: &Placement) -> Result<()> {
        Ok(())
    }

    fn teardown_blocking(&self, _placement: &Placement) {}
}
