//! Deadline-bounded command execution inside an environment handle.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use f2p_core::{ExecutionResult, Phase};
use f2p_env::EnvironmentHandle;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Raw output of one command run in a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

type Buffer = Arc<Mutex<Vec<u8>>>;

fn spawn_reader<R>(mut source: R, sink: Buffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match source.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => sink.lock().await.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    debug!(error = %e, "output stream closed");
                    break;
                }
            }
        }
    })
}

async fn drain(buffer: &Buffer) -> String {
    String::from_utf8_lossy(&buffer.lock().await).into_owned()
}

/// Runs commands in an environment under a deadline.
///
/// Output is captured incrementally, so a timed-out command keeps
/// everything it printed before the kill.
#[derive(Debug, Clone)]
pub struct TestExecutor {
    kill_grace: Duration,
}

impl TestExecutor {
    pub fn new(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }

    /// Run one test phase. Never fails: a command that cannot be started
    /// yields a result with no exit code and the error on stderr.
    pub async fn run(
        &self,
        handle: &EnvironmentHandle,
        phase: Phase,
        argv: &[String],
        timeout: Duration,
    ) -> ExecutionResult {
        debug!(instance_id = %handle.instance_id(), %phase, ?argv, "running test suite");
        match self.run_command(handle, argv, None, timeout).await {
            Ok(output) => ExecutionResult {
                phase,
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
                duration_ms: output.duration_ms,
                timed_out: output.timed_out,
            },
            Err(e) => {
                warn!(instance_id = %handle.instance_id(), %phase, error = %e, "test command did not start");
                ExecutionResult::spawn_failure(phase, e)
            }
        }
    }

    /// Run `argv` with optional `input` on stdin.
    ///
    /// On timeout the handle interrupts everything the command started,
    /// then readers get `kill_grace` to drain what is left in the pipes.
    pub async fn run_command(
        &self,
        handle: &EnvironmentHandle,
        argv: &[String],
        input: Option<&[u8]>,
        timeout: Duration,
    ) -> f2p_env::Result<CommandOutput> {
        let start = Instant::now();

        let mut cmd = handle.command(argv, input.is_some())?;
        cmd.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let pid = child.id();

        let stdout: Buffer = Arc::new(Mutex::new(Vec::new()));
        let stderr: Buffer = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_reader(out, Arc::clone(&stdout)));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_reader(err, Arc::clone(&stderr)));
        }

        if let (Some(data), Some(mut pipe)) = (input, child.stdin.take()) {
            let data = data.to_vec();
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&data).await {
                    debug!(error = %e, "stdin closed early");
                }
            });
        }

        let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => (status?.code(), false),
            Err(_) => {
                warn!(
                    instance_id = %handle.instance_id(),
                    timeout_secs = timeout.as_secs(),
                    "command timed out, killing"
                );
                if let Err(e) = handle.interrupt(pid).await {
                    warn!(error = %e, "environment interrupt failed");
                }
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "child already exited");
                }
                if tokio::time::timeout(self.kill_grace, child.wait()).await.is_err() {
                    warn!(?pid, "process still running after kill grace");
                }
                (None, true)
            }
        };

        for mut reader in readers {
            if tokio::time::timeout(self.kill_grace, &mut reader).await.is_err() {
                reader.abort();
            }
        }

        Ok(CommandOutput {
            exit_code,
            stdout: drain(&stdout).await,
            stderr: drain(&stderr).await,
            duration_ms: start.elapsed().as_millis() as u64,
            timed_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_success() {
        let output = CommandOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 1,
            timed_out: false,
        };
        assert!(output.success());
        assert!(!CommandOutput {
            timed_out: true,
            exit_code: None,
            ..output
        }
        .success());
    }

    #[tokio::test]
    async fn test_reader_collects_all_chunks() {
        let sink: Buffer = Arc::new(Mutex::new(Vec::new()));
        let data: &[u8] = b"PASSED tests/test_a.py::test_x\n";
        spawn_reader(data, Arc::clone(&sink)).await.unwrap();
        assert_eq!(drain(&sink).await, "PASSED tests/test_a.py::test_x\n");
    }
}
