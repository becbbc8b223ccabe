//! Process launcher backed by the operating system
//!
//! Children are spawned with a cleared environment (the runner passes the
//! complete one). Stdout and stderr are read concurrently into one combined
//! buffer as raw bytes and decoded lossily. A cancelled or timed-out child is
//! killed and reaped before the launcher returns. Once the child exits, its
//! pipes get [`DRAIN_GRACE`] to close; a background process that inherited
//! them is not waited for.

use super::runner::{Invocation, RunnerError};
use super::traits::{HealthStatus, ProcessExit, ProcessLauncher, Watch};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// How long output is drained after the child exits
pub const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Launches real child processes
#[derive(Debug, Clone, Default)]
pub struct SystemLauncher;

enum WaitOutcome {
    Exited(i32),
    Cancelled,
    TimedOut,
}

impl SystemLauncher {
    /// Creates a launcher
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Probes `program --version`
    pub async fn probe(&self, program: &str) -> HealthStatus {
        match Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(out) if out.status.success() => HealthStatus::Healthy,
            Ok(out) => HealthStatus::Degraded {
                reason: format!(
                    "'{program} --version' exited with code {}",
                    out.status.code().unwrap_or(-1)
                ),
            },
            Err(e) => HealthStatus::Unhealthy {
                reason: e.to_string(),
            },
        }
    }
}

fn pump<R>(reader: R, buffer: Arc<Mutex<Vec<u8>>>, stream: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    tracing::debug!(stream, "{}", String::from_utf8_lossy(&line).trim_end());
                    buffer.lock().extend_from_slice(&line);
                }
                Err(e) => {
                    tracing::debug!(stream, error = %e, "Output stream closed");
                    break;
                }
            }
        }
    })
}

#[async_trait]
impl ProcessLauncher for SystemLauncher {
    async fn launch(
        &self,
        invocation: &Invocation,
        watch: &Watch,
    ) -> Result<ProcessExit, RunnerError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .env_clear()
            .envs(&invocation.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| RunnerError::Spawn {
            program: invocation.program.clone(),
            reason: e.to_string(),
        })?;

        if let (Some(secret), Some(mut stdin)) = (&invocation.stdin, child.stdin.take()) {
            stdin
                .write_all(secret.expose().as_bytes())
                .await
                .map_err(|e| RunnerError::Io(e.to_string()))?;
            // Closing stdin signals end of input.
            drop(stdin);
        }

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let mut readers: Vec<JoinHandle<()>> = [
            child
                .stdout
                .take()
                .map(|out| pump(out, Arc::clone(&buffer), "stdout")),
            child
                .stderr
                .take()
                .map(|err| pump(err, Arc::clone(&buffer), "stderr")),
        ]
        .into_iter()
        .flatten()
        .collect();

        let deadline = async {
            match watch.deadline {
                Some(d) => tokio::time::sleep_until(d.at).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| RunnerError::Io(e.to_string()))?;
                WaitOutcome::Exited(status.code().unwrap_or(-1))
            }
            () = watch.cancel.cancelled() => WaitOutcome::Cancelled,
            () = deadline => WaitOutcome::TimedOut,
        };

        if !matches!(outcome, WaitOutcome::Exited(_)) {
            // kill() also reaps the child.
            if let Err(e) = child.kill().await {
                tracing::warn!(program = %invocation.program, error = %e, "Failed to kill child");
            }
        }

        if matches!(outcome, WaitOutcome::Exited(_)) {
            let drained = async {
                for reader in &mut readers {
                    let _ = reader.await;
                }
            };
            tokio::select! {
                () = drained => {}
                () = tokio::time::sleep(DRAIN_GRACE) => {
                    tracing::debug!(
                        program = %invocation.program,
                        "Output still open after exit, not waiting for background processes"
                    );
                }
                () = watch.cancel.cancelled() => {}
            }
        }
        for reader in readers {
            reader.abort();
        }

        let output = String::from_utf8_lossy(&buffer.lock()).into_owned();
        Ok(match outcome {
            WaitOutcome::Exited(code) => ProcessExit::Exited { code, output },
            WaitOutcome::Cancelled => ProcessExit::Cancelled { output },
            WaitOutcome::TimedOut => ProcessExit::TimedOut { output },
        })
    }
}
