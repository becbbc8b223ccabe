//! Scripted process launcher for tests

use super::runner::{Invocation, RunnerError};
use super::traits::{ProcessExit, ProcessLauncher, Watch};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Scripted behaviour of a matching command
#[derive(Debug, Clone)]
pub enum Reply {
    /// Exit with a status and output
    Exit {
        /// Exit status
        code: i32,
        /// Combined output
        output: String,
    },
    /// Fail to start, as if the program did not exist
    SpawnFailure,
    /// Run until cancelled or the deadline passes
    Hang,
    /// Cancel the run while the command is executing
    Interrupt,
}

impl Reply {
    /// Exit 0 with `output`
    pub fn ok(output: impl Into<String>) -> Self {
        Self::Exit {
            code: 0,
            output: output.into(),
        }
    }

    /// Exit with `code` and `output`
    pub fn exit(code: i32, output: impl Into<String>) -> Self {
        Self::Exit {
            code,
            output: output.into(),
        }
    }
}

/// Launcher that records invocations and replies from a script.
///
/// Rules match on a prefix of the command line; the first match wins and
/// unmatched commands exit 0 without output.
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    rules: Mutex<Vec<(String, Reply)>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedLauncher {
    /// Creates a launcher with no rules
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds a rule
    pub fn on(self: Arc<Self>, prefix: impl Into<String>, reply: Reply) -> Arc<Self> {
        self.rules.lock().push((prefix.into(), reply));
        self
    }

    /// Invocations seen so far, fully resolved
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    /// Command lines seen so far
    pub fn commands(&self) -> Vec<String> {
        self.calls.lock().iter().map(Invocation::command_line).collect()
    }

    /// True if some command line started with `prefix`
    pub fn ran(&self, prefix: &str) -> bool {
        self.commands().iter().any(|c| c.starts_with(prefix))
    }

    fn reply_for(&self, command: &str) -> Reply {
        self.rules
            .lock()
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map_or_else(|| Reply::ok(""), |(_, reply)| reply.clone())
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn launch(
        &self,
        invocation: &Invocation,
        watch: &Watch,
    ) -> Result<ProcessExit, RunnerError> {
        self.calls.lock().push(invocation.clone());
        let command = invocation.command_line();

        match self.reply_for(&command) {
            Reply::Exit { code, output } => Ok(ProcessExit::Exited { code, output }),
            Reply::SpawnFailure => Err(RunnerError::Spawn {
                program: invocation.program.clone(),
                reason: "No such file or directory (os error 2)".to_string(),
            }),
            Reply::Interrupt => {
                watch.cancel.cancel();
                Ok(ProcessExit::Cancelled {
                    output: String::new(),
                })
            }
            Reply::Hang => {
                let deadline = async {
                    match watch.deadline {
                        Some(d) => tokio::time::sleep_until(d.at).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    () = watch.cancel.cancelled() => Ok(ProcessExit::Cancelled {
                        output: String::new(),
                    }),
                    () = deadline => Ok(ProcessExit::TimedOut {
                        output: String::new(),
                    }),
                }
            }
        }
    }
}
