//! Command runner
//!
//! Every external tool is run through a [`CommandRunner`]. The runner layers
//! the environment (base < invocation < build context), expands `${VAR}`
//! references in arguments, races the child against cancellation and the
//! stage deadline, and applies the checked or best-effort policy to the
//! exit status.

use super::shell::expand_variables;
use super::traits::{Deadline, ProcessExit, ProcessLauncher, Watch};
use crate::infrastructure::Secret;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors running an external command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// The program could not be started
    #[error("Failed to start '{program}': {reason}")]
    Spawn {
        /// Program name
        program: String,
        /// OS error
        reason: String,
    },

    /// Checked command exited with a non-zero status
    #[error("'{command}' exited with code {code}")]
    NonZeroExit {
        /// Command line
        command: String,
        /// Exit status
        code: i32,
        /// Combined output
        output: String,
    },

    /// The stage deadline passed while the command was running
    #[error("'{command}' timed out after {}s", limit.as_secs())]
    TimedOut {
        /// Command line
        command: String,
        /// Stage limit
        limit: Duration,
        /// Output captured before the kill
        output: String,
    },

    /// The run was cancelled
    #[error("'{command}' was cancelled")]
    Cancelled {
        /// Command line
        command: String,
    },

    /// IO error talking to the child process
    #[error("IO error: {0}")]
    Io(String),
}

impl RunnerError {
    /// Output captured before the failure
    #[must_use]
    pub fn output(&self) -> &str {
        match self {
            Self::NonZeroExit { output, .. } | Self::TimedOut { output, .. } => output,
            Self::Spawn { .. } | Self::Cancelled { .. } | Self::Io(_) => "",
        }
    }
}

/// A single external command
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Program to run
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory, the current directory if unset
    pub cwd: Option<PathBuf>,
    /// Per-invocation environment
    pub env: BTreeMap<String, String>,
    /// Written to the child's stdin, never logged
    pub stdin: Option<Secret>,
}

impl Invocation {
    /// Creates an invocation of `program` without arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Appends an argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory
    #[must_use]
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Sets an environment variable for this invocation
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Feeds a secret to the child's stdin
    #[must_use]
    pub fn stdin(mut self, secret: Secret) -> Self {
        self.stdin = Some(secret);
        self
    }

    /// Quoted command line, safe to log
    #[must_use]
    pub fn command_line(&self) -> String {
        shell_words::join(std::iter::once(&self.program).chain(self.args.iter()))
    }

    fn expanded(&self, env: &BTreeMap<String, String>) -> Self {
        Self {
            program: expand_variables(&self.program, env),
            args: self.args.iter().map(|a| expand_variables(a, env)).collect(),
            cwd: self.cwd.clone(),
            env: env.clone(),
            stdin: self.stdin.clone(),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("command", &self.command_line())
            .field("cwd", &self.cwd)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("stdin", &self.stdin)
            .finish()
    }
}

/// Result of a command that completed under its policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Command line as run
    pub command: String,
    /// Exit status
    pub exit_code: i32,
    /// Combined stdout and stderr
    pub output: String,
    /// Wall-clock duration
    pub duration: Duration,
    /// Set when a best-effort command exited non-zero
    pub warning: Option<String>,
}

impl CommandOutput {
    /// True if the command exited with status 0
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Exit status policy of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    /// Non-zero exit is an error
    Checked,
    /// Non-zero exit is downgraded to a warning
    BestEffort,
}

/// Prefix of host variables kept away from child processes
pub const RESERVED_ENV_PREFIX: &str = "SHIPLINE_";

fn host_environment() -> BTreeMap<String, String> {
    without_reserved(std::env::vars())
}

fn without_reserved(vars: impl Iterator<Item = (String, String)>) -> BTreeMap<String, String> {
    vars.filter(|(name, _)| !name.starts_with(RESERVED_ENV_PREFIX))
        .collect()
}

/// Runs invocations with a layered environment and a cancellation scope
#[derive(Clone)]
pub struct CommandRunner {
    launcher: Arc<dyn ProcessLauncher>,
    base_env: BTreeMap<String, String>,
    injected_env: BTreeMap<String, String>,
    cancel: CancellationToken,
    deadline: Option<Deadline>,
}

impl CommandRunner {
    /// Creates a runner with an empty base environment
    pub fn new(launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            launcher,
            base_env: BTreeMap::new(),
            injected_env: BTreeMap::new(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Runner backed by real processes, inheriting the host environment
    ///
    /// Variables starting with [`RESERVED_ENV_PREFIX`] configure shipline
    /// itself and are not passed on.
    #[must_use]
    pub fn system() -> Self {
        Self::new(Arc::new(super::process::SystemLauncher::new()))
            .with_base_env(host_environment())
    }

    /// Replaces the base environment
    #[must_use]
    pub fn with_base_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.base_env = env;
        self
    }

    /// Adds variables to the base environment
    #[must_use]
    pub fn with_extra_env(mut self, env: &BTreeMap<String, String>) -> Self {
        self.base_env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Removes variables from the base environment
    #[must_use]
    pub fn without_env<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            self.base_env.remove(name.as_ref());
        }
        self
    }

    /// Uses `token` for cancellation
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Runner for one stage: context variables on top, optional deadline
    #[must_use]
    pub fn scoped(
        &self,
        injected_env: BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            launcher: Arc::clone(&self.launcher),
            base_env: self.base_env.clone(),
            injected_env,
            cancel: self.cancel.clone(),
            deadline: timeout.map(Deadline::after),
        }
    }

    /// Runner that ignores run cancellation and deadlines, for cleanup
    #[must_use]
    pub fn detached(&self) -> Self {
        Self {
            launcher: Arc::clone(&self.launcher),
            base_env: self.base_env.clone(),
            injected_env: self.injected_env.clone(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Token observed by this runner
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Environment an invocation would see
    #[must_use]
    pub fn effective_env(&self, invocation: &Invocation) -> BTreeMap<String, String> {
        let mut env = self.base_env.clone();
        env.extend(invocation.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.extend(self.injected_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    /// Runs a command whose non-zero exit is an error
    ///
    /// # Errors
    ///
    /// Any [`RunnerError`].
    pub async fn checked(&self, invocation: Invocation) -> Result<CommandOutput, RunnerError> {
        self.run(invocation, InvocationMode::Checked).await
    }

    /// Runs a command whose non-zero exit becomes a warning
    ///
    /// # Errors
    ///
    /// Spawn failures, time-outs and cancellation are never softened.
    pub async fn best_effort(&self, invocation: Invocation) -> Result<CommandOutput, RunnerError> {
        self.run(invocation, InvocationMode::BestEffort).await
    }

    /// Runs a command under `mode`
    ///
    /// # Errors
    ///
    /// See [`RunnerError`].
    pub async fn run(
        &self,
        invocation: Invocation,
        mode: InvocationMode,
    ) -> Result<CommandOutput, RunnerError> {
        let resolved = invocation.expanded(&self.effective_env(&invocation));
        let command = resolved.command_line();

        if self.cancel.is_cancelled() {
            return Err(RunnerError::Cancelled { command });
        }
        if let Some(deadline) = self.deadline.filter(Deadline::elapsed) {
            return Err(RunnerError::TimedOut {
                command,
                limit: deadline.limit,
                output: String::new(),
            });
        }

        let watch = Watch {
            cancel: self.cancel.clone(),
            deadline: self.deadline,
        };

        tracing::debug!(command = %command, "Running command");
        let start = Instant::now();
        let exit = self.launcher.launch(&resolved, &watch).await?;
        let duration = start.elapsed();

        let redact = |text: String| match &resolved.stdin {
            Some(secret) => secret.redact(&text),
            None => text,
        };

        let (code, output) = match exit {
            ProcessExit::Exited { code, output } => (code, redact(output)),
            ProcessExit::Cancelled { .. } => {
                tracing::warn!(command = %command, "Command cancelled");
                return Err(RunnerError::Cancelled { command });
            }
            ProcessExit::TimedOut { output } => {
                let limit = self.deadline.map_or(Duration::ZERO, |d| d.limit);
                tracing::warn!(
                    command = %command,
                    limit_secs = limit.as_secs(),
                    "Command timed out"
                );
                return Err(RunnerError::TimedOut {
                    command,
                    limit,
                    output: redact(output),
                });
            }
        };

        tracing::debug!(
            command = %command,
            exit_code = code,
            duration_ms = duration.as_millis(),
            "Command finished"
        );

        if code == 0 {
            return Ok(CommandOutput {
                command,
                exit_code: code,
                output,
                duration,
                warning: None,
            });
        }

        match mode {
            InvocationMode::Checked => Err(RunnerError::NonZeroExit {
                command,
                code,
                output,
            }),
            InvocationMode::BestEffort => {
                let warning = format!("'{command}' exited with code {code}");
                tracing::warn!(command = %command, exit_code = code, "Best-effort command failed");
                Ok(CommandOutput {
                    command,
                    exit_code: code,
                    output,
                    duration,
                    warning: Some(warning),
                })
            }
        }
    }
}

impl fmt::Debug for CommandRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRunner")
            .field("base_env", &self.base_env.len())
            .field("injected_env", &self.injected_env)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
