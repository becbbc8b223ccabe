//! Execution traits
//!
//! [`ProcessLauncher`] is the seam between the command runner and the
//! operating system; tests replace it with a scripted launcher.

use super::runner::{Invocation, RunnerError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline of the current stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    /// Instant the stage must finish by
    pub at: Instant,
    /// Configured limit, for error messages
    pub limit: Duration,
}

impl Deadline {
    /// Deadline `limit` from now
    #[must_use]
    pub fn after(limit: Duration) -> Self {
        Self {
            at: Instant::now() + limit,
            limit,
        }
    }

    /// True if the deadline has passed
    #[must_use]
    pub fn elapsed(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// What a launcher must race the child process against
#[derive(Debug, Clone)]
pub struct Watch {
    /// Run-wide cancellation
    pub cancel: CancellationToken,
    /// Stage deadline, if any
    pub deadline: Option<Deadline>,
}

/// How a launched process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// The process exited on its own
    Exited {
        /// Exit status, -1 if killed by a signal
        code: i32,
        /// Combined stdout and stderr
        output: String,
    },
    /// The run was cancelled; the process was killed and reaped
    Cancelled {
        /// Output captured before the kill
        output: String,
    },
    /// The deadline passed; the process was killed and reaped
    TimedOut {
        /// Output captured before the kill
        output: String,
    },
}

/// Starts external processes
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Runs `invocation` to completion, cancellation or deadline.
    ///
    /// The invocation's environment is complete; launchers must not inherit
    /// anything else from the host process.
    async fn launch(&self, invocation: &Invocation, watch: &Watch)
    -> Result<ProcessExit, RunnerError>;
}

/// Health status of an external tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Tool is available
    Healthy,

    /// Tool is available but some features are not
    Degraded {
        /// Reason for degradation
        reason: String,
    },

    /// Tool is unavailable
    Unhealthy {
        /// Reason for being unhealthy
        reason: String,
    },
}

impl HealthStatus {
    /// Returns true if the tool is healthy or degraded
    #[must_use]
    pub fn is_operational(&self) -> bool {
        !matches!(self, Self::Unhealthy { .. })
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "ok"),
            Self::Degraded { reason } => write!(f, "degraded: {reason}"),
            Self::Unhealthy { reason } => write!(f, "unavailable: {reason}"),
        }
    }
}
