//! Core types for pipeline domain
//!
//! This module contains the records a run produces: one [`StageResult`]
//! per declared stage and the sealed [`PipelineRun`].

#![allow(clippy::must_use_candidate)]

use super::context::BuildContext;
use super::errors::{ErrorClass, StageError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Summary status of a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Executed and succeeded
    Success,
    /// Executed and failed
    Failure,
    /// Succeeded, but a best-effort command reported a problem
    Unstable,
    /// Not executed
    Skipped,
}

impl StageStatus {
    /// Returns true if result is successful
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if result is a failure
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure)
    }

    /// Returns true if result is unstable
    #[must_use]
    pub fn is_unstable(&self) -> bool {
        matches!(self, Self::Unstable)
    }

    /// Returns true if result is skipped
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Unstable => write!(f, "UNSTABLE"),
            Self::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// Why a stage was not executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Its condition evaluated to false
    ConditionNotMet,
    /// An earlier stage sealed the run
    RunSealed,
}

/// How a failed stage affects the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Recorded; the run continues
    Soft,
    /// Seals the run as failed
    Fatal,
    /// The command could not be started; always seals the run
    Infrastructure,
    /// The run was cancelled during the stage
    Cancelled,
}

/// Failure details of an executed stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    /// Effect on the run
    pub kind: FailureKind,
    /// Whether the stage deadline elapsed
    pub timed_out: bool,
    /// Error message
    pub message: String,
}

impl StageFailure {
    /// Applies the failure policy to a body error
    #[must_use]
    pub fn classify(error: &StageError, fatal: bool) -> Self {
        let class = error.class();
        let kind = match class {
            ErrorClass::Infrastructure => FailureKind::Infrastructure,
            ErrorClass::Cancelled => FailureKind::Cancelled,
            ErrorClass::Step | ErrorClass::TimedOut if fatal => FailureKind::Fatal,
            ErrorClass::Step | ErrorClass::TimedOut => FailureKind::Soft,
        };
        Self {
            kind,
            timed_out: class == ErrorClass::TimedOut,
            message: error.to_string(),
        }
    }

    /// The outcome this failure seals the run with, if any
    #[must_use]
    pub fn seals_run(&self) -> Option<RunOutcome> {
        match self.kind {
            FailureKind::Soft => None,
            FailureKind::Fatal | FailureKind::Infrastructure => Some(RunOutcome::Failed),
            FailureKind::Cancelled => Some(RunOutcome::Cancelled),
        }
    }
}

/// Record of one stage in one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name
    pub stage: String,
    /// False if the stage did not run
    pub executed: bool,
    /// True if the body completed without error
    pub succeeded: bool,
    /// Captured command output, possibly empty
    pub output: String,
    /// Problems reported by best-effort commands
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
    /// Failure details when `executed && !succeeded`
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failure: Option<StageFailure>,
    /// Why the stage did not run
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub skipped: Option<SkipReason>,
    /// Wall-clock duration of the body
    pub duration: Duration,
}

impl StageResult {
    /// A stage that did not run
    pub fn skipped(stage: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            stage: stage.into(),
            executed: false,
            succeeded: false,
            output: String::new(),
            warnings: Vec::new(),
            failure: None,
            skipped: Some(reason),
            duration: Duration::ZERO,
        }
    }

    /// A stage whose body completed
    pub fn succeeded(
        stage: impl Into<String>,
        output: String,
        warnings: Vec<String>,
        duration: Duration,
    ) -> Self {
        Self {
            stage: stage.into(),
            executed: true,
            succeeded: true,
            output,
            warnings,
            failure: None,
            skipped: None,
            duration,
        }
    }

    /// A stage whose body failed
    pub fn failed(
        stage: impl Into<String>,
        failure: StageFailure,
        output: String,
        duration: Duration,
    ) -> Self {
        Self {
            stage: stage.into(),
            executed: true,
            succeeded: false,
            output,
            warnings: Vec::new(),
            failure: Some(failure),
            skipped: None,
            duration,
        }
    }

    /// Summary status
    pub fn status(&self) -> StageStatus {
        match (self.executed, self.succeeded) {
            (false, _) => StageStatus::Skipped,
            (true, false) => StageStatus::Failure,
            (true, true) if self.warnings.is_empty() => StageStatus::Success,
            (true, true) => StageStatus::Unstable,
        }
    }

    /// True if the stage failed in a way that sealed the run
    pub fn is_fatal_failure(&self) -> bool {
        self.failure
            .as_ref()
            .is_some_and(|f| f.seals_run() == Some(RunOutcome::Failed))
    }

    /// Last `lines` lines of the captured output
    pub fn output_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.output.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Terminal state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// Every stage ran or was skipped without a fatal failure
    Completed,
    /// A fatal stage failed
    Failed,
    /// The run was cancelled
    Cancelled,
}

impl RunOutcome {
    /// Returns true for [`RunOutcome::Completed`]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// A sealed run: its build context and the result of every stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Correlation id for logs
    pub run_id: Uuid,
    /// Metadata shared by all stages
    pub context: BuildContext,
    /// Terminal state
    pub outcome: RunOutcome,
    /// One result per declared stage, in declaration order
    pub stages: Vec<StageResult>,
    /// Total wall-clock duration
    pub duration: Duration,
}

impl PipelineRun {
    /// Result for a stage by name
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|r| r.stage == name)
    }

    /// True if the named stage executed and succeeded
    pub fn stage_succeeded(&self, name: &str) -> bool {
        self.stage(name).is_some_and(|r| r.executed && r.succeeded)
    }

    /// The first stage whose failure sealed the run
    pub fn first_fatal(&self) -> Option<&StageResult> {
        self.stages.iter().find(|r| r.is_fatal_failure())
    }

    /// Stages that executed but did not end in plain success
    pub fn degraded_stages(&self) -> Vec<&StageResult> {
        self.stages
            .iter()
            .filter(|r| matches!(r.status(), StageStatus::Failure | StageStatus::Unstable))
            .collect()
    }

    /// Names of the stages that executed, in order
    pub fn executed_stages(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|r| r.executed)
            .map(|r| r.stage.as_str())
            .collect()
    }
}

/// Trait for types that can be validated
#[allow(clippy::missing_errors_doc)]
pub trait Validate {
    /// Type of validation error
    type Error;

    /// Validates this type
    fn validate(&self) -> std::result::Result<(), Self::Error>;
}
