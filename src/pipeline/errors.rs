//! Error types for pipeline domain

use crate::executor::RunnerError;
use crate::infrastructure::CredentialError;
use thiserror::Error;

/// Errors that can occur outside of stage execution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Validation failed with specified reason
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// The persisted run counter is unreadable
    #[error("Run counter error at {path}: {reason}")]
    Counter {
        /// Location of the counter file.
        path: String,
        /// What went wrong.
        reason: String,
    },

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors raised by a stage body.
///
/// The engine classifies these into soft, fatal, infrastructure and
/// cancellation failures; see [`StageError::class`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// An external command failed or could not be run
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// Registry credentials could not be acquired
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    /// The stage body failed for a reason of its own
    #[error("{message}")]
    Failed {
        /// Human readable reason.
        message: String,
        /// Output captured before the failure.
        output: String,
    },
}

/// Coarse classification of a [`StageError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The body ran and failed
    Step,
    /// The stage deadline elapsed
    TimedOut,
    /// The execution environment is broken (spawn or IO failure)
    Infrastructure,
    /// The run was cancelled while the stage was executing
    Cancelled,
}

impl StageError {
    /// Creates a body-level failure with the output captured so far
    pub fn failed(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            output: output.into(),
        }
    }

    /// Classifies the error for the engine's failure policy
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Runner(RunnerError::Spawn { .. } | RunnerError::Io(_)) => {
                ErrorClass::Infrastructure
            }
            Self::Runner(RunnerError::TimedOut { .. }) => ErrorClass::TimedOut,
            Self::Runner(RunnerError::Cancelled { .. }) => ErrorClass::Cancelled,
            Self::Runner(RunnerError::NonZeroExit { .. })
            | Self::Credentials(_)
            | Self::Failed { .. } => ErrorClass::Step,
        }
    }

    /// Output captured before the failure, if any
    #[must_use]
    pub fn output(&self) -> &str {
        match self {
            Self::Runner(err) => err.output(),
            Self::Failed { output, .. } => output,
            Self::Credentials(_) => "",
        }
    }
}

/// Validation errors for parameters and pipeline configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Name cannot be empty
    #[error("Name cannot be empty")]
    EmptyName,

    /// Name too long
    #[error("Name too long: max {max} characters, got {len}")]
    NameTooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length of the name.
        len: usize,
    },

    /// Invalid characters in name
    #[error("Invalid characters in name: '{name}'")]
    InvalidNameChars {
        /// The invalid name.
        name: String,
    },

    /// Parameter is not declared
    #[error("Unknown parameter '{name}'")]
    UnknownParameter {
        /// The undeclared parameter name.
        name: String,
    },

    /// Boolean parameter with a value other than true/false
    #[error("Parameter '{name}' expects true or false, got '{value}'")]
    InvalidBoolean {
        /// Parameter name.
        name: String,
        /// Rejected value.
        value: String,
    },

    /// Choice parameter with a value outside its enumeration
    #[error("Parameter '{name}' must be one of [{}], got '{value}'", choices.join(", "))]
    InvalidChoice {
        /// Parameter name.
        name: String,
        /// Rejected value.
        value: String,
        /// Accepted values.
        choices: Vec<String>,
    },

    /// Required string parameter is empty
    #[error("Parameter '{name}' cannot be empty")]
    EmptyValue {
        /// Parameter name.
        name: String,
    },

    /// Image name is not a valid container image name
    #[error("Invalid image name '{value}': use lowercase letters, digits, '.', '_' or '-'")]
    InvalidImageName {
        /// Rejected value.
        value: String,
    },

    /// Push requested without a registry account
    #[error("REGISTRY_USERNAME is required when PUSH_TO_REGISTRY is true")]
    MissingRegistryUsername,

    /// Pipeline must have at least one stage
    #[error("Pipeline must have at least one stage")]
    EmptyPipeline,

    /// Two stages share a name
    #[error("Duplicate stage name '{stage}'")]
    DuplicateStage {
        /// The repeated name.
        stage: String,
    },

    /// A condition refers to a stage that does not run earlier
    #[error("Stage '{stage}' depends on '{depends_on}', which is not declared before it")]
    UnknownStageReference {
        /// Stage holding the condition.
        stage: String,
        /// Referenced stage name.
        depends_on: String,
    },

    /// Invalid timeout value
    #[error("Invalid timeout: must be positive, got {value}")]
    InvalidTimeout {
        /// The invalid timeout value.
        value: u64,
    },

    /// A configured command line could not be parsed
    #[error("Invalid command for '{name}': {reason}")]
    InvalidCommand {
        /// Command slot name.
        name: String,
        /// Parse failure.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_invalid_choice_lists_choices() {
        let err = ValidationError::InvalidChoice {
            name: "BRANCH".to_string(),
            value: "feature".to_string(),
            choices: vec!["main".to_string(), "develop".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Parameter 'BRANCH' must be one of [main, develop], got 'feature'"
        );
    }

    #[test]
    fn test_pipeline_error_from_validation() {
        let err: PipelineError = ValidationError::EmptyPipeline.into();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(err.to_string().contains("at least one stage"));
    }

    #[test]
    fn test_stage_error_classification() {
        let spawn = StageError::from(RunnerError::Spawn {
            program: "docker".to_string(),
            reason: "not found".to_string(),
        });
        assert_eq!(spawn.class(), ErrorClass::Infrastructure);

        let timeout = StageError::from(RunnerError::TimedOut {
            command: "npm test".to_string(),
            limit: Duration::from_secs(1),
            output: String::new(),
        });
        assert_eq!(timeout.class(), ErrorClass::TimedOut);

        let cancelled = StageError::from(RunnerError::Cancelled {
            command: "npm test".to_string(),
        });
        assert_eq!(cancelled.class(), ErrorClass::Cancelled);

        let exit = StageError::from(RunnerError::NonZeroExit {
            command: "npm test".to_string(),
            code: 1,
            output: "1 failing".to_string(),
        });
        assert_eq!(exit.class(), ErrorClass::Step);
        assert_eq!(exit.output(), "1 failing");
    }

    #[test]
    fn test_stage_error_failed_keeps_output() {
        let err = StageError::failed("no commit", "fatal: bad revision");
        assert_eq!(err.to_string(), "no commit");
        assert_eq!(err.output(), "fatal: bad revision");
        assert_eq!(err.class(), ErrorClass::Step);
    }
}
