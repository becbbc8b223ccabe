//! Stage types for pipeline definition
//!
//! This module defines stages, their `when` conditions and the builder used
//! to declare them.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use super::Validate;
use super::context::EnvironmentMode;
use super::errors::ValidationError;
use super::parameters::{ParameterFlag, ParameterSet};
use super::steps::StageAction;
use super::types::StageResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// When conditions for stage execution.
///
/// Conditions are evaluated right before the stage would run, against the
/// parameters and the results recorded so far in the same run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhenCondition {
    /// Always execute
    Always,

    /// Execute when a boolean parameter is true
    Flag {
        /// Parameter switch
        flag: ParameterFlag,
    },

    /// Execute when an earlier stage executed and succeeded
    StageSucceeded {
        /// Stage name
        stage: String,
    },

    /// All conditions must be true
    AllOf {
        /// List of conditions
        conditions: Vec<WhenCondition>,
    },

    /// At least one condition must be true
    AnyOf {
        /// List of conditions
        conditions: Vec<WhenCondition>,
    },
}

impl WhenCondition {
    /// Creates a parameter condition
    pub fn flag(flag: ParameterFlag) -> Self {
        Self::Flag { flag }
    }

    /// Creates a stage success condition
    pub fn stage_succeeded(stage: impl Into<String>) -> Self {
        Self::StageSucceeded {
            stage: stage.into(),
        }
    }

    /// Creates an all-of condition
    pub fn all_of(conditions: Vec<WhenCondition>) -> Self {
        Self::AllOf { conditions }
    }

    /// Creates an any-of condition
    pub fn any_of(conditions: Vec<WhenCondition>) -> Self {
        Self::AnyOf { conditions }
    }

    /// Evaluates the condition; conjunctions and disjunctions short-circuit
    pub fn evaluate(&self, params: &ParameterSet, results: &[StageResult]) -> bool {
        match self {
            Self::Always => true,
            Self::Flag { flag } => params.flag(*flag),
            Self::StageSucceeded { stage } => results
                .iter()
                .any(|r| &r.stage == stage && r.executed && r.succeeded),
            Self::AllOf { conditions } => conditions.iter().all(|c| c.evaluate(params, results)),
            Self::AnyOf { conditions } => conditions.iter().any(|c| c.evaluate(params, results)),
        }
    }

    /// Names of the stages this condition depends on
    pub fn referenced_stages(&self) -> Vec<&str> {
        match self {
            Self::Always | Self::Flag { .. } => Vec::new(),
            Self::StageSucceeded { stage } => vec![stage.as_str()],
            Self::AllOf { conditions } | Self::AnyOf { conditions } => conditions
                .iter()
                .flat_map(WhenCondition::referenced_stages)
                .collect(),
        }
    }

    /// First parameter switch that is off, used to explain a skipped stage
    pub fn first_unmet_flag(&self, params: &ParameterSet) -> Option<ParameterFlag> {
        match self {
            Self::Flag { flag } if !params.flag(*flag) => Some(*flag),
            Self::AllOf { conditions } => {
                conditions.iter().find_map(|c| c.first_unmet_flag(params))
            }
            _ => None,
        }
    }
}

impl fmt::Display for WhenCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |conditions: &[WhenCondition], op: &str| {
            conditions
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(op)
        };
        match self {
            Self::Always => write!(f, "always"),
            Self::Flag { flag } => write!(f, "{flag}"),
            Self::StageSucceeded { stage } => write!(f, "{stage} succeeded"),
            Self::AllOf { conditions } => write!(f, "({})", join(conditions, " and ")),
            Self::AnyOf { conditions } => write!(f, "({})", join(conditions, " or ")),
        }
    }
}

impl Validate for WhenCondition {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        match self {
            Self::Always | Self::Flag { .. } => Ok(()),
            Self::StageSucceeded { stage } => {
                if stage.is_empty() {
                    return Err(ValidationError::EmptyName);
                }
                Ok(())
            }
            Self::AllOf { conditions } | Self::AnyOf { conditions } => {
                for cond in conditions {
                    cond.validate()?;
                }
                Ok(())
            }
        }
    }
}

/// A stage in a pipeline
#[derive(Clone)]
pub struct Stage {
    /// Stage name
    pub name: String,

    /// Condition evaluated before the stage runs
    pub when: WhenCondition,

    /// Whether a failure seals the run
    pub fatal: bool,

    /// Optional deadline for the whole stage body
    pub timeout: Option<Duration>,

    /// Value of `NODE_ENV` for the stage's commands
    pub mode: EnvironmentMode,

    action: Arc<dyn StageAction>,
}

impl Validate for Stage {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        if self.name.len() > 100 {
            return Err(ValidationError::NameTooLong {
                max: 100,
                len: self.name.len(),
            });
        }

        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidNameChars {
                name: self.name.clone(),
            });
        }

        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ValidationError::InvalidTimeout { value: 0 });
        }

        self.when.validate()
    }
}

impl Stage {
    /// Creates a new stage that always runs and is not fatal
    pub fn new(name: impl Into<String>, action: impl StageAction + 'static) -> Self {
        Self::from_arc(name, Arc::new(action))
    }

    /// Creates a new stage from a shared action
    pub fn from_arc(name: impl Into<String>, action: Arc<dyn StageAction>) -> Self {
        Self {
            name: name.into(),
            when: WhenCondition::Always,
            fatal: false,
            timeout: None,
            mode: EnvironmentMode::Test,
            action,
        }
    }

    /// Sets when condition for this stage
    pub fn with_when(mut self, when: WhenCondition) -> Self {
        self.when = when;
        self
    }

    /// Marks the stage fatal or soft
    pub fn with_fatal(mut self, fatal: bool) -> Self {
        self.fatal = fatal;
        self
    }

    /// Sets a deadline for this stage
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the environment mode
    pub fn with_mode(mut self, mode: EnvironmentMode) -> Self {
        self.mode = mode;
        self
    }

    /// Body of the stage
    pub fn action(&self) -> &dyn StageAction {
        self.action.as_ref()
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("when", &self.when)
            .field("fatal", &self.fatal)
            .field("timeout", &self.timeout)
            .field("mode", &self.mode)
            .field("action", &self.action.describe())
            .finish()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let policy = if self.fatal { "fatal" } else { "soft" };
        write!(f, "Stage({}): {policy}, when {}", self.name, self.when)
    }
}

/// Builder for creating stages
pub struct StageBuilder {
    stage: Stage,
}

impl StageBuilder {
    /// Creates a new stage builder
    pub fn new(name: impl Into<String>, action: impl StageAction + 'static) -> Self {
        Self {
            stage: Stage::new(name, action),
        }
    }

    /// Sets when condition for the stage
    pub fn when(mut self, when: WhenCondition) -> Self {
        self.stage.when = when;
        self
    }

    /// Marks the stage fatal
    pub fn fatal(mut self) -> Self {
        self.stage.fatal = true;
        self
    }

    /// Sets the stage deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.stage.timeout = Some(timeout);
        self
    }

    /// Sets the environment mode
    pub fn mode(mut self, mode: EnvironmentMode) -> Self {
        self.stage.mode = mode;
        self
    }

    /// Builds the stage
    #[allow(clippy::missing_errors_doc)]
    pub fn build(self) -> Result<Stage, ValidationError> {
        self.stage.validate()?;
        Ok(self.stage)
    }

    /// Builds the stage without validation (for internal use)
    #[must_use]
    pub fn build_unchecked(self) -> Stage {
        self.stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::parameters::RawParameters;
    use crate::pipeline::steps::Noop;
    use crate::pipeline::types::SkipReason;

    fn params(pairs: &[(&str, &str)]) -> ParameterSet {
        let raw = pairs
            .iter()
            .fold(RawParameters::new(), |raw, (k, v)| raw.set(*k, *v));
        ParameterSet::from_raw(&raw).unwrap()
    }

    fn ok(stage: &str) -> StageResult {
        StageResult::succeeded(stage, String::new(), Vec::new(), Duration::ZERO)
    }

    #[test]
    fn test_stage_creation() {
        let stage = Stage::new("lint", Noop);

        assert_eq!(stage.name, "lint");
        assert_eq!(stage.when, WhenCondition::Always);
        assert!(!stage.fatal);
        assert!(stage.timeout.is_none());
    }

    #[test]
    fn test_stage_validation_empty_name() {
        let stage = Stage::new("", Noop);
        assert!(matches!(stage.validate(), Err(ValidationError::EmptyName)));
    }

    #[test]
    fn test_stage_validation_name_too_long() {
        let stage = Stage::new("a".repeat(101), Noop);
        assert!(matches!(
            stage.validate(),
            Err(ValidationError::NameTooLong { .. })
        ));
    }

    #[test]
    fn test_stage_validation_invalid_chars() {
        let stage = Stage::new("build image", Noop);
        assert!(matches!(
            stage.validate(),
            Err(ValidationError::InvalidNameChars { .. })
        ));
    }

    #[test]
    fn test_stage_validation_zero_timeout() {
        let stage = Stage::new("scan", Noop).with_timeout(Duration::ZERO);
        assert!(matches!(
            stage.validate(),
            Err(ValidationError::InvalidTimeout { .. })
        ));
    }

    #[test]
    fn test_stage_display() {
        let stage = Stage::new("build-image", Noop)
            .with_fatal(true)
            .with_when(WhenCondition::flag(ParameterFlag::BuildImage));

        assert_eq!(
            stage.to_string(),
            "Stage(build-image): fatal, when BUILD_IMAGE"
        );
    }

    #[test]
    fn test_stage_builder() {
        let stage = StageBuilder::new("deploy", Noop)
            .when(WhenCondition::flag(ParameterFlag::DeployLocally))
            .fatal()
            .mode(EnvironmentMode::Production)
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap();

        assert!(stage.fatal);
        assert_eq!(stage.mode, EnvironmentMode::Production);
        assert_eq!(stage.timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_flag_condition() {
        let cond = WhenCondition::flag(ParameterFlag::RunLinting);

        assert!(cond.evaluate(&params(&[]), &[]));
        assert!(!cond.evaluate(&params(&[("RUN_LINTING", "false")]), &[]));
    }

    #[test]
    fn test_stage_succeeded_condition() {
        let cond = WhenCondition::stage_succeeded("build-image");
        let p = params(&[]);

        assert!(!cond.evaluate(&p, &[]));
        assert!(cond.evaluate(&p, &[ok("build-image")]));
        assert!(!cond.evaluate(
            &p,
            &[StageResult::skipped("build-image", SkipReason::ConditionNotMet)]
        ));
    }

    #[test]
    fn test_all_of_requires_every_term() {
        let cond = WhenCondition::all_of(vec![
            WhenCondition::flag(ParameterFlag::DeployLocally),
            WhenCondition::stage_succeeded("build-image"),
        ]);
        let p = params(&[]);

        assert!(!cond.evaluate(&p, &[]));
        assert!(cond.evaluate(&p, &[ok("build-image")]));
        assert!(!cond.evaluate(&params(&[("DEPLOY_LOCALLY", "false")]), &[ok("build-image")]));
    }

    #[test]
    fn test_any_of() {
        let cond = WhenCondition::any_of(vec![
            WhenCondition::flag(ParameterFlag::RunLinting),
            WhenCondition::flag(ParameterFlag::RunTests),
        ]);

        assert!(cond.evaluate(&params(&[("RUN_LINTING", "false")]), &[]));
        assert!(!cond.evaluate(
            &params(&[("RUN_LINTING", "false"), ("RUN_TESTS", "false")]),
            &[]
        ));
    }

    #[test]
    fn test_condition_display() {
        let cond = WhenCondition::all_of(vec![
            WhenCondition::flag(ParameterFlag::PushToRegistry),
            WhenCondition::stage_succeeded("build-image"),
        ]);
        assert_eq!(cond.to_string(), "(PUSH_TO_REGISTRY and build-image succeeded)");
    }

    #[test]
    fn test_referenced_stages() {
        let cond = WhenCondition::all_of(vec![
            WhenCondition::flag(ParameterFlag::RunTests),
            WhenCondition::any_of(vec![WhenCondition::stage_succeeded("build-image")]),
        ]);
        assert_eq!(cond.referenced_stages(), vec!["build-image"]);
    }

    #[test]
    fn test_first_unmet_flag() {
        let cond = WhenCondition::all_of(vec![
            WhenCondition::flag(ParameterFlag::BuildImage),
            WhenCondition::flag(ParameterFlag::RunTests),
        ]);
        let p = params(&[("RUN_TESTS", "false")]);
        assert_eq!(cond.first_unmet_flag(&p), Some(ParameterFlag::RunTests));
        assert_eq!(cond.first_unmet_flag(&params(&[])), None);
    }

    #[test]
    fn test_when_condition_invalid_empty() {
        let cond = WhenCondition::stage_succeeded("");
        assert!(cond.validate().is_err());
    }
}
