//! Pipeline domain types and logic

pub mod context;
pub mod errors;
pub mod parameters;
pub mod pipeline_def;
pub mod post;
pub mod stage;
pub mod steps;
pub mod types;

pub use context::{BuildContext, EnvironmentMode, TIMESTAMP_FORMAT};
pub use errors::{ErrorClass, PipelineError, StageError, ValidationError};
pub use parameters::{
    Branch, PARAMETER_DEFINITIONS, ParameterDefinition, ParameterFlag, ParameterSet, RawParameters,
};
pub use pipeline_def::{Pipeline, PipelineBuilder};
pub use post::PostCondition;
pub use stage::{Stage, StageBuilder, WhenCondition};
pub use steps::{StageAction, StageOutput};
pub use types::{
    FailureKind, PipelineRun, RunOutcome, SkipReason, StageFailure, StageResult, StageStatus,
    Validate,
};
