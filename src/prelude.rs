//! Prelude module for common imports

// Re-export all pipeline types with full paths
pub use crate::pipeline::context::{BuildContext, EnvironmentMode};
pub use crate::pipeline::errors::{PipelineError, StageError, ValidationError};
pub use crate::pipeline::parameters::{Branch, ParameterFlag, ParameterSet, RawParameters};
pub use crate::pipeline::pipeline_def::{Pipeline, PipelineBuilder};
pub use crate::pipeline::post::PostCondition;
pub use crate::pipeline::stage::{Stage, StageBuilder, WhenCondition};
pub use crate::pipeline::steps::{StageAction, StageOutput};
pub use crate::pipeline::types::{
    FailureKind, PipelineRun, RunOutcome, SkipReason, StageResult, StageStatus, Validate,
};

// Re-export executor types
pub use crate::executor::{
    CommandRunner, Invocation, OutcomeDispatcher, OutcomeHandler, PipelineEngine, StageScope,
    StandardHandler,
};

// Re-export infrastructure types
pub use crate::infrastructure::{Config, ContainerRuntime, CredentialProvider, RunCounter};
