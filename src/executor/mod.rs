//! Pipeline execution layer
//!
//! This module contains the command runner, the stage engine and the
//! outcome dispatcher.

mod dispatch;
mod engine;
mod process;
mod runner;
mod shell;
#[cfg(test)]
pub(crate) mod testing;
mod traits;

pub use dispatch::{
    DispatchReport, FAILURE_TAIL_LINES, OutcomeDispatcher, OutcomeHandler, StandardHandler,
};
pub use engine::{PipelineEngine, PlannedStage, StageScope};
pub use process::SystemLauncher;
pub use runner::{CommandOutput, CommandRunner, Invocation, InvocationMode, RunnerError};
pub use shell::{CommandTemplate, expand_variables};
pub use traits::{Deadline, HealthStatus, ProcessExit, ProcessLauncher, Watch};
