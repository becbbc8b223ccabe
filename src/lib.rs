//! # Shipline - parameterized build, test and deploy orchestration
//!
//! Shipline takes a containerized web application from a git repository to a
//! running container. A run is a fixed sequence of stages (clean, checkout,
//! lint, test, image build, image test, security scan, push, deploy), each
//! gated by a condition over the run parameters and the results of earlier
//! stages.
//!
//! ## Quick Start
//!
//! ```no_run
//! use shipline::prelude::*;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let params = ParameterSet::from_raw(&RawParameters::new().set("BRANCH", "develop"))?;
//! let context = BuildContext::derive(&params, 42);
//!
//! let engine = PipelineEngine::new(Pipeline::standard(), CommandRunner::system());
//! let run = engine.run(&params, context).await;
//! println!("{}", run.outcome);
//! # Ok(())
//! # }
//! ```
//!
//! ## Layout
//!
//! - [`pipeline`]: parameters, build context, stages, conditions and results
//! - [`executor`]: process launching, the stage engine and outcome dispatch
//! - [`infrastructure`]: configuration, logging, credentials, the run
//!   counter and the git and container command builders

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod executor;
pub mod infrastructure;
pub mod pipeline;

// Prelude module for common imports
pub mod prelude;

// Re-export commonly used types
pub use executor::{
    CommandRunner, HealthStatus, OutcomeDispatcher, PipelineEngine, StandardHandler,
    SystemLauncher, expand_variables,
};
pub use infrastructure::{Config, ContainerRuntime, RunCounter};
pub use pipeline::{
    BuildContext, ParameterSet, Pipeline, PipelineBuilder, PipelineRun, PostCondition,
    RawParameters, RunOutcome, Stage, StageBuilder, StageResult, Validate, WhenCondition,
};

/// Version of the shipline crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
