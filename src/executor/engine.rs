//! Pipeline engine
//!
//! Runs the stages of a [`Pipeline`] in order. For each stage the engine
//! checks for cancellation, evaluates the stage condition against the
//! parameters and the results so far, runs the body through a runner scoped
//! to the stage, and applies the failure policy. A fatal failure, an
//! infrastructure failure or a cancellation seals the run; every stage
//! after that is recorded as skipped.

use super::runner::CommandRunner;
use super::shell::CommandTemplate;
use crate::infrastructure::{
    Config, ContainerCli, CredentialProvider, EnvCredentialProvider, GitCli,
};
use crate::pipeline::{
    BuildContext, FailureKind, ParameterSet, Pipeline, PipelineRun, RunOutcome, SkipReason, Stage,
    StageError, StageFailure, StageResult,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// Everything a stage body may use
pub struct StageScope<'a> {
    /// Name of the running stage
    pub stage: &'a str,
    /// Run parameters
    pub params: &'a ParameterSet,
    /// Build metadata
    pub context: &'a BuildContext,
    /// Tool configuration
    pub config: &'a Config,
    /// Runner carrying the stage environment and deadline
    pub runner: CommandRunner,
    /// Registry credential source
    pub credentials: &'a dyn CredentialProvider,
}

impl StageScope<'_> {
    /// Checkout directory
    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.config.workspace
    }

    /// Container engine command builder
    #[must_use]
    pub fn container(&self) -> ContainerCli {
        ContainerCli::new(self.config.container_runtime)
    }

    /// Git command builder for the workspace
    #[must_use]
    pub fn git(&self) -> GitCli {
        GitCli::new(self.workspace())
    }

    /// Configured command for `slot`
    ///
    /// # Errors
    ///
    /// Returns a body-level failure if the command is not usable.
    pub fn template(&self, slot: &str) -> Result<CommandTemplate, StageError> {
        self.config
            .commands
            .template(slot)
            .map_err(|e| StageError::failed(e.to_string(), String::new()))
    }
}

/// A stage as it would run for a set of parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStage {
    /// Stage name
    pub name: String,
    /// Whether the stage would execute
    pub enabled: bool,
    /// Whether a failure would seal the run
    pub fatal: bool,
    /// Stage condition
    pub condition: String,
    /// What the body does
    pub action: String,
    /// Why a disabled stage would not run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Sequential stage executor
pub struct PipelineEngine {
    pipeline: Pipeline,
    runner: CommandRunner,
    config: Config,
    credentials: Arc<dyn CredentialProvider>,
}

impl PipelineEngine {
    /// Creates an engine with default configuration and environment credentials
    #[must_use]
    pub fn new(pipeline: Pipeline, runner: CommandRunner) -> Self {
        Self {
            pipeline,
            runner,
            config: Config::default(),
            credentials: Arc::new(EnvCredentialProvider::new()),
        }
        .reserve_credential_variables()
    }

    /// Sets the configuration
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.runner = self.runner.with_extra_env(&config.environment);
        self.config = config;
        self
    }

    /// Sets the credential source
    #[must_use]
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self.reserve_credential_variables()
    }

    // Only the push stage may see the password, and only through stdin.
    fn reserve_credential_variables(mut self) -> Self {
        self.runner = self
            .runner
            .without_env(self.credentials.reserved_variables());
        self
    }

    /// The pipeline being run
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The unscoped runner
    #[must_use]
    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    /// The configuration
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Evaluates conditions assuming every enabled stage succeeds
    #[must_use]
    pub fn plan(&self, params: &ParameterSet) -> Vec<PlannedStage> {
        let mut simulated: Vec<StageResult> = Vec::with_capacity(self.pipeline.stage_count());
        let mut planned = Vec::with_capacity(self.pipeline.stage_count());

        for stage in self.pipeline.stages() {
            let enabled = stage.when.evaluate(params, &simulated);
            let reason = (!enabled).then(|| match stage.when.first_unmet_flag(params) {
                Some(flag) => format!("{flag} is false"),
                None => format!("condition {} not met", stage.when),
            });

            simulated.push(if enabled {
                StageResult::succeeded(&stage.name, String::new(), Vec::new(), Default::default())
            } else {
                StageResult::skipped(&stage.name, SkipReason::ConditionNotMet)
            });

            planned.push(PlannedStage {
                name: stage.name.clone(),
                enabled,
                fatal: stage.fatal,
                condition: stage.when.to_string(),
                action: stage.action().describe(),
                reason,
            });
        }

        planned
    }

    /// Runs every stage and seals the run
    pub async fn run(&self, params: &ParameterSet, context: BuildContext) -> PipelineRun {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", %run_id, version = %context.version_label);
        self.execute(params, context, run_id).instrument(span).await
    }

    async fn execute(
        &self,
        params: &ParameterSet,
        context: BuildContext,
        run_id: Uuid,
    ) -> PipelineRun {
        let start = Instant::now();
        tracing::info!(
            pipeline = %self.pipeline,
            run_number = context.run_number,
            image = %context.image_ref(),
            "Starting pipeline run"
        );

        let mut outcome = RunOutcome::Completed;
        let mut results: Vec<StageResult> = Vec::with_capacity(self.pipeline.stage_count());

        for stage in self.pipeline.stages() {
            if outcome == RunOutcome::Completed && self.runner.cancellation().is_cancelled() {
                tracing::warn!(stage = %stage.name, "Run cancelled before stage");
                outcome = RunOutcome::Cancelled;
            }

            if outcome != RunOutcome::Completed {
                results.push(StageResult::skipped(&stage.name, SkipReason::RunSealed));
                continue;
            }

            if !stage.when.evaluate(params, &results) {
                tracing::info!(stage = %stage.name, when = %stage.when, "Stage skipped");
                results.push(StageResult::skipped(&stage.name, SkipReason::ConditionNotMet));
                continue;
            }

            let result = self.execute_stage(stage, params, &context).await;
            if let Some(sealed) = result.failure.as_ref().and_then(StageFailure::seals_run) {
                outcome = sealed;
            }
            results.push(result);
        }

        let duration = start.elapsed();
        match outcome {
            RunOutcome::Completed => tracing::info!(
                outcome = %outcome,
                duration_ms = duration.as_millis(),
                "Pipeline run finished"
            ),
            RunOutcome::Failed | RunOutcome::Cancelled => tracing::error!(
                outcome = %outcome,
                duration_ms = duration.as_millis(),
                "Pipeline run finished"
            ),
        }

        PipelineRun {
            run_id,
            context,
            outcome,
            stages: results,
            duration,
        }
    }

    async fn execute_stage(
        &self,
        stage: &Stage,
        params: &ParameterSet,
        context: &BuildContext,
    ) -> StageResult {
        let timeout = stage.timeout.or_else(|| self.config.stage_timeout());
        let scope = StageScope {
            stage: &stage.name,
            params,
            context,
            config: &self.config,
            runner: self.runner.scoped(context.environment(stage.mode), timeout),
            credentials: self.credentials.as_ref(),
        };

        tracing::info!(stage = %stage.name, action = %stage.action().describe(), "Executing stage");
        let start = Instant::now();
        let body = stage.action().run(&scope).await;
        let duration = start.elapsed();

        let result = match body {
            Ok(out) => StageResult::succeeded(&stage.name, out.output, out.warnings, duration),
            Err(err) => {
                let failure = StageFailure::classify(&err, stage.fatal);
                match failure.kind {
                    FailureKind::Soft => {
                        tracing::warn!(
                            stage = %stage.name,
                            error = %err,
                            "Stage failed, continuing"
                        );
                    }
                    FailureKind::Fatal | FailureKind::Infrastructure => {
                        tracing::error!(
                            stage = %stage.name,
                            error = %err,
                            "Stage failed, stopping pipeline"
                        );
                    }
                    FailureKind::Cancelled => {
                        tracing::warn!(stage = %stage.name, "Stage cancelled");
                    }
                }
                StageResult::failed(&stage.name, failure, err.output().to_string(), duration)
            }
        };

        tracing::info!(
            stage = %stage.name,
            result = %result.status(),
            duration_ms = duration.as_millis(),
            "Stage completed"
        );
        result
    }
}
