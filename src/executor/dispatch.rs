//! Outcome dispatch
//!
//! After a run is sealed, exactly one of the success or failure handlers
//! runs, followed by the `always` handler. Failures inside `always` are
//! logged and never change the run outcome.

use super::runner::{CommandRunner, RunnerError};
use crate::infrastructure::{ContainerCli, ContainerRuntime};
use crate::pipeline::pipeline_def::{DEPLOY, PUSH_TO_REGISTRY};
use crate::pipeline::{ParameterSet, PipelineRun, PostCondition};
use async_trait::async_trait;
use serde::Serialize;

/// Lines of failed-stage output included in the failure summary
pub const FAILURE_TAIL_LINES: usize = 20;

/// Hooks invoked for a sealed run
#[async_trait]
pub trait OutcomeHandler: Send + Sync {
    /// Run completed; returns a summary
    async fn on_success(&self, run: &PipelineRun, params: &ParameterSet) -> String;

    /// Run failed or was cancelled; returns a summary
    async fn on_failure(&self, run: &PipelineRun, params: &ParameterSet) -> String;

    /// Cleanup after every run; returns warnings
    async fn on_always(
        &self,
        run: &PipelineRun,
        params: &ParameterSet,
    ) -> Result<Vec<String>, RunnerError>;
}

/// What the dispatcher did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Handlers invoked, in order
    pub handlers: Vec<PostCondition>,
    /// Summary from the success or failure handler
    pub summary: String,
    /// Problems reported by cleanup
    pub cleanup_warnings: Vec<String>,
}

/// Routes a sealed run to its handlers
pub struct OutcomeDispatcher<H> {
    handler: H,
}

impl<H: OutcomeHandler> OutcomeDispatcher<H> {
    /// Dispatches to `handler`
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Invokes the handlers that apply to the run's outcome
    pub async fn dispatch(&self, run: &PipelineRun, params: &ParameterSet) -> DispatchReport {
        let mut report = DispatchReport::default();

        for condition in PostCondition::ORDER {
            if !condition.should_execute(run.outcome) {
                continue;
            }
            tracing::debug!(post = %condition, outcome = %run.outcome, "Running outcome handler");
            report.handlers.push(condition);

            match condition {
                PostCondition::Success => {
                    report.summary = self.handler.on_success(run, params).await;
                }
                PostCondition::Failure => {
                    report.summary = self.handler.on_failure(run, params).await;
                }
                PostCondition::Always => match self.handler.on_always(run, params).await {
                    Ok(warnings) => report.cleanup_warnings.extend(warnings),
                    Err(e) => {
                        tracing::warn!(error = %e, "Cleanup failed");
                        report.cleanup_warnings.push(e.to_string());
                    }
                },
            }
        }

        report
    }
}

/// Summaries, container cleanup and the verbose dump
pub struct StandardHandler {
    runner: CommandRunner,
    cli: ContainerCli,
    registry: String,
}

impl StandardHandler {
    /// Handler running cleanup through `runner`, detached from cancellation
    #[must_use]
    pub fn new(
        runner: &CommandRunner,
        runtime: ContainerRuntime,
        registry: impl Into<String>,
    ) -> Self {
        Self {
            runner: runner.detached(),
            cli: ContainerCli::new(runtime),
            registry: registry.into(),
        }
    }

    fn stage_table(run: &PipelineRun) -> String {
        run.stages
            .iter()
            .map(|r| {
                format!(
                    "{:<18} {:<9} {:>7}ms",
                    r.stage,
                    r.status().to_string(),
                    r.duration.as_millis()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl OutcomeHandler for StandardHandler {
    async fn on_success(&self, run: &PipelineRun, params: &ParameterSet) -> String {
        let ctx = &run.context;
        let mut lines = vec![format!(
            "Pipeline {} completed: {}",
            ctx.version_label,
            ctx.image_ref()
        )];

        if run.stage_succeeded(DEPLOY) {
            lines.push(format!("Application: http://localhost:{}", ctx.deploy_port));
        }
        if run.stage_succeeded(PUSH_TO_REGISTRY) {
            let repository = ctx.registry_repository(&self.registry, params.registry_username());
            lines.push(format!("Registry: {repository}:{}", ctx.image_tag));
        }
        for degraded in run.degraded_stages() {
            lines.push(format!("{}: {}", degraded.stage, degraded.status()));
        }

        let summary = lines.join("\n");
        tracing::info!("{summary}");
        summary
    }

    async fn on_failure(&self, run: &PipelineRun, _params: &ParameterSet) -> String {
        let mut summary = format!("Pipeline {} {}", run.context.version_label, run.outcome);

        if let Some(failed) = run.first_fatal() {
            summary.push_str(&format!(" at stage '{}'", failed.stage));
            if let Some(failure) = &failed.failure {
                summary.push_str(&format!(": {}", failure.message));
            }
            let tail = failed.output_tail(FAILURE_TAIL_LINES);
            if !tail.is_empty() {
                summary.push('\n');
                summary.push_str(&tail);
            }
        }

        tracing::error!("{summary}");
        summary
    }

    async fn on_always(
        &self,
        run: &PipelineRun,
        params: &ParameterSet,
    ) -> Result<Vec<String>, RunnerError> {
        let ctx = &run.context;
        let mut warnings = Vec::new();

        let cleanup = [
            self.cli.remove(&ctx.test_container_name),
            self.cli.prune_images(),
        ];
        // Each cleanup step is independent of the others.
        for invocation in cleanup {
            match self.runner.best_effort(invocation).await {
                Ok(out) => warnings.extend(out.warning),
                Err(e) => {
                    tracing::warn!(error = %e, "Cleanup command failed");
                    warnings.push(e.to_string());
                }
            }
        }

        if params.verbose() {
            tracing::info!("Stage summary:\n{}", Self::stage_table(run));
            let dump = [
                self.cli.list_images(&ctx.image_name),
                self.cli.list_containers(&ctx.image_name),
            ];
            for invocation in dump {
                match self.runner.best_effort(invocation).await {
                    Ok(out) => {
                        tracing::info!(command = %out.command, "\n{}", out.output.trim_end());
                        warnings.extend(out.warning);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Diagnostic command failed");
                        warnings.push(e.to_string());
                    }
                }
            }
        }

        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{Reply, ScriptedLauncher};
    use crate::pipeline::{
        BuildContext, FailureKind, RawParameters, RunOutcome, SkipReason, StageFailure,
        StageResult,
    };
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn params(pairs: &[(&str, &str)]) -> ParameterSet {
        let raw = pairs
            .iter()
            .fold(RawParameters::new(), |raw, (k, v)| raw.set(*k, *v));
        ParameterSet::from_raw(&raw).unwrap()
    }

    fn run(params: &ParameterSet, outcome: RunOutcome, stages: Vec<StageResult>) -> PipelineRun {
        PipelineRun {
            run_id: Uuid::new_v4(),
            context: BuildContext::derive_at(
                params,
                42,
                Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            ),
            outcome,
            stages,
            duration: Duration::from_secs(1),
        }
    }

    fn ok(stage: &str) -> StageResult {
        StageResult::succeeded(stage, String::new(), Vec::new(), Duration::ZERO)
    }

    fn dispatcher(launcher: &Arc<ScriptedLauncher>) -> OutcomeDispatcher<StandardHandler> {
        let runner = CommandRunner::new(Arc::clone(launcher) as _);
        OutcomeDispatcher::new(StandardHandler::new(
            &runner,
            ContainerRuntime::Docker,
            "docker.io",
        ))
    }

    #[tokio::test]
    async fn test_success_summary_mentions_deployment_only() {
        let launcher = ScriptedLauncher::new();
        let p = params(&[]);
        let run = run(
            &p,
            RunOutcome::Completed,
            vec![
                ok("build-image"),
                ok(DEPLOY),
                StageResult::skipped(PUSH_TO_REGISTRY, SkipReason::ConditionNotMet),
            ],
        );

        let report = dispatcher(&launcher).dispatch(&run, &p).await;

        assert_eq!(report.handlers, vec![PostCondition::Success, PostCondition::Always]);
        assert!(report.summary.contains("http://localhost:3000"));
        assert!(!report.summary.contains("Registry"));
    }

    #[tokio::test]
    async fn test_success_summary_mentions_registry_after_push() {
        let launcher = ScriptedLauncher::new();
        let p = params(&[
            ("PUSH_TO_REGISTRY", "true"),
            ("REGISTRY_USERNAME", "acme"),
            ("DEPLOY_LOCALLY", "false"),
        ]);
        let run = run(&p, RunOutcome::Completed, vec![ok("build-image"), ok(PUSH_TO_REGISTRY)]);

        let report = dispatcher(&launcher).dispatch(&run, &p).await;

        assert!(report.summary.contains("Registry: docker.io/acme/webapp:42"));
        assert!(!report.summary.contains("localhost"));
    }

    #[tokio::test]
    async fn test_failure_summary_names_fatal_stage() {
        let launcher = ScriptedLauncher::new();
        let p = params(&[]);
        let output: String = (1..=30).map(|i| format!("line {i}\n")).collect();
        let failed = StageResult::failed(
            "build-image",
            StageFailure {
                kind: FailureKind::Fatal,
                timed_out: false,
                message: "'docker build' exited with code 1".to_string(),
            },
            output,
            Duration::ZERO,
        );
        let run = run(&p, RunOutcome::Failed, vec![ok("checkout"), failed]);

        let report = dispatcher(&launcher).dispatch(&run, &p).await;

        assert_eq!(report.handlers, vec![PostCondition::Failure, PostCondition::Always]);
        assert!(report.summary.contains("at stage 'build-image'"));
        assert!(report.summary.contains("line 30"));
        assert!(report.summary.contains("line 11"));
        assert!(!report.summary.contains("line 10\n"));
    }

    #[tokio::test]
    async fn test_cancelled_run_takes_failure_path() {
        let launcher = ScriptedLauncher::new();
        let p = params(&[]);
        let run = run(&p, RunOutcome::Cancelled, vec![]);

        let report = dispatcher(&launcher).dispatch(&run, &p).await;
        assert_eq!(report.handlers, vec![PostCondition::Failure, PostCondition::Always]);
        assert!(report.summary.contains("CANCELLED"));
    }

    #[tokio::test]
    async fn test_always_cleans_up_even_after_cancellation() {
        let launcher = ScriptedLauncher::new();
        let token = CancellationToken::new();
        token.cancel();
        let runner = CommandRunner::new(Arc::clone(&launcher) as _).with_cancellation(token);
        let dispatcher = OutcomeDispatcher::new(StandardHandler::new(
            &runner,
            ContainerRuntime::Docker,
            "docker.io",
        ));
        let p = params(&[]);

        dispatcher
            .dispatch(&run(&p, RunOutcome::Cancelled, vec![]), &p)
            .await;

        assert!(launcher.ran("docker rm -f webapp-test-42"));
        assert!(launcher.ran("docker image prune -f"));
    }

    #[tokio::test]
    async fn test_cleanup_failures_are_swallowed() {
        let launcher = ScriptedLauncher::new()
            .on("docker rm", Reply::exit(1, "No such container"))
            .on("docker image prune", Reply::SpawnFailure);
        let p = params(&[]);
        let run = run(&p, RunOutcome::Completed, vec![ok("checkout")]);

        let report = dispatcher(&launcher).dispatch(&run, &p).await;

        assert_eq!(run.outcome, RunOutcome::Completed);
        assert_eq!(report.cleanup_warnings.len(), 2);
        assert!(report.cleanup_warnings[1].contains("Failed to start"));
    }

    #[tokio::test]
    async fn test_verbose_dump() {
        let launcher = ScriptedLauncher::new();
        let p = params(&[("VERBOSE", "true")]);
        let run = run(&p, RunOutcome::Completed, vec![ok("checkout")]);

        dispatcher(&launcher).dispatch(&run, &p).await;

        assert!(launcher.ran("docker images webapp"));
        assert!(launcher.ran("docker ps -a --filter 'name=webapp'"));
    }

    #[tokio::test]
    async fn test_verbose_dump_failure_keeps_cleanup_warnings() {
        let launcher = ScriptedLauncher::new()
            .on("docker rm", Reply::exit(1, "No such container"))
            .on("docker images", Reply::SpawnFailure)
            .on("docker ps", Reply::exit(1, "daemon unreachable"));
        let p = params(&[("VERBOSE", "true")]);
        let run = run(&p, RunOutcome::Completed, vec![ok("checkout")]);

        let report = dispatcher(&launcher).dispatch(&run, &p).await;

        assert_eq!(report.cleanup_warnings.len(), 3);
        assert!(report.cleanup_warnings[0].contains("docker rm -f webapp-test-42"));
        assert!(report.cleanup_warnings[1].contains("Failed to start"));
        assert!(report.cleanup_warnings[2].contains("docker ps"));
    }

    #[test]
    fn test_stage_table() {
        let p = params(&[]);
        let run = run(&p, RunOutcome::Completed, vec![ok("checkout")]);
        assert!(StandardHandler::stage_table(&run).starts_with("checkout"));
    }
}
