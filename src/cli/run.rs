//! `shipline run`

use super::{EXIT_CANCELLED, EXIT_FAILED};
use anyhow::{Context, Result};
use serde::Serialize;
use shipline::executor::{
    CommandRunner, DispatchReport, OutcomeDispatcher, PipelineEngine, StandardHandler,
};
use shipline::infrastructure::{Config, RunCounter, effective_level, init_logging};
use shipline::pipeline::{
    BuildContext, ParameterSet, Pipeline, PipelineRun, RawParameters, RunOutcome, Validate,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

/// Options for a run
#[derive(Debug)]
pub struct RunOptions {
    /// Parameters as given on the command line
    pub params: RawParameters,
    /// Explicit run number
    pub build_number: Option<u64>,
    /// Print JSON instead of the summary
    pub json: bool,
    /// Configuration file
    pub config: Option<PathBuf>,
}

#[derive(Serialize)]
struct RunReport<'a> {
    run: &'a PipelineRun,
    post: &'a DispatchReport,
}

/// Validates the parameters, runs the standard pipeline and dispatches its outcome
pub fn execute(options: &RunOptions) -> Result<ExitCode> {
    let config = Config::discover(options.config.as_deref()).context("Invalid configuration")?;
    let params = ParameterSet::from_raw(&options.params).context("Invalid parameters")?;
    init_logging(effective_level(&config.log_level, params.verbose()));

    let pipeline = Pipeline::standard();
    pipeline.validate()?;

    let run_number = match options.build_number {
        Some(number) => number,
        None => RunCounter::new(&config.state_dir).next()?,
    };
    let context = BuildContext::derive(&params, run_number);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let (run, report) = runtime.block_on(run_pipeline(pipeline, config, &params, context));

    if options.json {
        let json = serde_json::to_string_pretty(&RunReport {
            run: &run,
            post: &report,
        })?;
        println!("{json}");
    } else {
        print_summary(&run, &report);
    }

    Ok(exit_code(run.outcome))
}

async fn run_pipeline(
    pipeline: Pipeline,
    config: Config,
    params: &ParameterSet,
    context: BuildContext,
) -> (PipelineRun, DispatchReport) {
    let token = CancellationToken::new();
    let interrupt = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling run");
                token.cancel();
            }
        })
    };

    let runtime = config.container_runtime;
    let registry = config.registry.clone();
    let runner = CommandRunner::system().with_cancellation(token);
    let engine = PipelineEngine::new(pipeline, runner).with_config(config);

    let run = engine.run(params, context).await;
    let dispatcher =
        OutcomeDispatcher::new(StandardHandler::new(engine.runner(), runtime, registry));
    let report = dispatcher.dispatch(&run, params).await;

    interrupt.abort();
    (run, report)
}

fn print_summary(run: &PipelineRun, report: &DispatchReport) {
    println!("{}", report.summary);
    for warning in &report.cleanup_warnings {
        eprintln!("warning: {warning}");
    }
    println!("Result: {} in {:.1}s", run.outcome, run.duration.as_secs_f64());
}

fn exit_code(outcome: RunOutcome) -> ExitCode {
    match outcome {
        RunOutcome::Completed => ExitCode::SUCCESS,
        RunOutcome::Failed => ExitCode::from(EXIT_FAILED),
        RunOutcome::Cancelled => ExitCode::from(EXIT_CANCELLED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(RunOutcome::Completed), ExitCode::SUCCESS);
        assert_eq!(exit_code(RunOutcome::Failed), ExitCode::from(1));
        assert_eq!(exit_code(RunOutcome::Cancelled), ExitCode::from(130));
    }

    #[test]
    fn test_invalid_parameters_fail_before_any_run() {
        let state = TempDir::new().unwrap();
        let config_path = state.path().join("shipline.yaml");
        std::fs::write(
            &config_path,
            format!("state_dir: {}\n", state.path().join("state").display()),
        )
        .unwrap();

        let options = RunOptions {
            params: RawParameters::new().set("DEPLOY_PORT", "9999"),
            build_number: None,
            json: false,
            config: Some(config_path),
        };

        let err = execute(&options).unwrap_err();
        assert!(
            err.downcast_ref::<shipline::pipeline::ValidationError>()
                .is_some()
        );
        // The counter is untouched when validation fails.
        assert!(!state.path().join("state").exists());
    }
}
