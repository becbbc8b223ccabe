//! `shipline plan`

use anyhow::{Context, Result};
use serde::Serialize;
use shipline::executor::{CommandRunner, PipelineEngine, PlannedStage};
use shipline::infrastructure::{Config, RunCounter};
use shipline::pipeline::{BuildContext, ParameterSet, Pipeline, RawParameters, Validate};
use std::fmt::Write;
use std::path::Path;
use std::process::ExitCode;

#[derive(Serialize)]
struct Plan {
    context: BuildContext,
    stages: Vec<PlannedStage>,
}

/// Prints the stages that would run for `raw`, without running any of them
pub fn execute(raw: &RawParameters, config: Option<&Path>, json: bool) -> Result<ExitCode> {
    let config = Config::discover(config).context("Invalid configuration")?;
    let params = ParameterSet::from_raw(raw).context("Invalid parameters")?;

    let pipeline = Pipeline::standard();
    pipeline.validate()?;

    // Peek at the counter; planning never advances it.
    let next_run = RunCounter::new(&config.state_dir).current()? + 1;
    let context = BuildContext::derive(&params, next_run);

    let engine = PipelineEngine::new(pipeline, CommandRunner::system()).with_config(config);
    let plan = Plan {
        context,
        stages: engine.plan(&params),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print!("{}", render(&plan));
    }
    Ok(ExitCode::SUCCESS)
}

fn render(plan: &Plan) -> String {
    let mut out = format!(
        "{} would build {} on {}\n\n",
        plan.context.version_label,
        plan.context.image_ref(),
        plan.context.branch
    );

    for stage in &plan.stages {
        let mark = if stage.enabled { "x" } else { " " };
        let severity = if stage.fatal { "fatal" } else { "soft" };
        let _ = writeln!(out, "[{mark}] {:<18} {severity:<6} {}", stage.name, stage.action);
        if let Some(reason) = &stage.reason {
            let _ = writeln!(out, "    skipped: {reason}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn plan_for(raw: &RawParameters) -> Plan {
        let params = ParameterSet::from_raw(raw).unwrap();
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let engine = PipelineEngine::new(Pipeline::standard(), CommandRunner::system());
        Plan {
            context: BuildContext::derive_at(&params, 7, at),
            stages: engine.plan(&params),
        }
    }

    #[test]
    fn test_render_marks_disabled_stages() {
        let plan = plan_for(&RawParameters::new().set("DEPLOY_LOCALLY", "false"));
        let text = render(&plan);

        assert!(text.starts_with("main-7 would build webapp:7 on main"));
        assert!(text.contains("[x] checkout"));
        assert!(text.contains("[ ] deploy"));
        assert!(text.contains("skipped: DEPLOY_LOCALLY is false"));
    }

    #[test]
    fn test_plan_serializes_stages_in_order() {
        let plan = plan_for(&RawParameters::new());
        let value = serde_json::to_value(&plan).unwrap();

        let names: Vec<&str> = value["stages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["name"].as_str().unwrap())
            .collect();
        assert_eq!(names.first(), Some(&"clean-workspace"));
        assert_eq!(names.last(), Some(&"deploy"));
        assert_eq!(value["context"]["run_number"], 7);
    }
}
