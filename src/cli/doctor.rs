//! `shipline doctor`

use super::EXIT_FAILED;
use anyhow::{Context, Result};
use shipline::executor::{HealthStatus, SystemLauncher};
use shipline::infrastructure::Config;
use std::path::Path;
use std::process::ExitCode;

/// Programs the configured pipeline invokes, deduplicated, in first-use order
fn required_programs(config: &Config) -> Result<Vec<String>> {
    let mut programs = vec![
        "git".to_string(),
        config.container_runtime.program().to_string(),
    ];
    for slot in ["install", "lint", "test", "scan"] {
        let program = config.commands.template(slot)?.program().to_string();
        if !programs.contains(&program) {
            programs.push(program);
        }
    }
    Ok(programs)
}

/// Probes every required program and reports which are missing
pub fn execute(config: Option<&Path>) -> Result<ExitCode> {
    let config = Config::discover(config).context("Invalid configuration")?;
    let programs = required_programs(&config)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let launcher = SystemLauncher::new();
    let statuses: Vec<(String, HealthStatus)> = runtime.block_on(async {
        let mut statuses = Vec::with_capacity(programs.len());
        for program in programs {
            let status = launcher.probe(&program).await;
            statuses.push((program, status));
        }
        statuses
    });

    let mut healthy = true;
    for (program, status) in &statuses {
        healthy &= status.is_operational();
        println!("{program:<10} {status}");
    }

    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILED)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipline::infrastructure::ContainerRuntime;

    #[test]
    fn test_required_programs_default() {
        let programs = required_programs(&Config::default()).unwrap();
        assert_eq!(programs, ["git", "docker", "npm", "trivy"]);
    }

    #[test]
    fn test_required_programs_follow_config() {
        let mut config = Config::default();
        config.container_runtime = ContainerRuntime::Podman;
        config.commands.lint = "pnpm lint".to_string();

        let programs = required_programs(&config).unwrap();
        assert_eq!(programs, ["git", "podman", "npm", "pnpm", "trivy"]);
    }
}
