//! Stage bodies
//!
//! Each standard stage is a [`StageAction`]. Actions shell out through the
//! scoped runner they are handed and report captured output and
//! best-effort warnings in a [`StageOutput`].

use super::errors::StageError;
use crate::executor::{CommandOutput, StageScope};
use async_trait::async_trait;
use std::path::Path;

/// Output of a completed stage body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutput {
    /// Combined output of every command, in order
    pub output: String,
    /// Warnings from best-effort commands
    pub warnings: Vec<String>,
}

impl StageOutput {
    /// Appends a command's output and warning
    pub fn record(&mut self, command: CommandOutput) {
        self.output.push_str(&command.output);
        if let Some(warning) = command.warning {
            self.warnings.push(warning);
        }
    }

    /// Appends a line of our own
    pub fn line(&mut self, text: impl AsRef<str>) {
        if !self.output.is_empty() && !self.output.ends_with('\n') {
            self.output.push('\n');
        }
        self.output.push_str(text.as_ref());
        self.output.push('\n');
    }
}

/// Body of a stage
#[async_trait]
pub trait StageAction: Send + Sync {
    /// Short description for plans and logs
    fn describe(&self) -> String;

    /// Runs the body
    async fn run(&self, scope: &StageScope<'_>) -> Result<StageOutput, StageError>;
}

async fn install_dependencies(
    scope: &StageScope<'_>,
    out: &mut StageOutput,
) -> Result<(), StageError> {
    if scope.workspace().join("node_modules").exists() {
        tracing::debug!(stage = scope.stage, "Dependencies present, skipping install");
        return Ok(());
    }
    let install = scope.template("install")?;
    out.record(scope.runner.checked(install.invocation().cwd(scope.workspace())).await?);
    Ok(())
}

/// Removes the workspace
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanWorkspace;

#[async_trait]
impl StageAction for CleanWorkspace {
    fn describe(&self) -> String {
        "remove the workspace".to_string()
    }

    async fn run(&self, scope: &StageScope<'_>) -> Result<StageOutput, StageError> {
        let workspace = scope.workspace();
        let mut out = StageOutput::default();

        match tokio::fs::remove_dir_all(workspace).await {
            Ok(()) => out.line(format!("Removed {}", workspace.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                out.line(format!("{} does not exist", workspace.display()));
            }
            Err(e) => {
                return Err(StageError::failed(
                    format!("Cannot remove {}: {e}", workspace.display()),
                    out.output,
                ));
            }
        }
        Ok(out)
    }
}

/// Clones or updates the repository and records the commit
#[derive(Debug, Clone, Copy, Default)]
pub struct Checkout;

#[async_trait]
impl StageAction for Checkout {
    fn describe(&self) -> String {
        "git clone or fetch the branch".to_string()
    }

    async fn run(&self, scope: &StageScope<'_>) -> Result<StageOutput, StageError> {
        let git = scope.git();
        let branch = scope.params.branch().as_str();
        let mut out = StageOutput::default();

        if git.is_clone() {
            out.record(scope.runner.checked(git.fetch(branch)).await?);
            out.record(scope.runner.checked(git.checkout(branch)).await?);
        } else {
            if let Some(parent) = git.workdir().parent().filter(|p| !p.as_os_str().is_empty()) {
                create_dir(parent, &out).await?;
            }
            out.record(
                scope
                    .runner
                    .checked(git.clone_branch(scope.params.repo_url(), branch))
                    .await?,
            );
        }

        let head = scope.runner.checked(git.head_commit()).await?;
        let commit = head.output.trim().to_string();
        if commit.is_empty() {
            return Err(StageError::failed("Checkout produced no commit", out.output));
        }
        out.line(format!("Checked out {branch} at {commit}"));
        Ok(out)
    }
}

async fn create_dir(dir: &Path, out: &StageOutput) -> Result<(), StageError> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        StageError::failed(
            format!("Cannot create {}: {e}", dir.display()),
            out.output.clone(),
        )
    })
}

/// Installs dependencies and runs the linter, best-effort
#[derive(Debug, Clone, Copy, Default)]
pub struct Lint;

#[async_trait]
impl StageAction for Lint {
    fn describe(&self) -> String {
        "install dependencies, run the linter".to_string()
    }

    async fn run(&self, scope: &StageScope<'_>) -> Result<StageOutput, StageError> {
        let mut out = StageOutput::default();
        install_dependencies(scope, &mut out).await?;

        let lint = scope.template("lint")?;
        out.record(scope.runner.best_effort(lint.invocation().cwd(scope.workspace())).await?);
        Ok(out)
    }
}

/// Installs dependencies and runs unit tests and coverage, best-effort
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitTest;

#[async_trait]
impl StageAction for UnitTest {
    fn describe(&self) -> String {
        "install dependencies, run unit tests and coverage".to_string()
    }

    async fn run(&self, scope: &StageScope<'_>) -> Result<StageOutput, StageError> {
        let mut out = StageOutput::default();
        install_dependencies(scope, &mut out).await?;

        let test = scope.template("test")?;
        out.record(scope.runner.best_effort(test.invocation().cwd(scope.workspace())).await?);

        if scope.config.commands.coverage.is_some() {
            let coverage = scope.template("coverage")?;
            out.record(
                scope
                    .runner
                    .best_effort(coverage.invocation().cwd(scope.workspace()))
                    .await?,
            );
        }
        Ok(out)
    }
}

/// Builds the run image with all of its tags
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildImage;

#[async_trait]
impl StageAction for BuildImage {
    fn describe(&self) -> String {
        "build the image, tag run/branch/latest".to_string()
    }

    async fn run(&self, scope: &StageScope<'_>) -> Result<StageOutput, StageError> {
        let mut out = StageOutput::default();
        let build = scope
            .container()
            .build(scope.context, &scope.config.dockerfile)
            .cwd(scope.workspace());

        out.record(scope.runner.checked(build).await?);
        out.line(format!("Built {}", scope.context.image_ref()));
        Ok(out)
    }
}

/// Runs the test command inside a transient container of the run image
#[derive(Debug, Clone, Copy, Default)]
pub struct TestImage;

#[async_trait]
impl StageAction for TestImage {
    fn describe(&self) -> String {
        "run tests inside the built image".to_string()
    }

    async fn run(&self, scope: &StageScope<'_>) -> Result<StageOutput, StageError> {
        let cli = scope.container();
        let ctx = scope.context;
        let command = scope.template("image_test")?;
        let mut out = StageOutput::default();

        let words =
            std::iter::once(command.program().to_string()).chain(command.args().iter().cloned());
        let tested = scope.runner.checked(cli.run_test(ctx, words)).await;

        // The container is removed even when the run was cancelled.
        match scope
            .runner
            .detached()
            .best_effort(cli.remove(&ctx.test_container_name))
            .await
        {
            Ok(removed) => {
                if let Some(warning) = removed.warning {
                    tracing::debug!(stage = scope.stage, %warning, "Test container already gone");
                }
            }
            Err(e) => {
                tracing::warn!(stage = scope.stage, error = %e, "Test container cleanup failed");
            }
        }

        out.record(tested?);
        Ok(out)
    }
}

/// Scans the run image for vulnerabilities
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityScan;

#[async_trait]
impl StageAction for SecurityScan {
    fn describe(&self) -> String {
        "scan the image for HIGH/CRITICAL vulnerabilities".to_string()
    }

    async fn run(&self, scope: &StageScope<'_>) -> Result<StageOutput, StageError> {
        let mut out = StageOutput::default();
        let scan = scope.template("scan")?;
        out.record(scope.runner.checked(scan.invocation().cwd(scope.workspace())).await?);
        Ok(out)
    }
}

/// Logs in, pushes the run tag and `latest`, logs out
#[derive(Debug, Clone, Copy, Default)]
pub struct PushToRegistry;

impl PushToRegistry {
    async fn push_tags(
        scope: &StageScope<'_>,
        repository: &str,
        out: &mut StageOutput,
    ) -> Result<(), StageError> {
        let cli = scope.container();
        let ctx = scope.context;

        for tag in [ctx.image_tag.as_str(), "latest"] {
            let target = format!("{repository}:{tag}");
            out.record(scope.runner.checked(cli.tag(&ctx.image_ref(), &target)).await?);
            out.record(scope.runner.checked(cli.push(&target)).await?);
            out.line(format!("Pushed {target}"));
        }
        Ok(())
    }
}

#[async_trait]
impl StageAction for PushToRegistry {
    fn describe(&self) -> String {
        "log in, push run tag and latest".to_string()
    }

    async fn run(&self, scope: &StageScope<'_>) -> Result<StageOutput, StageError> {
        let registry = scope.config.registry.as_str();
        let username = scope.params.registry_username();
        let cli = scope.container();
        let mut out = StageOutput::default();

        let credentials = scope.credentials.acquire(registry, username).await?;
        out.record(
            scope
                .runner
                .checked(cli.login(registry, &credentials.username, credentials.password.clone()))
                .await?,
        );
        drop(credentials);

        let repository = scope.context.registry_repository(registry, username);
        let pushed = Self::push_tags(scope, &repository, &mut out).await;

        match scope.runner.detached().best_effort(cli.logout(registry)).await {
            Ok(logout) => out.record(logout),
            Err(e) => tracing::warn!(stage = scope.stage, error = %e, "Registry logout failed"),
        }

        pushed?;
        Ok(out)
    }
}

/// Replaces the deployment container with one running the run image
#[derive(Debug, Clone, Copy, Default)]
pub struct Deploy;

#[async_trait]
impl StageAction for Deploy {
    fn describe(&self) -> String {
        "replace the branch container".to_string()
    }

    async fn run(&self, scope: &StageScope<'_>) -> Result<StageOutput, StageError> {
        let cli = scope.container();
        let ctx = scope.context;
        let mut out = StageOutput::default();

        // A branch's first deploy has no container to replace.
        for invocation in [cli.stop(&ctx.container_name), cli.remove(&ctx.container_name)] {
            let replaced = scope.runner.best_effort(invocation).await?;
            if let Some(warning) = replaced.warning {
                tracing::debug!(stage = scope.stage, %warning, "No previous container");
            }
        }
        out.record(scope.runner.checked(cli.run_detached(ctx)).await?);
        out.line(format!(
            "Deployed {} at http://localhost:{}",
            ctx.container_name, ctx.deploy_port
        ));
        Ok(out)
    }
}

/// Body that does nothing
#[cfg(test)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Noop;

#[cfg(test)]
#[async_trait]
impl StageAction for Noop {
    fn describe(&self) -> String {
        "nothing".to_string()
    }

    async fn run(&self, _scope: &StageScope<'_>) -> Result<StageOutput, StageError> {
        Ok(StageOutput::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_output_record() {
        let mut out = StageOutput::default();
        out.record(CommandOutput {
            command: "npm run lint".to_string(),
            exit_code: 1,
            output: "2 problems".to_string(),
            duration: std::time::Duration::ZERO,
            warning: Some("'npm run lint' exited with code 1".to_string()),
        });
        out.line("done");

        assert_eq!(out.output, "2 problems\ndone\n");
        assert_eq!(out.warnings.len(), 1);
    }
}
