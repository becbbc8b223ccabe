//! Container engine command lines (Docker/Podman)
//!
//! [`ContainerCli`] only builds [`Invocation`]s; running them, and deciding
//! whether a failure matters, is up to the caller.

use crate::executor::Invocation;
use crate::infrastructure::Secret;
use crate::pipeline::{BuildContext, EnvironmentMode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Container runtime type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    /// Docker runtime
    #[default]
    Docker,
    /// Podman runtime
    Podman,
}

impl ContainerRuntime {
    /// Executable name
    #[must_use]
    pub fn program(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

impl fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// Builds container engine invocations
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerCli {
    runtime: ContainerRuntime,
}

impl ContainerCli {
    /// CLI for the given runtime
    #[must_use]
    pub fn new(runtime: ContainerRuntime) -> Self {
        Self { runtime }
    }

    fn command(&self) -> Invocation {
        Invocation::new(self.runtime.program())
    }

    /// `build` tagging the run tag, the branch and `latest`
    #[must_use]
    pub fn build(&self, ctx: &BuildContext, dockerfile: &str) -> Invocation {
        let build_args = [
            ("BUILD_NUMBER", ctx.run_number.to_string()),
            ("VERSION", ctx.version_label.clone()),
            ("BRANCH", ctx.branch.to_string()),
            ("BUILD_TIMESTAMP", ctx.timestamp.clone()),
        ];

        let mut inv = self.command().args(["build", "-f", dockerfile]);
        for (key, value) in build_args {
            inv = inv.arg("--build-arg").arg(format!("{key}={value}"));
        }
        for tag in ctx.tags() {
            inv = inv.arg("-t").arg(ctx.image_ref_for(&tag));
        }
        inv.arg(".")
    }

    /// Runs `command` inside a transient container of the run image
    #[must_use]
    pub fn run_test<I, S>(&self, ctx: &BuildContext, command: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command()
            .args(["run", "--rm", "--name", ctx.test_container_name.as_str()])
            .arg("-e")
            .arg(format!("NODE_ENV={}", EnvironmentMode::Test))
            .arg(ctx.image_ref())
            .args(command)
    }

    /// Starts the long-lived deployment container
    #[must_use]
    pub fn run_detached(&self, ctx: &BuildContext) -> Invocation {
        let port = ctx.deploy_port;
        self.command()
            .args(["run", "-d", "--name", ctx.container_name.as_str()])
            .arg("-p")
            .arg(format!("{port}:{port}"))
            .arg("-e")
            .arg(format!("NODE_ENV={}", EnvironmentMode::Production))
            .arg("-e")
            .arg(format!("PORT={port}"))
            .args(["--restart", "unless-stopped"])
            .arg(ctx.image_ref())
    }

    /// `stop <name>`
    #[must_use]
    pub fn stop(&self, name: &str) -> Invocation {
        self.command().args(["stop", name])
    }

    /// `rm -f <name>`
    #[must_use]
    pub fn remove(&self, name: &str) -> Invocation {
        self.command().args(["rm", "-f", name])
    }

    /// `login` reading the password from stdin
    #[must_use]
    pub fn login(&self, registry: &str, username: &str, password: Secret) -> Invocation {
        let mut inv = self.command().arg("login");
        if !registry.is_empty() {
            inv = inv.arg(registry);
        }
        inv.args(["-u", username, "--password-stdin"]).stdin(password)
    }

    /// `logout`
    #[must_use]
    pub fn logout(&self, registry: &str) -> Invocation {
        let inv = self.command().arg("logout");
        if registry.is_empty() { inv } else { inv.arg(registry) }
    }

    /// `tag <source> <target>`
    #[must_use]
    pub fn tag(&self, source: &str, target: &str) -> Invocation {
        self.command().args(["tag", source, target])
    }

    /// `push <reference>`
    #[must_use]
    pub fn push(&self, reference: &str) -> Invocation {
        self.command().args(["push", reference])
    }

    /// `image prune -f`
    #[must_use]
    pub fn prune_images(&self) -> Invocation {
        self.command().args(["image", "prune", "-f"])
    }

    /// `images <image>`
    #[must_use]
    pub fn list_images(&self, image: &str) -> Invocation {
        self.command().args(["images", image])
    }

    /// `ps -a --filter name=<prefix>`
    #[must_use]
    pub fn list_containers(&self, prefix: &str) -> Invocation {
        self.command()
            .args(["ps", "-a", "--filter"])
            .arg(format!("name={prefix}"))
    }
}
