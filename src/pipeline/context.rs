//! Build metadata derived once per run.
//!
//! A [`BuildContext`] ties a run number to every name the run touches: the
//! version label, image tag, deployment container and transient test
//! container. Derivation is a pure function of the parameters, the run
//! number and the timestamp, so re-deriving for the same inputs yields the
//! same names.

use super::parameters::{Branch, ParameterSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Format of [`BuildContext::timestamp`]
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Environment mode exported to stage commands as `NODE_ENV`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentMode {
    /// Lint, unit tests, image smoke tests
    #[default]
    Test,
    /// Image build, push and deployment
    Production,
}

impl fmt::Display for EnvironmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Test => f.write_str("test"),
            Self::Production => f.write_str("production"),
        }
    }
}

/// Immutable metadata shared by every stage of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    /// Run sequence number
    pub run_number: u64,
    /// Branch being built
    pub branch: Branch,
    /// `{branch}-{run_number}`
    pub version_label: String,
    /// Image name without tag
    pub image_name: String,
    /// Run-specific image tag
    pub image_tag: String,
    /// Long-lived deployment container, one per branch
    pub container_name: String,
    /// Transient container used by the image smoke test
    pub test_container_name: String,
    /// Host port of the deployment
    pub deploy_port: u16,
    /// Build timestamp in [`TIMESTAMP_FORMAT`]
    pub timestamp: String,
}

impl BuildContext {
    /// Derives the context, reading the clock once
    #[must_use]
    pub fn derive(params: &ParameterSet, run_number: u64) -> Self {
        Self::derive_at(params, run_number, Utc::now())
    }

    /// Derives the context for a fixed instant
    #[must_use]
    pub fn derive_at(params: &ParameterSet, run_number: u64, at: DateTime<Utc>) -> Self {
        let branch = params.branch();
        let image_name = params.image_name().to_string();

        Self {
            run_number,
            branch,
            version_label: format!("{branch}-{run_number}"),
            image_tag: run_number.to_string(),
            container_name: format!("{image_name}-{branch}"),
            test_container_name: format!("{image_name}-test-{run_number}"),
            deploy_port: params.deploy_port(),
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
            image_name,
        }
    }

    /// `image:tag` for this run
    #[must_use]
    pub fn image_ref(&self) -> String {
        self.image_ref_for(&self.image_tag)
    }

    /// `image:{tag}` for an arbitrary tag
    #[must_use]
    pub fn image_ref_for(&self, tag: &str) -> String {
        format!("{}:{tag}", self.image_name)
    }

    /// Tags applied by the image build: run tag, branch, `latest`
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        vec![
            self.image_tag.clone(),
            self.branch.to_string(),
            "latest".to_string(),
        ]
    }

    /// Repository path in a registry, e.g. `docker.io/acme/webapp`
    #[must_use]
    pub fn registry_repository(&self, registry: &str, username: &str) -> String {
        let registry = registry.trim_end_matches('/');
        if registry.is_empty() {
            format!("{username}/{}", self.image_name)
        } else {
            format!("{registry}/{username}/{}", self.image_name)
        }
    }

    /// Variables injected into every command of a stage
    #[must_use]
    pub fn environment(&self, mode: EnvironmentMode) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("VERSION".to_string(), self.version_label.clone()),
            ("BUILD_NUMBER".to_string(), self.run_number.to_string()),
            ("BRANCH".to_string(), self.branch.to_string()),
            ("IMAGE_TAG".to_string(), self.image_tag.clone()),
            ("IMAGE_REF".to_string(), self.image_ref()),
            ("BUILD_TIMESTAMP".to_string(), self.timestamp.clone()),
            ("NODE_ENV".to_string(), mode.to_string()),
            ("PORT".to_string(), self.deploy_port.to_string()),
        ])
    }
}

impl fmt::Display for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, built {})",
            self.version_label,
            self.image_ref(),
            self.timestamp
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::parameters::RawParameters;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    fn params(branch: &str, image: &str, port: &str) -> ParameterSet {
        ParameterSet::from_raw(
            &RawParameters::new()
                .set("BRANCH", branch)
                .set("IMAGE_NAME", image)
                .set("DEPLOY_PORT", port),
        )
        .unwrap()
    }

    #[test]
    fn test_derived_names() {
        let ctx = BuildContext::derive_at(&params("main", "webapp", "3000"), 42, instant());

        assert_eq!(ctx.version_label, "main-42");
        assert_eq!(ctx.image_tag, "42");
        assert_eq!(ctx.image_ref(), "webapp:42");
        assert_eq!(ctx.container_name, "webapp-main");
        assert_eq!(ctx.test_container_name, "webapp-test-42");
        assert_eq!(ctx.timestamp, "2024-03-09T14:05:07Z");
        assert_eq!(ctx.tags(), vec!["42", "main", "latest"]);
    }

    #[test]
    fn test_environment_injection() {
        let ctx = BuildContext::derive_at(&params("staging", "shop", "8080"), 7, instant());
        let env = ctx.environment(EnvironmentMode::Production);

        assert_eq!(env["VERSION"], "staging-7");
        assert_eq!(env["BUILD_NUMBER"], "7");
        assert_eq!(env["BRANCH"], "staging");
        assert_eq!(env["NODE_ENV"], "production");
        assert_eq!(env["PORT"], "8080");
        assert_eq!(env["IMAGE_REF"], "shop:7");
    }

    #[test]
    fn test_registry_repository() {
        let ctx = BuildContext::derive_at(&params("main", "webapp", "3000"), 1, instant());

        assert_eq!(
            ctx.registry_repository("docker.io", "acme"),
            "docker.io/acme/webapp"
        );
        assert_eq!(
            ctx.registry_repository("ghcr.io/", "acme"),
            "ghcr.io/acme/webapp"
        );
        assert_eq!(ctx.registry_repository("", "acme"), "acme/webapp");
    }

    #[test]
    fn test_consecutive_runs_only_differ_in_run_fields() {
        let p = params("develop", "webapp", "3000");
        let first = BuildContext::derive_at(&p, 10, instant());
        let second = BuildContext::derive_at(&p, 11, instant());

        assert_ne!(first.image_tag, second.image_tag);
        assert_ne!(first.version_label, second.version_label);
        assert_ne!(first.test_container_name, second.test_container_name);
        assert_eq!(first.container_name, second.container_name);
        assert_eq!(first.branch, second.branch);
        assert_eq!(first.deploy_port, second.deploy_port);
        assert_eq!(first.timestamp, second.timestamp);
    }

    proptest! {
        #[test]
        fn prop_derivation_is_pure(
            run in 0u64..1_000_000,
            branch in prop::sample::select(vec!["main", "develop", "staging"]),
            image in "[a-z][a-z0-9-]{0,20}",
            secs in 0i64..4_000_000_000,
        ) {
            let p = params(branch, &image, "3000");
            let at = Utc.timestamp_opt(secs, 0).unwrap();

            let a = BuildContext::derive_at(&p, run, at);
            let b = BuildContext::derive_at(&p, run, at);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(
                a.environment(EnvironmentMode::Test),
                b.environment(EnvironmentMode::Test)
            );
        }

        #[test]
        fn prop_runs_never_collide(run in 0u64..1_000_000) {
            let p = params("main", "webapp", "3000");
            let a = BuildContext::derive_at(&p, run, instant());
            let b = BuildContext::derive_at(&p, run + 1, instant());
            prop_assert_ne!(&a.image_tag, &b.image_tag);
            prop_assert_ne!(&a.test_container_name, &b.test_container_name);
            prop_assert_ne!(a.image_ref(), b.image_ref());
        }
    }
}
