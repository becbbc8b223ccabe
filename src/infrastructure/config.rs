//! Configuration management
//!
//! Configuration is read from YAML. Every key is optional; unknown keys are
//! rejected so a typo never silently falls back to a default.

use super::container::ContainerRuntime;
use crate::executor::CommandTemplate;
use crate::pipeline::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File looked up in the current directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "shipline.yaml";

/// Errors loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read
    #[error("Cannot read {path}: {source}")]
    Read {
        /// Config file
        path: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// File is not valid YAML for [`Config`]
    #[error("Invalid configuration in {path}: {reason}")]
    Parse {
        /// Config file
        path: String,
        /// Parser message
        reason: String,
    },

    /// A value is out of range
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Tool commands run by the stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandConfig {
    /// Dependency install, skipped when `node_modules` exists
    pub install: String,
    /// Linter
    pub lint: String,
    /// Unit tests
    pub test: String,
    /// Coverage report, disabled when unset
    pub coverage: Option<String>,
    /// Vulnerability scan of the built image
    pub scan: String,
    /// Command run inside the image by the image test
    pub image_test: String,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            install: "npm ci".to_string(),
            lint: "npm run lint".to_string(),
            test: "npm test".to_string(),
            coverage: Some("npm run test:coverage".to_string()),
            scan: "trivy image --exit-code 1 --severity HIGH,CRITICAL ${IMAGE_REF}".to_string(),
            image_test: "npm test".to_string(),
        }
    }
}

impl CommandConfig {
    /// Parses the command configured for `slot`
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidCommand`] for an unknown slot or an
    /// unparsable command line.
    pub fn template(&self, slot: &str) -> Result<CommandTemplate, ValidationError> {
        let line = match slot {
            "install" => &self.install,
            "lint" => &self.lint,
            "test" => &self.test,
            "scan" => &self.scan,
            "image_test" => &self.image_test,
            "coverage" => self.coverage.as_ref().ok_or_else(|| {
                ValidationError::InvalidCommand {
                    name: slot.to_string(),
                    reason: "not configured".to_string(),
                }
            })?,
            _ => {
                return Err(ValidationError::InvalidCommand {
                    name: slot.to_string(),
                    reason: "unknown command".to_string(),
                });
            }
        };
        CommandTemplate::parse(slot, line)
    }

    fn configured_slots(&self) -> Vec<&'static str> {
        let mut slots = vec!["install", "lint", "test", "scan", "image_test"];
        if self.coverage.is_some() {
            slots.push("coverage");
        }
        slots
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Checkout directory
    pub workspace: PathBuf,
    /// Directory holding the run counter
    pub state_dir: PathBuf,
    /// Log level
    pub log_level: String,
    /// Container engine
    pub container_runtime: ContainerRuntime,
    /// Registry host, empty for the engine's default
    pub registry: String,
    /// Dockerfile used by the image build
    pub dockerfile: String,
    /// Default stage deadline in seconds
    pub stage_timeout_secs: Option<u64>,
    /// Extra variables for every command
    pub environment: BTreeMap<String, String>,
    /// Tool commands
    pub commands: CommandConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("workspace"),
            state_dir: PathBuf::from(".shipline"),
            log_level: "info".to_string(),
            container_runtime: ContainerRuntime::Docker,
            registry: "docker.io".to_string(),
            dockerfile: "Dockerfile".to_string(),
            stage_timeout_secs: None,
            environment: BTreeMap::new(),
            commands: CommandConfig::default(),
        }
    }
}

impl Config {
    /// Parses and validates YAML text
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_yaml(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = if text.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(text).map_err(|e| ConfigError::Parse {
                path: origin.to_string(),
                reason: e.to_string(),
            })?
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text, &path.display().to_string())
    }

    /// Loads `explicit`, else [`DEFAULT_CONFIG_FILE`] if present, else defaults
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a file is found but invalid, or if
    /// `explicit` does not exist.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::load(default)
                } else {
                    tracing::debug!("No configuration file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    /// Checks value ranges and command syntax
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.stage_timeout_secs == Some(0) {
            return Err(ValidationError::InvalidTimeout { value: 0 });
        }
        for slot in self.commands.configured_slots() {
            self.commands.template(slot)?;
        }
        Ok(())
    }

    /// Default stage deadline
    #[must_use]
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.registry, "docker.io");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.container_runtime, ContainerRuntime::Docker);
        assert!(config.validate().is_ok());
        assert!(config.stage_timeout().is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml(
            "container_runtime: podman\nstage_timeout_secs: 600\ncommands:\n  lint: npx eslint .\n",
            "inline",
        )
        .unwrap();

        assert_eq!(config.container_runtime, ContainerRuntime::Podman);
        assert_eq!(config.stage_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.commands.lint, "npx eslint .");
        assert_eq!(config.commands.test, "npm test");
        assert_eq!(config.dockerfile, "Dockerfile");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Config::from_yaml("regsitry: ghcr.io\n", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = Config::from_yaml("stage_timeout_secs: 0\n", "inline").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid(ValidationError::InvalidTimeout { .. })
        ));
    }

    #[test]
    fn test_bad_command_rejected() {
        let err = Config::from_yaml("commands:\n  scan: \"trivy 'image\"\n", "inline").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid(ValidationError::InvalidCommand { .. })
        ));
    }

    #[test]
    fn test_coverage_can_be_disabled() {
        let config = Config::from_yaml("commands:\n  coverage: null\n", "inline").unwrap();
        assert!(config.commands.coverage.is_none());
        assert!(config.commands.template("coverage").is_err());
    }

    #[test]
    fn test_load_and_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shipline.yaml");
        std::fs::write(&path, "registry: ghcr.io\nenvironment:\n  CI: \"true\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.registry, "ghcr.io");
        assert_eq!(config.environment["CI"], "true");

        let missing = Config::discover(Some(&dir.path().join("nope.yaml")));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
