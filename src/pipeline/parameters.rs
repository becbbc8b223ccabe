//! Run parameters.
//!
//! Parameters are declared once in [`PARAMETER_DEFINITIONS`] and resolved
//! from named string values into a typed, immutable [`ParameterSet`]. Every
//! value is checked against its declared domain; absent values take the
//! declared default.

use super::errors::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Declaration of a single run parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterDefinition {
    /// Free-form string parameter
    String {
        /// Parameter name
        name: &'static str,
        /// Description
        description: &'static str,
        /// Default value
        default_value: &'static str,
    },

    /// Boolean parameter
    Boolean {
        /// Parameter name
        name: &'static str,
        /// Description
        description: &'static str,
        /// Default value
        default_value: bool,
    },

    /// Choice parameter; the first choice is the default
    Choice {
        /// Parameter name
        name: &'static str,
        /// Description
        description: &'static str,
        /// Available choices
        choices: &'static [&'static str],
    },
}

impl ParameterDefinition {
    /// Returns the parameter name
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::String { name, .. } | Self::Boolean { name, .. } | Self::Choice { name, .. } => {
                name
            }
        }
    }

    /// Returns the parameter description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::String { description, .. }
            | Self::Boolean { description, .. }
            | Self::Choice { description, .. } => description,
        }
    }

    /// Returns the default value in its string form
    #[must_use]
    pub fn default_value(&self) -> String {
        match self {
            Self::String { default_value, .. } => (*default_value).to_string(),
            Self::Boolean { default_value, .. } => default_value.to_string(),
            Self::Choice { choices, .. } => choices.first().copied().unwrap_or("").to_string(),
        }
    }

    /// Human readable domain, used by `shipline params`
    #[must_use]
    pub fn domain(&self) -> String {
        match self {
            Self::String { .. } => "string".to_string(),
            Self::Boolean { .. } => "true | false".to_string(),
            Self::Choice { choices, .. } => choices.join(" | "),
        }
    }
}

/// Branches the pipeline knows how to build
pub const BRANCH_CHOICES: &[&str] = &["main", "develop", "staging"];

/// Host ports a local deployment may bind
pub const PORT_CHOICES: &[&str] = &["3000", "8080", "80"];

/// Every parameter accepted by a run, in display order
pub const PARAMETER_DEFINITIONS: &[ParameterDefinition] = &[
    ParameterDefinition::String {
        name: "REPO_URL",
        description: "Git repository to build",
        default_value: "https://github.com/example/webapp.git",
    },
    ParameterDefinition::Choice {
        name: "BRANCH",
        description: "Branch to check out and build",
        choices: BRANCH_CHOICES,
    },
    ParameterDefinition::Boolean {
        name: "RUN_TESTS",
        description: "Run unit tests and the image smoke test",
        default_value: true,
    },
    ParameterDefinition::Boolean {
        name: "RUN_LINTING",
        description: "Run the linter",
        default_value: true,
    },
    ParameterDefinition::Boolean {
        name: "BUILD_IMAGE",
        description: "Build the container image",
        default_value: true,
    },
    ParameterDefinition::Boolean {
        name: "PUSH_TO_REGISTRY",
        description: "Push the image to the registry",
        default_value: false,
    },
    ParameterDefinition::Boolean {
        name: "DEPLOY_LOCALLY",
        description: "Run the image as a local container",
        default_value: true,
    },
    ParameterDefinition::Boolean {
        name: "CLEAN_WORKSPACE",
        description: "Wipe the workspace before checkout",
        default_value: false,
    },
    ParameterDefinition::Boolean {
        name: "VERBOSE",
        description: "Verbose logging and an extended diagnostic dump",
        default_value: false,
    },
    ParameterDefinition::Choice {
        name: "DEPLOY_PORT",
        description: "Host port for the local deployment",
        choices: PORT_CHOICES,
    },
    ParameterDefinition::String {
        name: "IMAGE_NAME",
        description: "Container image name",
        default_value: "webapp",
    },
    ParameterDefinition::String {
        name: "REGISTRY_USERNAME",
        description: "Registry account used for pushes",
        default_value: "",
    },
];

/// Looks up a parameter declaration by name
#[must_use]
pub fn definition(name: &str) -> Option<&'static ParameterDefinition> {
    PARAMETER_DEFINITIONS.iter().find(|def| def.name() == name)
}

/// Branch selected for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    /// Production branch
    Main,
    /// Integration branch
    Develop,
    /// Pre-production branch
    Staging,
}

impl Branch {
    /// Returns the branch name as used by git and in image tags
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Develop => "develop",
            Self::Staging => "staging",
        }
    }

    fn from_choice(value: &str) -> Option<Self> {
        match value {
            "main" => Some(Self::Main),
            "develop" => Some(Self::Develop),
            "staging" => Some(Self::Staging),
            _ => None,
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boolean switches of a [`ParameterSet`], used by stage conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterFlag {
    /// `RUN_TESTS`
    RunTests,
    /// `RUN_LINTING`
    RunLinting,
    /// `BUILD_IMAGE`
    BuildImage,
    /// `PUSH_TO_REGISTRY`
    PushToRegistry,
    /// `DEPLOY_LOCALLY`
    DeployLocally,
    /// `CLEAN_WORKSPACE`
    CleanWorkspace,
    /// `VERBOSE`
    Verbose,
}

impl ParameterFlag {
    /// Returns the declared parameter name
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunTests => "RUN_TESTS",
            Self::RunLinting => "RUN_LINTING",
            Self::BuildImage => "BUILD_IMAGE",
            Self::PushToRegistry => "PUSH_TO_REGISTRY",
            Self::DeployLocally => "DEPLOY_LOCALLY",
            Self::CleanWorkspace => "CLEAN_WORKSPACE",
            Self::Verbose => "VERBOSE",
        }
    }
}

impl fmt::Display for ParameterFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Named parameter values as supplied by the caller, before validation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawParameters(BTreeMap<String, String>);

impl RawParameters {
    /// Creates an empty set of values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a value, replacing any previous one
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Inserts a value in place
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Gets a supplied value
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Parses a `NAME=VALUE` pair
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyName`] when the pair has no name.
    pub fn insert_pair(&mut self, pair: &str) -> Result<(), ValidationError> {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        self.insert(name, value.trim());
        Ok(())
    }

    fn names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }
}

static IMAGE_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]*$").expect("static pattern is valid"));

/// Validated, immutable run configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ParameterSet {
    repo_url: String,
    branch: Branch,
    run_tests: bool,
    run_linting: bool,
    build_image: bool,
    push_to_registry: bool,
    deploy_locally: bool,
    clean_workspace: bool,
    verbose: bool,
    deploy_port: u16,
    image_name: String,
    registry_username: String,
}

impl ParameterSet {
    /// Resolves and validates supplied values against [`PARAMETER_DEFINITIONS`]
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for unknown names, values outside their
    /// declared domain, an invalid image name, or a push request without a
    /// registry username.
    pub fn from_raw(raw: &RawParameters) -> Result<Self, ValidationError> {
        if let Some(unknown) = raw.names().find(|name| definition(name).is_none()) {
            return Err(ValidationError::UnknownParameter {
                name: unknown.clone(),
            });
        }

        let resolved = Resolver { raw };

        let repo_url = resolved.string("REPO_URL")?;
        if repo_url.is_empty() {
            return Err(ValidationError::EmptyValue {
                name: "REPO_URL".to_string(),
            });
        }

        let branch_value = resolved.choice("BRANCH")?;
        let branch = Branch::from_choice(&branch_value).ok_or_else(|| {
            ValidationError::InvalidChoice {
                name: "BRANCH".to_string(),
                value: branch_value.clone(),
                choices: BRANCH_CHOICES.iter().map(ToString::to_string).collect(),
            }
        })?;

        let port_value = resolved.choice("DEPLOY_PORT")?;
        let deploy_port = port_value
            .parse::<u16>()
            .map_err(|_| ValidationError::InvalidChoice {
                name: "DEPLOY_PORT".to_string(),
                value: port_value.clone(),
                choices: PORT_CHOICES.iter().map(ToString::to_string).collect(),
            })?;

        let image_name = resolved.string("IMAGE_NAME")?;
        if !IMAGE_NAME_PATTERN.is_match(&image_name) {
            return Err(ValidationError::InvalidImageName { value: image_name });
        }

        let params = Self {
            repo_url,
            branch,
            run_tests: resolved.boolean("RUN_TESTS")?,
            run_linting: resolved.boolean("RUN_LINTING")?,
            build_image: resolved.boolean("BUILD_IMAGE")?,
            push_to_registry: resolved.boolean("PUSH_TO_REGISTRY")?,
            deploy_locally: resolved.boolean("DEPLOY_LOCALLY")?,
            clean_workspace: resolved.boolean("CLEAN_WORKSPACE")?,
            verbose: resolved.boolean("VERBOSE")?,
            deploy_port,
            image_name,
            registry_username: resolved.string("REGISTRY_USERNAME")?,
        };

        if params.push_to_registry && params.registry_username.is_empty() {
            return Err(ValidationError::MissingRegistryUsername);
        }

        Ok(params)
    }

    /// Parameters with every value at its declared default
    ///
    /// # Errors
    ///
    /// Only fails if the declared defaults are themselves inconsistent.
    pub fn defaults() -> Result<Self, ValidationError> {
        Self::from_raw(&RawParameters::new())
    }

    /// Returns the value of a boolean switch
    #[must_use]
    pub fn flag(&self, flag: ParameterFlag) -> bool {
        match flag {
            ParameterFlag::RunTests => self.run_tests,
            ParameterFlag::RunLinting => self.run_linting,
            ParameterFlag::BuildImage => self.build_image,
            ParameterFlag::PushToRegistry => self.push_to_registry,
            ParameterFlag::DeployLocally => self.deploy_locally,
            ParameterFlag::CleanWorkspace => self.clean_workspace,
            ParameterFlag::Verbose => self.verbose,
        }
    }

    /// Repository to clone
    #[must_use]
    pub fn repo_url(&self) -> &str {
        &self.repo_url
    }

    /// Branch to build
    #[must_use]
    pub fn branch(&self) -> Branch {
        self.branch
    }

    /// Host port of the local deployment
    #[must_use]
    pub fn deploy_port(&self) -> u16 {
        self.deploy_port
    }

    /// Container image name
    #[must_use]
    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    /// Registry account, empty when pushes are disabled
    #[must_use]
    pub fn registry_username(&self) -> &str {
        &self.registry_username
    }

    /// Whether verbose logging was requested
    #[must_use]
    pub fn verbose(&self) -> bool {
        self.verbose
    }
}

struct Resolver<'a> {
    raw: &'a RawParameters,
}

impl Resolver<'_> {
    fn value(&self, name: &str) -> String {
        self.raw.get(name).map_or_else(
            || definition(name).map(ParameterDefinition::default_value).unwrap_or_default(),
            |v| v.trim().to_string(),
        )
    }

    fn string(&self, name: &str) -> Result<String, ValidationError> {
        match definition(name) {
            Some(ParameterDefinition::String { .. }) => Ok(self.value(name)),
            _ => Err(ValidationError::UnknownParameter {
                name: name.to_string(),
            }),
        }
    }

    fn boolean(&self, name: &str) -> Result<bool, ValidationError> {
        if !matches!(definition(name), Some(ParameterDefinition::Boolean { .. })) {
            return Err(ValidationError::UnknownParameter {
                name: name.to_string(),
            });
        }
        let value = self.value(name);
        match value.to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(ValidationError::InvalidBoolean {
                name: name.to_string(),
                value,
            }),
        }
    }

    fn choice(&self, name: &str) -> Result<String, ValidationError> {
        let Some(ParameterDefinition::Choice { choices, .. }) = definition(name) else {
            return Err(ValidationError::UnknownParameter {
                name: name.to_string(),
            });
        };
        let value = self.value(name);
        if choices.contains(&value.as_str()) {
            Ok(value)
        } else {
            Err(ValidationError::InvalidChoice {
                name: name.to_string(),
                value,
                choices: choices.iter().map(ToString::to_string).collect(),
            })
        }
    }
}
