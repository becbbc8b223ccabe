//! Registry credentials
//!
//! Credentials are acquired inside the push stage and dropped when it ends.
//! The password is wrapped in [`Secret`], which never prints its value.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Environment variable read by [`EnvCredentialProvider`]
pub const PASSWORD_ENV: &str = "SHIPLINE_REGISTRY_PASSWORD";

const MASK: &str = "****";

/// A value that must not reach logs or captured output
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wraps a value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the wrapped value; only for handing to a child process
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Masks every occurrence of the value in `text`
    #[must_use]
    pub fn redact(&self, text: &str) -> String {
        if self.0.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.0, MASK)
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({MASK})")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MASK)
    }
}

/// Account and password for one registry
#[derive(Debug, Clone)]
pub struct RegistryCredentials {
    /// Registry account
    pub username: String,
    /// Registry password or token
    pub password: Secret,
}

/// Errors acquiring credentials
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No password is configured for the account
    #[error("No registry password for '{username}': set {source_name}")]
    Missing {
        /// Registry account
        username: String,
        /// Where the password was looked up
        source_name: String,
    },

    /// The username is empty
    #[error("Registry username is empty")]
    EmptyUsername,
}

/// Source of registry credentials
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetches credentials for the given account
    async fn acquire(
        &self,
        registry: &str,
        username: &str,
    ) -> Result<RegistryCredentials, CredentialError>;

    /// Host variables holding secrets, to keep out of child environments
    fn reserved_variables(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Reads the password from [`PASSWORD_ENV`]
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialProvider {
    variable: Option<String>,
}

impl EnvCredentialProvider {
    /// Provider reading [`PASSWORD_ENV`]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider reading a different variable
    #[must_use]
    pub fn with_variable(variable: impl Into<String>) -> Self {
        Self {
            variable: Some(variable.into()),
        }
    }

    fn variable(&self) -> &str {
        self.variable.as_deref().unwrap_or(PASSWORD_ENV)
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn acquire(
        &self,
        registry: &str,
        username: &str,
    ) -> Result<RegistryCredentials, CredentialError> {
        if username.is_empty() {
            return Err(CredentialError::EmptyUsername);
        }

        match std::env::var(self.variable()) {
            Ok(password) if !password.is_empty() => {
                tracing::debug!(registry, username, "Registry credentials acquired");
                Ok(RegistryCredentials {
                    username: username.to_string(),
                    password: Secret::new(password),
                })
            }
            _ => Err(CredentialError::Missing {
                username: username.to_string(),
                source_name: self.variable().to_string(),
            }),
        }
    }

    fn reserved_variables(&self) -> Vec<String> {
        vec![self.variable().to_string()]
    }
}

/// Fixed password, for embedding and tests
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    password: Secret,
}

impl StaticCredentialProvider {
    /// Provider that always returns `password`
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: Secret::new(password),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn acquire(
        &self,
        _registry: &str,
        username: &str,
    ) -> Result<RegistryCredentials, CredentialError> {
        if username.is_empty() {
            return Err(CredentialError::EmptyUsername);
        }
        Ok(RegistryCredentials {
            username: username.to_string(),
            password: self.password.clone(),
        })
    }
}
