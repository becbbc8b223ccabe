//! Infrastructure layer
//!
//! This module contains external integrations and adapters.

mod config;
pub mod container;
mod counter;
mod credentials;
pub mod git;
mod logging;

pub use config::{CommandConfig, Config, ConfigError, DEFAULT_CONFIG_FILE};
pub use container::{ContainerCli, ContainerRuntime};
pub use counter::RunCounter;
pub use credentials::{
    CredentialError, CredentialProvider, EnvCredentialProvider, PASSWORD_ENV,
    RegistryCredentials, Secret, StaticCredentialProvider,
};
pub use git::GitCli;
pub use logging::{effective_level, init_logging};
