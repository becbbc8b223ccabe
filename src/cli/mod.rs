//! CLI for shipline
//!
//! - `run`: run the pipeline for a set of parameters
//! - `plan`: show which stages would run, without running anything
//! - `params`: list the declared parameters
//! - `doctor`: check that the external tools are available
//! - `completions`: generate shell completions

pub mod completions;
pub mod doctor;
pub mod params;
pub mod plan;
pub mod run;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use shipline::pipeline::{RawParameters, ValidationError};
use std::path::PathBuf;
use std::process::ExitCode;

/// Exit status of a failed run
pub const EXIT_FAILED: u8 = 1;
/// Exit status for invalid parameters or configuration
pub const EXIT_USAGE: u8 = 2;
/// Exit status of a cancelled run
pub const EXIT_CANCELLED: u8 = 130;

/// CLI arguments for shipline
#[derive(Parser, Debug)]
#[command(name = "shipline")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to ./shipline.yaml if present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline
    Run {
        #[command(flatten)]
        params: ParameterArgs,
        /// Run number; read and incremented from the state directory if omitted
        #[arg(long)]
        build_number: Option<u64>,
        /// Print the sealed run as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which stages would run
    Plan {
        #[command(flatten)]
        params: ParameterArgs,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// List parameters, their domains and defaults
    Params {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that git, the container engine and the tools are available
    Doctor,

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: ShellArg,
        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Run parameters as command line flags
#[derive(clap::Args, Debug, Default)]
struct ParameterArgs {
    /// Repository to clone
    #[arg(long)]
    repo_url: Option<String>,
    /// Branch to build: main, develop or staging
    #[arg(long)]
    branch: Option<String>,
    /// Run unit tests and the image test: true or false
    #[arg(long)]
    run_tests: Option<String>,
    /// Run the linter: true or false
    #[arg(long)]
    run_linting: Option<String>,
    /// Build the container image: true or false
    #[arg(long)]
    build_image: Option<String>,
    /// Push the image to the registry: true or false
    #[arg(long)]
    push_to_registry: Option<String>,
    /// Deploy the image locally: true or false
    #[arg(long)]
    deploy_locally: Option<String>,
    /// Remove the workspace first: true or false
    #[arg(long)]
    clean_workspace: Option<String>,
    /// Verbose logging and post-run dump: true or false
    #[arg(long)]
    verbose: Option<String>,
    /// Host port of the deployment: 3000, 8080 or 80
    #[arg(long)]
    deploy_port: Option<String>,
    /// Image name
    #[arg(long)]
    image_name: Option<String>,
    /// Registry account
    #[arg(long)]
    registry_username: Option<String>,
    /// Any parameter as NAME=VALUE
    #[arg(short = 'p', long = "param", value_name = "NAME=VALUE")]
    extra: Vec<String>,
}

impl ParameterArgs {
    fn to_raw(&self) -> Result<RawParameters, ValidationError> {
        let flags = [
            ("REPO_URL", &self.repo_url),
            ("BRANCH", &self.branch),
            ("RUN_TESTS", &self.run_tests),
            ("RUN_LINTING", &self.run_linting),
            ("BUILD_IMAGE", &self.build_image),
            ("PUSH_TO_REGISTRY", &self.push_to_registry),
            ("DEPLOY_LOCALLY", &self.deploy_locally),
            ("CLEAN_WORKSPACE", &self.clean_workspace),
            ("VERBOSE", &self.verbose),
            ("DEPLOY_PORT", &self.deploy_port),
            ("IMAGE_NAME", &self.image_name),
            ("REGISTRY_USERNAME", &self.registry_username),
        ];

        let mut raw = RawParameters::new();
        for pair in &self.extra {
            raw.insert_pair(pair)?;
        }
        // Dedicated flags win over --param.
        for (name, value) in flags {
            if let Some(value) = value {
                raw.insert(name, value.as_str());
            }
        }
        Ok(raw)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ShellArg {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

/// Build the CLI command for completion generation
pub fn build_cli() -> clap::Command {
    Args::command()
}

/// Parse and execute CLI arguments
pub fn run() -> Result<ExitCode> {
    let args = Args::parse();
    let config = args.config;

    match args.command {
        Command::Run {
            params,
            build_number,
            json,
        } => run::execute(&run::RunOptions {
            params: params.to_raw()?,
            build_number,
            json,
            config,
        }),
        Command::Plan { params, json } => plan::execute(&params.to_raw()?, config.as_deref(), json),
        Command::Params { json } => {
            params::print_parameters(json)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Doctor => doctor::execute(config.as_deref()),
        Command::Completions { shell, output } => {
            use clap_complete::Shell;

            let shell_enum = match shell {
                ShellArg::Bash => Shell::Bash,
                ShellArg::Zsh => Shell::Zsh,
                ShellArg::Fish => Shell::Fish,
                ShellArg::PowerShell => Shell::PowerShell,
            };

            let completions = completions::generate_completions(shell_enum)?;

            if let Some(output_path) = output {
                completions::save_completions(&completions, &output_path)?;
            } else {
                println!("{completions}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Exit status for an error that escaped [`run`]
pub fn exit_code_for(error: &anyhow::Error) -> ExitCode {
    let usage = error.downcast_ref::<ValidationError>().is_some()
        || error
            .downcast_ref::<shipline::infrastructure::ConfigError>()
            .is_some();
    ExitCode::from(if usage { EXIT_USAGE } else { EXIT_FAILED })
}
