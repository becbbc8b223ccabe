//! shipline - build, test and deploy a containerized web app
//!
//! ## Commands
//!
//! - `shipline run` - Run the pipeline
//! - `shipline plan` - Show which stages would run
//! - `shipline params` - List parameters and their defaults
//! - `shipline doctor` - Check that git, the container engine and the tools are installed
//! - `shipline completions` - Generate shell completions
//!
//! ## Quick Start
//!
//! ```bash
//! # Build and deploy develop on port 8080, skipping the linter
//! shipline run --branch develop --deploy-port 8080 --run-linting false
//!
//! # Push to a registry; the password is read from SHIPLINE_REGISTRY_PASSWORD
//! shipline run --push-to-registry true --registry-username ci-bot
//!
//! # Preview a run
//! shipline plan -p DEPLOY_LOCALLY=false
//! ```
//!
//! Exit status is 0 for a completed run, 1 for a failed run, 2 for invalid
//! parameters or configuration and 130 for a cancelled run.

use std::process::ExitCode;

mod cli;

fn main() -> ExitCode {
    match cli::run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if std::env::var("SHIPLINE_VERBOSE").is_ok() {
                eprintln!("{e:?}");
            }
            cli::exit_code_for(&e)
        }
    }
}
