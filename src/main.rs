//! AWS role session helper
//!
//! Turns a profile's long-lived credentials into temporary role credentials.
//!
//! The program performs the following operations, each exactly once:
//! 1. Reads the profiles with a `role_arn` from the AWS config file
//! 2. Asks the operator to pick one of them
//! 3. Calls STS `AssumeRole` for the chosen role with session name `temp_<profile>`
//! 4. Prints the credentials as JSON or writes them to the credentials file

use std::{io::Write, process::ExitCode};

use clap::Parser;
use log::error;

mod cli;
mod credentials;
mod error;
mod profiles;
mod selector;
mod updater;

use cli::Args;
use credentials::{StsIssuer, TokenIssuer};
use error::AssumeError;
use selector::{Prompt, TerminalPrompt};

/// Main entry point for the role session helper.
///
/// This function wires the real collaborators into [`run`]:
/// 1. Initializes logging at INFO level (overridable with `RUST_LOG`)
/// 2. Parses command-line arguments
/// 3. Builds the STS-backed issuer and the terminal prompt
/// 4. Runs the pipeline and turns its outcome into an exit status
///
/// # Returns
/// * `ExitCode::SUCCESS` - Credentials were emitted, or only the final
///   credentials write failed
/// * `ExitCode::FAILURE` - Any earlier step failed
#[tokio::main]
async fn main() -> ExitCode {
    // INFO by default so the export hint is visible; RUST_LOG still wins.
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let issuer = StsIssuer::new(args.duration);

    exit_code(run(&args, &mut TerminalPrompt, &issuer, &mut std::io::stdout()).await)
}

/// Runs the pipeline once, stopping at the first error.
///
/// # Arguments
/// * `args` - Parsed command line
/// * `prompt` - Where the operator's profile choice comes from
/// * `issuer` - Exchanges the chosen role for temporary credentials
/// * `out` - Receives the JSON document in `--output json` mode
///
/// # Errors
/// Returns the first [`AssumeError`] raised by any step. Nothing is retried,
/// and the credentials file is only touched after a successful exchange.
async fn run(
    args: &Args,
    prompt: &mut impl Prompt,
    issuer: &impl TokenIssuer,
    out: &mut impl Write,
) -> Result<(), AssumeError> {
    // Profiles with a role_arn, in file order
    let profiles = profiles::read_profiles(&args.config_file)?;

    // Single attempt at picking one; bad input ends the run
    let selected = selector::select(&profiles, prompt)?;

    // One AssumeRole call as temp_<profile>
    let (session_name, bundle) =
        credentials::assume(issuer, &selected.name, &selected.role_arn).await?;

    // The credentials file path is only needed when writing it
    updater::emit(
        &session_name,
        &bundle,
        args.output,
        || args.credentials_path(),
        out,
    )
    .await
}

/// Maps the pipeline outcome to an exit status, logging any error once.
fn exit_code(result: Result<(), AssumeError>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            if e.is_fatal() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
    }
}
