//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::{error::AssumeError, profiles::expand_home};

/// Where the temporary credentials end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Print the credentials to stdout as JSON
    Json,
    /// Store the credentials in the shared credentials file
    Write,
}

/// AWS role session helper.
///
/// Lists the profiles in the AWS config file that carry a `role_arn`, assumes
/// the chosen one and stores the temporary credentials in a `[temp_<profile>]`
/// section of the credentials file, or prints them as JSON.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputMode::Write)]
    pub output: OutputMode,

    /// AWS config file path
    #[arg(short = 't', long, env = "AWS_CONFIG_FILE", default_value = "~/.aws/config")]
    pub config_file: String,

    /// Path to AWS credentials file [default: ~/.aws/credentials]
    #[arg(short, long, env = "AWS_SHARED_CREDENTIALS_FILE")]
    pub credentials_file: Option<String>,

    /// Session duration in seconds (900-43200) [default: the role's setting]
    #[arg(
        short,
        long,
        env = "AWS_SESSION_DURATION",
        value_parser = clap::value_parser!(u32).range(900..=43200)
    )]
    pub duration: Option<u32>,
}

impl Args {
    /// Resolved credentials file, `~/.aws/credentials` unless overridden.
    pub fn credentials_path(&self) -> Result<PathBuf, AssumeError> {
        expand_home(self.credentials_file.as_deref().unwrap_or("~/.aws/credentials"))
    }
}
