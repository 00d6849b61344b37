//! Error taxonomy shared by every stage of the pipeline.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Everything that can stop a run.
///
/// Components return these instead of exiting; `main` decides what is fatal.
#[derive(Debug, Error)]
pub enum AssumeError {
    /// `~` was used but no home directory could be determined.
    #[error("Could not determine home directory")]
    HomeDirectory,

    #[error("{} file does not exist", path.display())]
    ConfigNotFound { path: PathBuf },

    #[error("Failed to read {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {}: {message}", path.display())]
    ConfigParse { path: PathBuf, message: String },

    #[error("{} file is empty", path.display())]
    ConfigEmpty { path: PathBuf },

    /// The config file has sections, but none of them carries a `role_arn`.
    #[error("Config file has no role_arn")]
    NoAssumableProfiles,

    #[error("Please select correct profile id (got {index}, expected 1-{max})")]
    SelectionOutOfRange { index: i64, max: usize },

    #[error("Please select correct profile id (`{input}` is not a number)")]
    SelectionNotNumeric { input: String },

    #[error("Failed to read profile selection: {0}")]
    Prompt(#[source] io::Error),

    /// STS rejected the request or could not be reached.
    #[error("Failed to assume role {role_arn}: {message}")]
    Exchange { role_arn: String, message: String },

    #[error("No credentials returned for role {role_arn}")]
    MissingCredentials { role_arn: String },

    #[error("Failed to print credentials: {0}")]
    Output(#[source] io::Error),

    #[error("Unable to write into {}: {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl AssumeError {
    /// Whether the process should exit with a failure status.
    ///
    /// A failed credentials write happens after all other work is done, so it
    /// is reported but does not change the exit status.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::WriteFailure { .. })
    }
}
