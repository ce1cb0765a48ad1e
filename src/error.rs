use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures of the credential acquisition pipeline. Every variant is terminal.
#[derive(Error, Debug)]
pub enum Error {
    #[error("account '{account}' not found in table '{table}'. Are you pointing to the correct table?")]
    NotFound { table: String, account: String },

    #[error("account '{account}' in table '{table}' is misconfigured: {reason}")]
    Integrity {
        table: String,
        account: String,
        reason: String,
    },

    #[error(
        "profile '{account}' already exists in {} and is not managed by rolehop; no changes were made",
        .path.display()
    )]
    Collision { account: String, path: PathBuf },

    #[error("{0}")]
    Provider(String),

    #[error(
        "credential cache {} is corrupted: {reason}. Remove the file manually and run the command again",
        .path.display()
    )]
    Corruption { path: PathBuf, reason: String },

    #[error("{} does not exist. Please check that the AWS credentials and config files exist", .0.display())]
    MissingFile(PathBuf),

    #[error("failed to parse {}: {reason}", .path.display())]
    MalformedFile { path: PathBuf, reason: String },

    #[error("profile '{0}' is not managed by rolehop, nothing was removed")]
    NotManaged(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{what} timed out after {}s", .after.as_secs())]
    Timeout { what: String, after: Duration },

    #[error("{context} {}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }
}
