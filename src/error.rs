// ABOUTME: Application-wide error types for sshplex.
// ABOUTME: Uses thiserror for ergonomic error handling.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection profile not found in {0}")]
    ProfileNotFound(PathBuf),

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("no destination given and no profile found")]
    MissingDestination,

    #[error("no user given for {0}")]
    MissingUser(String),

    #[error("no password given: set SSHPLEX_PASSWORD or pipe it on stdin")]
    MissingPassword,

    #[error(transparent)]
    Ssh(#[from] crate::ssh::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
