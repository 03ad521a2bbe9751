use std::time::Duration;

use thiserror::Error;

use crate::process::ProcessResult;

#[derive(Error, Debug)]
pub enum FactoryError {
    #[error("Invalid factories configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("The '{0}' binary was not found")]
    BinaryNotFound(String),

    #[error("{name} has failed to confirm running status after {attempts} start attempts")]
    DaemonNotStarted {
        name: String,
        attempts: usize,
        output: Option<ProcessResult>,
    },

    #[error("'{cmdline}' timed out after {timeout:?}")]
    ProcessTimeout {
        cmdline: String,
        timeout: Duration,
        output: ProcessResult,
    },

    #[error("'{cmdline}' exited with code {exitcode}: {stderr}")]
    CommandFailed {
        cmdline: String,
        exitcode: i32,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, FactoryError>;
