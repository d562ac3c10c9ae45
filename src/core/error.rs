use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PhasegateError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("State error: {0}")]
    StateError(String),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Check error: {0}")]
    CheckError(String),
    #[error("Not found: {0}")]
    NotFound(String),
}
