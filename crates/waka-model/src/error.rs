use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("command cannot be null or empty")]
    EmptyCommand,
    #[error("invalid exit status: {0}")]
    InvalidStatus(String),
}
