use thiserror::Error;
use waka_model::ModelError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid command: {0}")]
    Validation(String),

    #[error("an execution is already in progress, please wait for it to finish")]
    Busy,

    #[error("no async runtime available to schedule the run: {0}")]
    Runtime(String),
}

impl From<ModelError> for CoreError {
    fn from(err: ModelError) -> Self {
        CoreError::Validation(err.to_string())
    }
}
