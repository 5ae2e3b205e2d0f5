use thiserror::Error;
use waka_core::RunnerError;

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("missing program")]
    MissingProgram,
    #[error("child stdio was not captured")]
    MissingPipe,
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}

impl From<ExecError> for RunnerError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::Spawn(msg) => RunnerError::Spawn(msg),
            ExecError::Io(msg) => RunnerError::Io(msg),
            missing @ ExecError::MissingProgram => RunnerError::Spawn(missing.to_string()),
            other @ ExecError::MissingPipe => RunnerError::Other(other.to_string()),
        }
    }
}
