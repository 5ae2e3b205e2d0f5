use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use thiserror::Error;
use waka_model::{CommandLine, ExecStatus};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("runner failed: {0}")]
    Other(String),
}

impl From<std::io::Error> for RunnerError {
    fn from(e: std::io::Error) -> Self {
        RunnerError::Io(e.to_string())
    }
}

/// Stop request for one run.
///
/// Raised before [`CommandRunner::stop`] is called, so a runner that has not
/// yet registered its work can still see the request once it does.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The thing that actually executes a command.
///
/// `run` blocks the calling thread for the whole command duration and is only
/// ever invoked from a blocking worker. `stop` must return immediately; the
/// run observes it and returns on its own.
///
/// `stop` may land before `run` has anything to cancel. Runners must check
/// `signal` once their work is cancellable and honour a request raised earlier.
pub trait CommandRunner: Send + Sync + 'static {
    fn run(&self, command: &CommandLine, signal: &StopSignal) -> Result<ExecStatus, RunnerError>;

    /// Best-effort cooperative cancellation. No-op when nothing runs.
    fn stop(&self);
}
