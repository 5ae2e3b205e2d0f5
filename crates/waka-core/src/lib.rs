//! Execution coordination: one run at a time, its output fanned out to every
//! connected client, its final status delivered exactly once.

mod error;
pub use error::CoreError;

mod connection;
pub use connection::{CloseReason, Connection, ConnectionId, DeliveryError};

mod runner;
pub use runner::{CommandRunner, RunnerError, StopSignal};

mod slot;
pub use slot::ExecutionSlot;

mod broadcast;
pub use broadcast::LogBroadcast;

mod completion;
pub use completion::CompletionRegistry;

mod coordinator;
pub use coordinator::ExecutionCoordinator;

mod token;
pub use token::{TokenAuthenticator, TokenError};

mod sync;

#[cfg(test)]
mod testing;
