//! Client for the command execution service.

mod client;
pub use client::{Outcome, run};

mod config;
pub use config::CliConfig;

mod error;
pub use error::ClientError;
