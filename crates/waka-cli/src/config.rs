use std::path::PathBuf;

use clap::Parser;
use waka_model::{DEFAULT_PORT, EXEC_PATH, EXEC_STREAM_PATH, SYSTEM_DIR_NAME, TOKEN_FILE_NAME};

use crate::error::ClientError;

/// Run a command on a wakamiti service and stream its output.
///
/// Exits with the remote command's exit code.
#[derive(Debug, Clone, Parser)]
#[command(name = "waka", version)]
pub struct CliConfig {
    #[arg(long, env = "WAKA_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "WAKA_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Shared secret; takes precedence over `--token-file`.
    #[arg(long, env = "WAKA_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// File holding the shared secret. Defaults to the service's own token file.
    #[arg(long, env = "WAKA_TOKEN_FILE")]
    pub token_file: Option<PathBuf>,

    /// Command to run; the words are joined with single spaces.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl CliConfig {
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    pub fn exec_url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, EXEC_PATH)
    }

    pub fn stream_url(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.port, EXEC_STREAM_PATH)
    }

    pub fn resolve_token(&self) -> Result<String, ClientError> {
        if let Some(token) = self.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            return Ok(token.to_string());
        }

        let path = self
            .token_file
            .clone()
            .or_else(|| dirs::data_local_dir().map(|d| d.join(SYSTEM_DIR_NAME).join(TOKEN_FILE_NAME)))
            .ok_or(ClientError::NoToken)?;

        let raw = std::fs::read_to_string(&path)
            .map_err(|source| ClientError::TokenFile { path, source })?;
        let token = raw.trim();
        if token.is_empty() {
            return Err(ClientError::NoToken);
        }
        Ok(token.to_string())
    }
}
