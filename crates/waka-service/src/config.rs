use std::{path::PathBuf, time::Duration};

use clap::Parser;
use thiserror::Error;
use waka_exec::{RlimitConfig, ShellConfig};
use waka_model::{DEFAULT_PORT, SYSTEM_DIR_NAME};
use waka_observe::{LoggerConfig, LoggerFormat};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("port must be non-zero")]
    InvalidPort,
    #[error("host cannot be empty")]
    EmptyHost,
    #[error("shell cannot be empty")]
    EmptyShell,
    #[error("no system path given and no local data directory could be determined")]
    NoSystemPath,
    #[error("working directory {0} is not a directory")]
    InvalidWorkdir(PathBuf),
}

/// Command execution service.
#[derive(Debug, Clone, Parser)]
#[command(name = "wakad", version)]
pub struct ServiceConfig {
    /// Address to bind.
    #[arg(long, env = "WAKA_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "WAKA_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding the token file. Defaults to `<local data dir>/wakamiti`.
    #[arg(long, env = "WAKA_SYSTEM_PATH")]
    pub system_path: Option<PathBuf>,

    /// Log filter directives, e.g. `info` or `info,waka_core=debug`.
    #[arg(long, env = "WAKA_LOG", default_value = "info")]
    pub log_level: String,

    /// text | json | journald
    #[arg(long, env = "WAKA_LOG_FORMAT", default_value = "text")]
    pub log_format: LoggerFormat,

    /// Shell used as `<shell> -c <command>`.
    #[arg(long, env = "WAKA_SHELL", default_value = "sh")]
    pub shell: String,

    /// Delay between SIGTERM and SIGKILL when a run is stopped.
    #[arg(long, env = "WAKA_KILL_GRACE_MS", default_value_t = 5000)]
    pub kill_grace_ms: u64,

    /// Working directory for commands. Defaults to the service's own.
    #[arg(long, env = "WAKA_WORKDIR")]
    pub workdir: Option<PathBuf>,

    /// Extra environment for commands, `KEY=VALUE`. Repeatable.
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// RLIMIT_NOFILE for commands.
    #[arg(long, env = "WAKA_MAX_OPEN_FILES")]
    pub max_open_files: Option<u64>,

    /// RLIMIT_FSIZE for commands, in bytes.
    #[arg(long, env = "WAKA_MAX_FILE_SIZE")]
    pub max_file_size: Option<u64>,

    #[arg(long, env = "WAKA_DISABLE_CORE_DUMPS")]
    pub disable_core_dumps: bool,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.shell.trim().is_empty() {
            return Err(ConfigError::EmptyShell);
        }
        if let Some(dir) = &self.workdir {
            if !dir.is_dir() {
                return Err(ConfigError::InvalidWorkdir(dir.clone()));
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host.trim(), self.port)
    }

    pub fn system_dir(&self) -> Result<PathBuf, ConfigError> {
        self.system_path
            .clone()
            .or_else(|| dirs::data_local_dir().map(|d| d.join(SYSTEM_DIR_NAME)))
            .ok_or(ConfigError::NoSystemPath)
    }

    pub fn logger(&self) -> LoggerConfig {
        LoggerConfig {
            format: self.log_format,
            level: self.log_level.clone(),
            ..LoggerConfig::default()
        }
    }

    pub fn shell(&self) -> ShellConfig {
        ShellConfig {
            shell: self.shell.clone(),
            env: self.env.clone(),
            cwd: self.workdir.clone(),
            kill_grace: Duration::from_millis(self.kill_grace_ms),
            limits: RlimitConfig {
                max_open_files: self.max_open_files,
                max_file_size_bytes: self.max_file_size,
                disable_core_dumps: self.disable_core_dumps,
            },
        }
    }
}
