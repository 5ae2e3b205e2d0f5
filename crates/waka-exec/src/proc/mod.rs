use std::{path::PathBuf, time::Duration};

use crate::utils::limits::RlimitConfig;

/// How commands are launched.
#[derive(Clone, Debug)]
pub struct ShellConfig {
    /// Interpreter invoked as `<shell> -c <command>` (ignored on Windows, which uses `cmd /C`).
    pub shell: String,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Time between SIGTERM and SIGKILL when a run is stopped.
    pub kill_grace: Duration,
    pub limits: RlimitConfig,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            env: Vec::new(),
            cwd: None,
            kill_grace: Duration::from_secs(5),
            limits: RlimitConfig::default(),
        }
    }
}

#[cfg(feature = "shell")]
pub mod shell;
