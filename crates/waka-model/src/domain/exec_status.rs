use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Exit status of a finished run.
///
/// `0` is success, anything else is a failure. [`ExecStatus::CANCELLED`] is
/// reserved for runs interrupted before the command produced its own code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecStatus(i32);

impl ExecStatus {
    pub const SUCCESS: ExecStatus = ExecStatus(0);
    /// Synthesised when the runner itself fails.
    pub const FAILURE: ExecStatus = ExecStatus(1);
    pub const CANCELLED: ExecStatus = ExecStatus(-1);

    #[inline]
    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    #[inline]
    pub const fn code(&self) -> i32 {
        self.0
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        *self == Self::CANCELLED
    }
}

impl From<i32> for ExecStatus {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl From<ExecStatus> for i32 {
    fn from(status: ExecStatus) -> Self {
        status.0
    }
}

/// Renders the bare integer; this is the text carried in close reasons.
impl fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExecStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i32>()
            .map(ExecStatus)
            .map_err(|_| ModelError::InvalidStatus(s.to_string()))
    }
}
