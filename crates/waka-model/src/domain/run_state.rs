use serde::{Deserialize, Serialize};

/// Per-run lifecycle: `Idle -> Running -> Completing -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// No run holds the slot; `execute` is accepted.
    Idle,
    /// The runner is executing; `stop` is meaningful.
    Running,
    /// The runner returned; status is being delivered and history cleared.
    Completing,
}

impl RunState {
    /// Compact form for storage in an atomic cell.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        match self {
            RunState::Idle => 0,
            RunState::Running => 1,
            RunState::Completing => 2,
        }
    }

    /// Inverse of [`RunState::as_u8`]. Unknown values read as `Idle`.
    #[inline]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => RunState::Running,
            2 => RunState::Completing,
            _ => RunState::Idle,
        }
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        matches!(self, RunState::Idle)
    }
}
