use std::sync::atomic::{AtomicU8, Ordering};

use waka_model::RunState;

/// The single-execution guard.
///
/// Holds the current [`RunState`] in one atomic cell. Only the caller that
/// wins [`ExecutionSlot::try_claim`] may start a run, and only the completion
/// path of that run may [`release`](ExecutionSlot::release) it.
#[derive(Debug, Default)]
pub struct ExecutionSlot {
    state: AtomicU8,
}

impl ExecutionSlot {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(RunState::Idle.as_u8()),
        }
    }

    /// Atomically move `Idle -> Running`. Returns `false` if the slot is held.
    pub fn try_claim(&self) -> bool {
        self.state
            .compare_exchange(
                RunState::Idle.as_u8(),
                RunState::Running.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// `Running -> Completing`.
    pub(crate) fn begin_completion(&self) {
        self.state
            .store(RunState::Completing.as_u8(), Ordering::Release);
    }

    /// Back to `Idle`; the next `try_claim` may succeed.
    pub(crate) fn release(&self) {
        self.state.store(RunState::Idle.as_u8(), Ordering::Release);
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        !self.state().is_idle()
    }
}
