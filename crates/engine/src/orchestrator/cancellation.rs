use std::sync::Arc;

use parking_lot::Mutex;

use super::state::ResetPhase;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Default)]
struct CancelState {
    phase: ResetPhase,
    requested: bool,
}

/// Requests cancellation of one in-flight reset.
///
/// Requests are accepted until the reset leaves `AwaitingConfirmation` and
/// rejected with `CancellationRejected` from then on.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    state: Arc<Mutex<CancelState>>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) -> EngineResult<()> {
        let mut state = self.state.lock();
        if !state.phase.accepts_cancellation() {
            return Err(EngineError::CancellationRejected(state.phase));
        }
        state.requested = true;
        Ok(())
    }

    pub fn is_requested(&self) -> bool {
        self.state.lock().requested
    }

    /// Phase the reset is currently in
    pub fn phase(&self) -> ResetPhase {
        self.state.lock().phase
    }

    /// Move to `next` unless cancellation was requested. Checked and applied
    /// under one lock so a request cannot slip past the `Dropping` boundary.
    pub(crate) fn advance(&self, next: ResetPhase) -> bool {
        let mut state = self.state.lock();
        if state.requested {
            return false;
        }
        state.phase = next;
        true
    }

    pub(crate) fn settle(&self, terminal: ResetPhase) {
        self.state.lock().phase = terminal;
    }
}
