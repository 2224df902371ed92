use std::sync::atomic::{AtomicU8, Ordering};

use tracing::debug;

/// Shutdown-sequencing status shared by the UI shell and the gateway thread.
///
/// The discriminants carry the ordering: every transition except the final
/// `Terminated` write only ever increases the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    Idle = 0,
    Running = 1,
    StopFromServer = 2,
    StopFromClient = 10,
    Stopping = 20,
    Terminated = 30,
}

impl LifecycleState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::StopFromServer,
            10 => Self::StopFromClient,
            20 => Self::Stopping,
            _ => Self::Terminated,
        }
    }

    /// True once the gateway loop should wind down.
    pub fn is_stop_requested(self) -> bool {
        self >= Self::StopFromClient
    }
}

#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Idle as u8),
        }
    }

    pub fn current(&self) -> LifecycleState {
        LifecycleState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Moves forward to `to` unless the state is already at or past it.
    /// Returns the state observed before the call.
    pub fn advance(&self, to: LifecycleState) -> LifecycleState {
        let previous = LifecycleState::from_raw(self.state.fetch_max(to as u8, Ordering::AcqRel));
        if previous < to {
            debug!(from = ?previous, to = ?to, "lifecycle advanced");
        }
        previous
    }

    /// Compare-exchange from exactly `from` to `to`.
    pub fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        let swapped = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped {
            debug!(from = ?from, to = ?to, "lifecycle transitioned");
        }
        swapped
    }

    pub fn mark_terminated(&self) {
        self.state
            .store(LifecycleState::Terminated as u8, Ordering::Release);
        debug!("lifecycle terminated");
    }
}
