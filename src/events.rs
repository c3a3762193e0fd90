//! Run progress events and the multi-subscriber event bus.
//!
//! The orchestrator publishes to channels rather than invoking a caller
//! callback mid-mutation: a subscriber that falls behind or drops its
//! receiver can never abort the run. Subscribers receive read-only
//! snapshots and feed external concerns (UI transport, persistence).

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::state::Phase;

/// Events emitted while a case run progresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A run (or whole-run retry) was accepted and is about to drive
    /// phases. Always the first event of a run.
    RunStarted { case_id: String, phase: Phase },
    /// The run moved along a declared edge (or the force-fail escape hatch).
    PhaseChanged {
        case_id: String,
        from: Phase,
        to: Phase,
    },
    /// A result slot was written.
    SlotUpdated {
        case_id: String,
        phase: Phase,
        unit_label: String,
        success: bool,
    },
    /// The run reached a terminal phase.
    RunFinished { case_id: String, phase: Phase },
}

/// Fan-out publisher for `RunEvent`s.
#[derive(Default)]
pub struct EventBus {
    senders: Mutex<Vec<mpsc::UnboundedSender<RunEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new subscriber. Dropping the receiver detaches it.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<RunEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock_senders().push(tx);
        rx
    }

    /// Publish to every live subscriber; closed channels are pruned.
    pub fn publish(&self, event: RunEvent) {
        self.lock_senders()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_senders().len()
    }

    fn lock_senders(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<RunEvent>>> {
        // Publishing never panics while holding the lock, but recover anyway.
        match self.senders.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
