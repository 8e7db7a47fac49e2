use std::time::{Duration, SystemTime};

use alloy_primitives::Address;
use log::trace;
use tokio::sync::broadcast;

use super::{Failure, OperationId, OperationKind, OperationState};
use crate::chain::TxHandle;

#[derive(Debug, Clone)]
pub enum EventDetail {
    Transition {
        from: OperationState,
        to: OperationState,
        /// Set on the transition into `Failed`.
        failure: Option<Failure>,
        transaction: Option<TxHandle>,
    },
    /// Emitted periodically while a receipt is outstanding. Not a transition.
    StillWaiting {
        state: OperationState,
        elapsed: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct OperationEvent {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub account: Address,
    pub timestamp: SystemTime,
    pub detail: EventDetail,
}

impl OperationEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self.detail, EventDetail::Transition { to, .. } if to.is_terminal())
    }
}

/// Fan-out of operation events. Slow subscribers may miss events
/// (`RecvError::Lagged`); the final state is always on the handle.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OperationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: OperationEvent) {
        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }
}
