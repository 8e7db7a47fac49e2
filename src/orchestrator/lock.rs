use std::collections::HashSet;
use std::sync::Arc;

use alloy_primitives::Address;
use parking_lot::Mutex;

use super::OperationKind;

type LockKey = (Address, OperationKind);

/// At most one live operation per (account, kind).
#[derive(Clone, Default)]
pub(crate) struct InFlightLocks {
    held: Arc<Mutex<HashSet<LockKey>>>,
}

impl InFlightLocks {
    pub(crate) fn try_acquire(&self, account: Address, kind: OperationKind) -> Option<InFlightGuard> {
        let key = (account, kind);
        if !self.held.lock().insert(key) {
            return None;
        }
        Some(InFlightGuard {
            held: Arc::clone(&self.held),
            key,
        })
    }

    pub(crate) fn is_held(&self, account: Address, kind: OperationKind) -> bool {
        self.held.lock().contains(&(account, kind))
    }
}

pub(crate) struct InFlightGuard {
    held: Arc<Mutex<HashSet<LockKey>>>,
    key: LockKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.held.lock().remove(&self.key);
    }
}
