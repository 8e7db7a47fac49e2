//! Drives deposit, withdraw, purchase and faucet-claim operations through
//! validation, optional approval, the main transaction and balance settling.
//!
//! Every operation runs in its own task. Progress is published as
//! [`OperationEvent`]s on a broadcast channel and is also readable from the
//! [`OperationHandle`] returned by [`Orchestrator::start`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::Address;
use log::info;
use tokio::sync::broadcast;

mod backoff;
mod driver;
mod event;
mod failure;
mod lock;
mod operation;
mod state;

pub use backoff::BackoffPolicy;
pub use event::{EventBus, EventDetail, OperationEvent};
pub use failure::{Failure, FailureReason, REVERT_MARKER, Revert, Stage, classify_revert, revert_reason};
pub use operation::{
    Operation, OperationHandle, OperationId, OperationKind, OperationParams, OperationRequest,
    SubmittedTx,
};
pub use state::{OperationState, TransitionError};

use crate::approval::ApprovalGate;
use crate::asset::AssetRegistry;
use crate::balance::BalanceCache;
use crate::chain::ChainClient;
use crate::config::{Config, ConfigError, ContractsConfig, OrchestratorConfig};
use crate::error::Error;
use lock::InFlightLocks;
use operation::OperationCell;

pub(crate) struct Shared {
    chain: Arc<dyn ChainClient>,
    cache: Arc<BalanceCache>,
    gate: ApprovalGate,
    assets: AssetRegistry,
    contracts: ContractsConfig,
    settings: OrchestratorConfig,
    locks: InFlightLocks,
    events: EventBus,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Shared>,
}

impl Orchestrator {
    /// Fails when `config` does not pass [`Config::validate`].
    pub fn new(
        chain: Arc<dyn ChainClient>,
        cache: Arc<BalanceCache>,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Shared {
                gate: ApprovalGate::new(Arc::clone(&chain)),
                chain,
                cache,
                assets: config.assets.clone(),
                contracts: config.contracts.clone(),
                settings: config.orchestrator.clone(),
                locks: InFlightLocks::default(),
                events: EventBus::new(config.orchestrator.event_capacity),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.inner.events.subscribe()
    }

    pub fn cache(&self) -> &Arc<BalanceCache> {
        &self.inner.cache
    }

    pub fn assets(&self) -> &AssetRegistry {
        &self.inner.assets
    }

    /// True while a non-terminal operation of `kind` exists for `account`.
    pub fn is_in_flight(&self, account: Address, kind: OperationKind) -> bool {
        self.inner.locks.is_held(account, kind)
    }

    /// Starts an operation in a new task. Must be called from within a tokio
    /// runtime.
    ///
    /// Fails with [`Error::ConcurrentOperation`] when an operation of the same
    /// kind is still live for the account; the existing one is untouched.
    pub fn start(&self, request: OperationRequest) -> Result<OperationHandle, Error> {
        let account = request.account;
        let kind = request.kind();
        let guard = self
            .inner
            .locks
            .try_acquire(account, kind)
            .ok_or(Error::ConcurrentOperation { account, kind })?;

        let id = OperationId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        info!("Starting {} {} for {}", kind, id, account);

        let cell = Arc::new(OperationCell::new(id, request));
        let shared = Arc::clone(&self.inner);
        let task_cell = Arc::clone(&cell);
        tokio::spawn(async move { shared.drive(task_cell, guard).await });

        Ok(OperationHandle::new(cell))
    }
}
