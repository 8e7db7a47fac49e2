use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::chain::{ChainClient, ChainReads, TxHandle, WriteCall};
use crate::error::ChainError;

type GateKey = (Address, Address, Address);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowanceRequest {
    /// `U256::MAX`. The spender may move any amount of the asset from then on;
    /// one approval covers every later operation.
    Unlimited,
    Exact(U256),
}

impl AllowanceRequest {
    pub fn amount(self) -> U256 {
        match self {
            AllowanceRequest::Unlimited => U256::MAX,
            AllowanceRequest::Exact(amount) => amount,
        }
    }
}

/// A submitted approval. Holds the per-(account, asset, spender) slot until
/// dropped, so a second approval for the same key waits for this one.
pub struct PendingApproval {
    pub handle: TxHandle,
    pub amount: U256,
    _slot: OwnedMutexGuard<()>,
}

pub struct ApprovalGate {
    chain: Arc<dyn ChainClient>,
    slots: Mutex<HashMap<GateKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ApprovalGate {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self {
            chain,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Always a fresh read; allowances change out of band.
    pub async fn current_allowance(
        &self,
        account: Address,
        asset: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        self.chain.allowance(asset, account, spender).await
    }

    /// True when the allowance is below `amount` or cannot be read.
    pub async fn needs_approval(
        &self,
        account: Address,
        asset: Address,
        spender: Address,
        amount: U256,
    ) -> bool {
        match self.current_allowance(account, asset, spender).await {
            Ok(allowance) => {
                debug!(
                    "Allowance of {} for {} on {}: {} (need {})",
                    account, spender, asset, allowance, amount
                );
                allowance < amount
            }
            Err(e) => {
                warn!("Allowance read failed for {}, assuming approval needed: {}", account, e);
                true
            }
        }
    }

    pub async fn issue_approval(
        &self,
        account: Address,
        asset: Address,
        spender: Address,
        request: AllowanceRequest,
    ) -> Result<PendingApproval, ChainError> {
        let slot = self.slot((account, asset, spender));
        let guard = slot.lock_owned().await;

        let amount = request.amount();
        if request == AllowanceRequest::Unlimited {
            info!("Requesting unlimited allowance for {} on {} from {}", spender, asset, account);
        }
        let call = WriteCall::Approve {
            token: asset,
            spender,
            amount,
        };
        let handle = self.chain.submit_transaction(account, &call).await?;

        Ok(PendingApproval {
            handle,
            amount,
            _slot: guard,
        })
    }

    fn slot(&self, key: GateKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut slots = self.slots.lock();
        // Drop slots nobody holds or waits on.
        slots.retain(|k, slot| *k == key || Arc::strong_count(slot) > 1);
        Arc::clone(slots.entry(key).or_default())
    }
}
