use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use alloy_primitives::Address;
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;

use super::{Failure, OperationState};
use crate::chain::{Receipt, TxHandle};
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Deposit,
    Withdraw,
    Purchase,
    /// Test-token faucet claim.
    Claim,
    RegisterMerchant,
    UpdateMerchant,
    ListItem,
    UpdateItem,
}

impl OperationKind {
    /// Used in user-facing text.
    pub fn noun(self) -> &'static str {
        match self {
            OperationKind::Deposit => "deposit",
            OperationKind::Withdraw => "withdrawal",
            OperationKind::Purchase => "purchase",
            OperationKind::Claim => "faucet claim",
            OperationKind::RegisterMerchant => "merchant registration",
            OperationKind::UpdateMerchant => "merchant update",
            OperationKind::ListItem => "item listing",
            OperationKind::UpdateItem => "item update",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Deposit => "deposit",
            OperationKind::Withdraw => "withdraw",
            OperationKind::Purchase => "purchase",
            OperationKind::Claim => "claim",
            OperationKind::RegisterMerchant => "register_merchant",
            OperationKind::UpdateMerchant => "update_merchant",
            OperationKind::ListItem => "list_item",
            OperationKind::UpdateItem => "update_item",
        };
        f.write_str(name)
    }
}

/// Amounts are kept as entered and parsed during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationParams {
    Deposit { asset: Address, amount: String },
    Withdraw { asset: Address, amount: String },
    Purchase { item_id: u64 },
    Claim,
    RegisterMerchant { name: String, description: String },
    UpdateMerchant { name: String, description: String },
    /// `price` is in deposit-token units, `required_yield` in reward units.
    ListItem {
        name: String,
        description: String,
        price: String,
        required_yield: String,
    },
    UpdateItem {
        item_id: u64,
        price: String,
        required_yield: String,
        is_active: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    pub account: Address,
    pub params: OperationParams,
}

impl OperationRequest {
    pub fn deposit(account: Address, asset: Address, amount: impl Into<String>) -> Self {
        Self {
            account,
            params: OperationParams::Deposit {
                asset,
                amount: amount.into(),
            },
        }
    }

    pub fn withdraw(account: Address, asset: Address, amount: impl Into<String>) -> Self {
        Self {
            account,
            params: OperationParams::Withdraw {
                asset,
                amount: amount.into(),
            },
        }
    }

    pub fn purchase(account: Address, item_id: u64) -> Self {
        Self {
            account,
            params: OperationParams::Purchase { item_id },
        }
    }

    pub fn claim(account: Address) -> Self {
        Self {
            account,
            params: OperationParams::Claim,
        }
    }

    pub fn register_merchant(
        account: Address,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            account,
            params: OperationParams::RegisterMerchant {
                name: name.into(),
                description: description.into(),
            },
        }
    }

    pub fn update_merchant(
        account: Address,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            account,
            params: OperationParams::UpdateMerchant {
                name: name.into(),
                description: description.into(),
            },
        }
    }

    pub fn list_item(
        account: Address,
        name: impl Into<String>,
        description: impl Into<String>,
        price: impl Into<String>,
        required_yield: impl Into<String>,
    ) -> Self {
        Self {
            account,
            params: OperationParams::ListItem {
                name: name.into(),
                description: description.into(),
                price: price.into(),
                required_yield: required_yield.into(),
            },
        }
    }

    pub fn update_item(
        account: Address,
        item_id: u64,
        price: impl Into<String>,
        required_yield: impl Into<String>,
        is_active: bool,
    ) -> Self {
        Self {
            account,
            params: OperationParams::UpdateItem {
                item_id,
                price: price.into(),
                required_yield: required_yield.into(),
                is_active,
            },
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self.params {
            OperationParams::Deposit { .. } => OperationKind::Deposit,
            OperationParams::Withdraw { .. } => OperationKind::Withdraw,
            OperationParams::Purchase { .. } => OperationKind::Purchase,
            OperationParams::Claim => OperationKind::Claim,
            OperationParams::RegisterMerchant { .. } => OperationKind::RegisterMerchant,
            OperationParams::UpdateMerchant { .. } => OperationKind::UpdateMerchant,
            OperationParams::ListItem { .. } => OperationKind::ListItem,
            OperationParams::UpdateItem { .. } => OperationKind::UpdateItem,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTx {
    pub method: &'static str,
    pub handle: TxHandle,
    pub receipt: Option<Receipt>,
}

/// Snapshot of an operation. Lives in memory only.
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: OperationId,
    pub request: OperationRequest,
    pub state: OperationState,
    /// One entry per submitted transaction, in submission order.
    pub transactions: Vec<SubmittedTx>,
    pub created_at: SystemTime,
    pub last_error: Option<Failure>,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        self.request.kind()
    }

    pub fn account(&self) -> Address {
        self.request.account
    }
}

#[derive(Default)]
struct Control {
    cancel_requested: bool,
    submitted: bool,
}

/// State shared between the driving task and every [`OperationHandle`].
pub(crate) struct OperationCell {
    operation: Mutex<Operation>,
    entered_at: Mutex<Instant>,
    state_tx: watch::Sender<OperationState>,
    // Lock order: control before operation.
    control: Mutex<Control>,
    cancel: Notify,
}

impl OperationCell {
    pub(crate) fn new(id: OperationId, request: OperationRequest) -> Self {
        let (state_tx, _) = watch::channel(OperationState::Idle);
        Self {
            operation: Mutex::new(Operation {
                id,
                request,
                state: OperationState::Idle,
                transactions: Vec::new(),
                created_at: SystemTime::now(),
                last_error: None,
            }),
            entered_at: Mutex::new(Instant::now()),
            state_tx,
            control: Mutex::new(Control::default()),
            cancel: Notify::new(),
        }
    }

    pub(crate) fn id(&self) -> OperationId {
        self.operation.lock().id
    }

    pub(crate) fn request(&self) -> OperationRequest {
        self.operation.lock().request.clone()
    }

    pub(crate) fn state(&self) -> OperationState {
        self.operation.lock().state
    }

    pub(crate) fn snapshot(&self) -> Operation {
        self.operation.lock().clone()
    }

    pub(crate) fn elapsed_in_state(&self) -> Duration {
        self.entered_at.lock().elapsed()
    }

    pub(crate) fn identity(&self) -> (OperationId, OperationKind, Address) {
        let operation = self.operation.lock();
        (operation.id, operation.kind(), operation.account())
    }

    /// Applies a transition and returns the previous state. Waiters only see
    /// it after [`OperationCell::publish`].
    pub(crate) fn apply(
        &self,
        to: OperationState,
        failure: Option<&Failure>,
    ) -> Result<OperationState, super::TransitionError> {
        let from = {
            let mut operation = self.operation.lock();
            let from = operation.state;
            operation.state.advance(to)?;
            if let Some(failure) = failure {
                operation.last_error = Some(failure.clone());
            }
            from
        };
        *self.entered_at.lock() = Instant::now();
        Ok(from)
    }

    pub(crate) fn publish(&self, state: OperationState) {
        self.state_tx.send_replace(state);
    }

    pub(crate) fn record_submission(&self, method: &'static str, handle: TxHandle) {
        self.operation.lock().transactions.push(SubmittedTx {
            method,
            handle,
            receipt: None,
        });
    }

    pub(crate) fn record_receipt(&self, receipt: &Receipt) {
        let mut operation = self.operation.lock();
        if let Some(tx) = operation
            .transactions
            .iter_mut()
            .find(|tx| tx.handle == receipt.transaction)
        {
            tx.receipt = Some(receipt.clone());
        }
    }

    /// Resolves once a cancel has been requested.
    pub(crate) async fn cancelled(&self) {
        self.cancel.notified().await
    }

    /// Marks the point of no return. False when a cancel got in first.
    pub(crate) fn begin_submission(&self) -> bool {
        let mut control = self.control.lock();
        if control.cancel_requested {
            return false;
        }
        control.submitted = true;
        true
    }
}

/// Caller-side view of a started operation.
#[derive(Clone)]
pub struct OperationHandle {
    cell: Arc<OperationCell>,
}

impl OperationHandle {
    pub(crate) fn new(cell: Arc<OperationCell>) -> Self {
        Self { cell }
    }

    pub fn id(&self) -> OperationId {
        self.cell.id()
    }

    pub fn state(&self) -> OperationState {
        self.cell.state()
    }

    pub fn snapshot(&self) -> Operation {
        self.cell.snapshot()
    }

    /// Time spent in the current state. Keeps growing while a receipt is
    /// outstanding; callers use it for "still waiting" messaging.
    pub fn elapsed_in_state(&self) -> Duration {
        self.cell.elapsed_in_state()
    }

    /// Discards the operation if nothing has been submitted yet.
    pub fn cancel(&self) -> Result<(), Error> {
        let mut control = self.cell.control.lock();
        let state = self.cell.state();
        if control.submitted || !state.is_cancellable() {
            return Err(Error::NotCancellable {
                id: self.cell.id(),
                state,
            });
        }
        control.cancel_requested = true;
        self.cell.cancel.notify_one();
        Ok(())
    }

    /// Waits for a terminal state and returns the final snapshot.
    pub async fn wait(&self) -> Operation {
        let mut states = self.cell.state_tx.subscribe();
        // The sender lives in the cell we hold, so the channel cannot close.
        let _ = states.wait_for(|state| state.is_terminal()).await;
        self.cell.snapshot()
    }
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}
