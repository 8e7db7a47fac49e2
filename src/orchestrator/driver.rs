use std::sync::Arc;
use std::time::SystemTime;

use alloy_primitives::{Address, U256};
use log::{debug, error, info, warn};
use tokio::time::{Instant, interval_at, sleep_until};

use super::failure::Stage;
use super::lock::InFlightGuard;
use super::operation::OperationCell;
use super::{
    EventDetail, Failure, FailureReason, OperationEvent, OperationKind, OperationParams,
    OperationRequest, OperationState, Shared, TransitionError, revert_reason,
};
use crate::approval::AllowanceRequest;
use crate::asset::Asset;
use crate::chain::{ChainReads, Receipt, ReceiptStatus, TxHandle, WriteCall};
use crate::error::ChainError;

/// Why the driver stopped short of `Done`.
enum Halt {
    Failed(Failure),
    Cancelled,
    Broken(TransitionError),
}

impl From<Failure> for Halt {
    fn from(failure: Failure) -> Self {
        Halt::Failed(failure)
    }
}

impl From<TransitionError> for Halt {
    fn from(err: TransitionError) -> Self {
        Halt::Broken(err)
    }
}

struct ApprovalStep {
    asset: Address,
    spender: Address,
    amount: U256,
}

/// Everything validation decided; nothing here has touched the chain yet.
struct Plan {
    /// Asset spent, or received for claims. Merchant bookkeeping moves none.
    asset: Option<Asset>,
    amount: U256,
    approval: Option<ApprovalStep>,
    action: WriteCall,
    touched: Vec<Address>,
}

impl Plan {
    fn symbol(&self) -> &str {
        self.asset.as_ref().map_or("", |asset| asset.symbol.as_str())
    }

    fn bookkeeping(action: WriteCall) -> Self {
        Self {
            asset: None,
            amount: U256::ZERO,
            approval: None,
            action,
            touched: Vec::new(),
        }
    }
}

impl Shared {
    pub(super) async fn drive(&self, cell: Arc<OperationCell>, guard: InFlightGuard) {
        let result = self.run(&cell).await;

        let (to, failure) = match result {
            Ok(()) => (OperationState::Done, None),
            Err(Halt::Cancelled) => (OperationState::Cancelled, None),
            Err(Halt::Failed(failure)) => (OperationState::Failed, Some(failure)),
            Err(Halt::Broken(e)) => {
                error!("Operation {} hit an illegal transition: {}", cell.id(), e);
                let failure = Failure {
                    reason: FailureReason::ChainError,
                    message: "Something went wrong while tracking this transaction.".into(),
                    raw: Some(e.to_string()),
                };
                (OperationState::Failed, Some(failure))
            }
        };

        // The terminal state is applied while the lock is still held, and
        // announced only once it is released: a waiter woken by it can start
        // the next operation of this kind.
        let applied = cell.apply(to, failure.as_ref());
        drop(guard);
        match applied {
            Ok(from) => self.announce(&cell, from, to, failure, None),
            Err(e) => error!("Operation {} could not finish as {}: {}", cell.id(), to, e),
        }
    }

    async fn run(&self, cell: &OperationCell) -> Result<(), Halt> {
        let request = cell.request();
        let account = request.account;
        let kind = request.kind();

        self.transition(cell, OperationState::Validating, None, None)?;

        let plan = tokio::select! {
            biased;
            _ = cell.cancelled() => return Err(Halt::Cancelled),
            plan = self.validate(&request) => plan?,
        };

        if !cell.begin_submission() {
            return Err(Halt::Cancelled);
        }

        if let Some(step) = &plan.approval {
            self.approve(cell, account, kind, &plan, step).await?;
        }

        self.transition(cell, OperationState::ActionPending, None, None)?;
        let handle = self
            .chain
            .submit_transaction(account, &plan.action)
            .await
            .map_err(|e| Failure::submission(kind, Stage::Action, &e, plan.symbol()))?;
        cell.record_submission(plan.action.method(), handle);
        info!("Submitted {} for {} as {}", plan.action.method(), account, handle);

        let receipt = self
            .await_receipt(cell, handle)
            .await
            .map_err(|e| Failure::chain(&e))?;
        if let ReceiptStatus::Reverted { message } = &receipt.status {
            return Err(Failure::reverted(kind, Stage::Action, message, plan.symbol()).into());
        }
        self.transition(cell, OperationState::ActionConfirmed, None, Some(handle))?;

        self.record_expected(account, &plan);
        self.transition(cell, OperationState::Settling, None, None)?;
        self.settle(account, plan.touched).await;

        Ok(())
    }

    async fn approve(
        &self,
        cell: &OperationCell,
        account: Address,
        kind: OperationKind,
        plan: &Plan,
        step: &ApprovalStep,
    ) -> Result<(), Halt> {
        let symbol = plan.symbol();
        self.transition(cell, OperationState::ApprovalPending, None, None)?;

        let request = if self.settings.unlimited_approval {
            AllowanceRequest::Unlimited
        } else {
            AllowanceRequest::Exact(step.amount)
        };
        let pending = self
            .gate
            .issue_approval(account, step.asset, step.spender, request)
            .await
            .map_err(|e| Failure::submission(kind, Stage::Approval, &e, symbol))?;
        cell.record_submission("approve", pending.handle);

        let receipt = self
            .await_receipt(cell, pending.handle)
            .await
            .map_err(|e| Failure::chain(&e))?;
        if let ReceiptStatus::Reverted { message } = &receipt.status {
            return Err(Failure::reverted(kind, Stage::Approval, message, symbol).into());
        }
        self.transition(
            cell,
            OperationState::ApprovalConfirmed,
            None,
            Some(pending.handle),
        )?;
        drop(pending);

        self.await_allowance(account, step).await;
        Ok(())
    }

    /// Re-reads the allowance after each grace delay until the node reports
    /// it. Gives up silently; a revert on the main action is classified.
    async fn await_allowance(&self, account: Address, step: &ApprovalStep) {
        let mut delays = self.settings.approval_grace.delays();
        loop {
            match self
                .gate
                .current_allowance(account, step.asset, step.spender)
                .await
            {
                Ok(allowance) if allowance >= step.amount => return,
                Ok(allowance) => debug!("Allowance for {} still {}", account, allowance),
                Err(e) => debug!("Allowance re-check failed for {}: {}", account, e),
            }
            let Some(delay) = delays.next() else {
                break;
            };
            tokio::time::sleep(delay).await;
        }
        warn!(
            "Allowance for {} on {} not visible after grace period, submitting anyway",
            account, step.asset
        );
    }

    /// Waits for a receipt without ever giving up, emitting a notice each
    /// soft timeout.
    async fn await_receipt(
        &self,
        cell: &OperationCell,
        handle: TxHandle,
    ) -> Result<Receipt, ChainError> {
        let period = self.settings.soft_timeout();
        let mut reminders = interval_at(Instant::now() + period, period);
        let mut receipt = self.chain.await_receipt(handle);

        let result = loop {
            tokio::select! {
                result = &mut receipt => break result,
                _ = reminders.tick() => {
                    let state = cell.state();
                    let elapsed = cell.elapsed_in_state();
                    warn!("Operation {} still {} after {:?} ({})", cell.id(), state, elapsed, handle);
                    self.emit(cell, EventDetail::StillWaiting { state, elapsed });
                }
            }
        };

        if let Ok(receipt) = &result {
            cell.record_receipt(receipt);
        }
        result
    }

    /// Shows the expected post-transaction balance until settling reads the
    /// real one.
    fn record_expected(&self, account: Address, plan: &Plan) {
        let Some(asset) = plan.asset.as_ref().map(|asset| asset.address) else {
            return;
        };
        let Some(current) = self.cache.get(account, asset) else {
            return;
        };
        let expected = match plan.action {
            WriteCall::ClaimTokens { .. } => current.saturating_add(plan.amount),
            _ => current.saturating_sub(plan.amount),
        };
        self.cache.record_optimistic(account, asset, expected);
    }

    /// Runs the first scheduled refresh and leaves the rest to a background
    /// task that only updates the cache.
    async fn settle(&self, account: Address, touched: Vec<Address>) {
        if touched.is_empty() {
            return;
        }
        let started = Instant::now();
        let mut schedule = self.settings.settle_schedule().into_iter();

        let first = schedule.next().unwrap_or_default();
        sleep_until(started + first).await;
        let report = self.cache.refresh(account, &touched).await;
        if !report.is_complete() {
            warn!(
                "{} of {} balances for {} unavailable after settling",
                report.failures.len(),
                touched.len(),
                account
            );
        }

        let later: Vec<_> = schedule.collect();
        if later.is_empty() {
            return;
        }
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            for offset in later {
                sleep_until(started + offset).await;
                let report = cache.refresh(account, &touched).await;
                debug!(
                    "Settling refresh for {} at +{:?}: {} ok, {} failed",
                    account,
                    offset,
                    report.values.len(),
                    report.failures.len()
                );
            }
        });
    }

    async fn validate(&self, request: &OperationRequest) -> Result<Plan, Failure> {
        let account = request.account;

        match &request.params {
            OperationParams::Deposit { asset, amount } => {
                let asset = self.supported(*asset, &self.assets.deposit, OperationKind::Deposit)?;
                let amount = parse_amount(asset, amount)?;
                self.ensure_balance(account, asset, amount).await?;

                let vault = self.contracts.vault;
                let approval = self
                    .gate
                    .needs_approval(account, asset.address, vault, amount)
                    .await
                    .then_some(ApprovalStep {
                        asset: asset.address,
                        spender: vault,
                        amount,
                    });

                Ok(Plan {
                    asset: Some(asset.clone()),
                    amount,
                    approval,
                    action: WriteCall::Deposit { vault, amount },
                    touched: self.assets.addresses(),
                })
            }
            OperationParams::Withdraw { asset, amount } => {
                let asset =
                    self.supported(*asset, &self.assets.principal, OperationKind::Withdraw)?;
                let amount = parse_amount(asset, amount)?;
                self.ensure_balance(account, asset, amount).await?;

                Ok(Plan {
                    asset: Some(asset.clone()),
                    amount,
                    approval: None,
                    action: WriteCall::Withdraw {
                        vault: self.contracts.vault,
                        amount,
                    },
                    touched: self.assets.addresses(),
                })
            }
            OperationParams::Purchase { item_id } => {
                let item_id = *item_id;
                let reward = &self.assets.reward;
                let merchant = self.contracts.merchant;

                let item = match self.chain.item_info(merchant, item_id).await {
                    Ok(item) => item,
                    Err(e) if revert_reason(&e.raw()).is_some() => {
                        return Err(Failure::invalid_input(format!(
                            "Item {item_id} does not exist."
                        )));
                    }
                    Err(e) => return Err(Failure::chain(&e)),
                };
                if !item.is_active {
                    return Err(Failure::invalid_input(
                        "This item is no longer available for purchase.",
                    ));
                }
                self.ensure_balance(account, reward, item.required_yield.max(item.price))
                    .await?;

                let eligible = self
                    .chain
                    .is_eligible_for_purchase(merchant, account, item_id)
                    .await
                    .map_err(|e| Failure::chain(&e))?;
                if !eligible {
                    return Err(Failure::invalid_input(format!(
                        "You don't have enough {} to purchase {}.",
                        reward.symbol, item.name
                    )));
                }

                Ok(Plan {
                    asset: Some(reward.clone()),
                    amount: item.price,
                    approval: None,
                    action: WriteCall::PurchaseItem { merchant, item_id },
                    touched: vec![reward.address],
                })
            }
            OperationParams::Claim => {
                let deposit = &self.assets.deposit;
                let faucet = self.contracts.faucet;
                let claimable = self
                    .chain
                    .claimable_amount(faucet, account)
                    .await
                    .map_err(|e| Failure::chain(&e))?;
                if claimable.is_zero() {
                    return Err(Failure::invalid_input(
                        "Nothing to claim yet. The faucet allows one claim every 24 hours.",
                    ));
                }

                Ok(Plan {
                    asset: Some(deposit.clone()),
                    amount: claimable,
                    approval: None,
                    action: WriteCall::ClaimTokens { faucet },
                    touched: vec![deposit.address],
                })
            }
            OperationParams::RegisterMerchant { name, description } => {
                let name = required_name(name, "your merchant account")?;
                if self.merchant_status(account).await? {
                    return Err(Failure::invalid_input(
                        "This address is already registered as a merchant.",
                    ));
                }
                Ok(Plan::bookkeeping(WriteCall::RegisterMerchant {
                    merchant: self.contracts.merchant,
                    name,
                    description: description.trim().to_string(),
                }))
            }
            OperationParams::UpdateMerchant { name, description } => {
                let name = required_name(name, "your merchant account")?;
                self.ensure_merchant(account, "update your information")
                    .await?;
                Ok(Plan::bookkeeping(WriteCall::UpdateMerchant {
                    merchant: self.contracts.merchant,
                    name,
                    description: description.trim().to_string(),
                }))
            }
            OperationParams::ListItem {
                name,
                description,
                price,
                required_yield,
            } => {
                let name = required_name(name, "the item")?;
                let price = parse_price(&self.assets.deposit, price)?;
                let required_yield = parse_price(&self.assets.reward, required_yield)?;
                self.ensure_merchant(account, "list items").await?;
                Ok(Plan::bookkeeping(WriteCall::ListItem {
                    merchant: self.contracts.merchant,
                    name,
                    description: description.trim().to_string(),
                    price,
                    required_yield,
                }))
            }
            OperationParams::UpdateItem {
                item_id,
                price,
                required_yield,
                is_active,
            } => {
                let item_id = *item_id;
                let merchant = self.contracts.merchant;
                let price = parse_price(&self.assets.deposit, price)?;
                let required_yield = parse_price(&self.assets.reward, required_yield)?;
                self.ensure_merchant(account, "update items").await?;

                let item = match self.chain.item_info(merchant, item_id).await {
                    Ok(item) => item,
                    Err(e) if revert_reason(&e.raw()).is_some() => {
                        return Err(Failure::invalid_input(format!(
                            "Item {item_id} does not exist."
                        )));
                    }
                    Err(e) => return Err(Failure::chain(&e)),
                };
                if item.merchant != account {
                    return Err(Failure::invalid_input(
                        "You can only update items you listed.",
                    ));
                }

                Ok(Plan::bookkeeping(WriteCall::UpdateItem {
                    merchant,
                    item_id,
                    price,
                    required_yield,
                    is_active: *is_active,
                }))
            }
        }
    }

    async fn merchant_status(&self, account: Address) -> Result<bool, Failure> {
        self.chain
            .merchant_info(self.contracts.merchant, account)
            .await
            .map(|info| info.is_registered)
            .map_err(|e| Failure::chain(&e))
    }

    async fn ensure_merchant(&self, account: Address, action: &str) -> Result<(), Failure> {
        if self.merchant_status(account).await? {
            return Ok(());
        }
        Err(Failure::invalid_input(format!(
            "You need to be registered as a merchant to {action}."
        )))
    }

    fn supported<'a>(
        &'a self,
        requested: Address,
        expected: &'a Asset,
        kind: OperationKind,
    ) -> Result<&'a Asset, Failure> {
        if requested == expected.address {
            return Ok(expected);
        }
        let name = self
            .assets
            .get(requested)
            .map(|asset| asset.symbol.clone())
            .unwrap_or_else(|| requested.to_string());
        Err(Failure::invalid_input(format!(
            "{name} cannot be used for a {}.",
            kind.noun()
        )))
    }

    /// Rejects only when the balance is known to be short. A cached value
    /// that looks short is confirmed with a direct read first; an unknown
    /// balance lets the operation through and the chain decides.
    async fn ensure_balance(
        &self,
        account: Address,
        asset: &Asset,
        amount: U256,
    ) -> Result<(), Failure> {
        if self
            .cache
            .get(account, asset.address)
            .is_some_and(|cached| cached >= amount)
        {
            return Ok(());
        }

        match self.chain.balance_of(asset.address, account).await {
            Ok(balance) if balance < amount => Err(Failure::invalid_input(format!(
                "Insufficient {} balance: {} available, {} required.",
                asset.symbol,
                asset.format_units(balance),
                asset.format_units(amount)
            ))),
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(
                    "{} balance of {} unknown ({}), continuing",
                    asset.symbol, account, e
                );
                Ok(())
            }
        }
    }

    fn transition(
        &self,
        cell: &OperationCell,
        to: OperationState,
        failure: Option<Failure>,
        transaction: Option<TxHandle>,
    ) -> Result<(), TransitionError> {
        let from = cell.apply(to, failure.as_ref())?;
        self.announce(cell, from, to, failure, transaction);
        Ok(())
    }

    /// Logs and emits an applied transition, then wakes waiters.
    fn announce(
        &self,
        cell: &OperationCell,
        from: OperationState,
        to: OperationState,
        failure: Option<Failure>,
        transaction: Option<TxHandle>,
    ) {
        let (id, kind, account) = cell.identity();

        match &failure {
            Some(failure) => warn!(
                "{} {} for {} failed in {}: {} ({})",
                kind,
                id,
                account,
                from,
                failure.reason,
                failure.raw.as_deref().unwrap_or("-")
            ),
            None => info!("{} {} for {}: {} -> {}", kind, id, account, from, to),
        }

        self.emit(
            cell,
            EventDetail::Transition {
                from,
                to,
                failure,
                transaction,
            },
        );
        cell.publish(to);
    }

    fn emit(&self, cell: &OperationCell, detail: EventDetail) {
        let (operation_id, kind, account) = cell.identity();
        self.events.emit(OperationEvent {
            operation_id,
            kind,
            account,
            timestamp: SystemTime::now(),
            detail,
        });
    }
}

fn parse_amount(asset: &Asset, input: &str) -> Result<U256, Failure> {
    asset
        .parse_units(input)
        .map_err(|e| Failure::invalid_input(format!("Please enter a valid amount: {e}")))
}

fn parse_price(asset: &Asset, input: &str) -> Result<U256, Failure> {
    asset.parse_units(input).map_err(|e| {
        Failure::invalid_input(format!("Please enter a valid {} price: {e}", asset.symbol))
    })
}

fn required_name(input: &str, subject: &str) -> Result<String, Failure> {
    let name = input.trim();
    if name.is_empty() {
        return Err(Failure::invalid_input(format!(
            "Name required. Please enter a name for {subject}."
        )));
    }
    Ok(name.to_string())
}
