//! Deterministic in-memory stand-in for the vault, merchant, faucet and token
//! contracts. Transactions execute when submitted; receipts are returned
//! immediately unless held. Fault injection hooks let tests script reverts,
//! wallet rejections, failing reads and receipts that never arrive.

use std::collections::{HashMap, HashSet};

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;

use super::{
    ChainClient, ItemInfo, MerchantInfo, PurchaseInfo, ReadCall, ReadValue, Receipt,
    ReceiptStatus, TxHandle, UserInfo, WriteCall,
};
use crate::asset::AssetRegistry;
use crate::config::{Config, ContractsConfig};
use crate::error::ChainError;

const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
const BPS_DENOMINATOR: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct SimSettings {
    /// Reward tokens minted per deposit, in basis points of the deposit.
    pub reward_bps: u64,
    pub faucet_amount: U256,
    pub claim_cooldown_secs: u64,
    pub withdrawal_lock_secs: u64,
    pub block_time_secs: u64,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            reward_bps: 500,
            faucet_amount: U256::from(1_000_000_000u64),
            claim_cooldown_secs: 24 * 60 * 60,
            withdrawal_lock_secs: 0,
            block_time_secs: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallRecord {
    Read(ReadCall),
    Submit { from: Address, call: WriteCall },
    Receipt(TxHandle),
}

#[derive(Default)]
struct Faults {
    failing_reads: HashSet<&'static str>,
    held_receipts: HashSet<&'static str>,
    failing_receipts: HashSet<&'static str>,
    reverts: HashMap<&'static str, String>,
    rejections: HashMap<&'static str, String>,
    stale_allowance_reads: usize,
}

struct Ledger {
    balances: HashMap<(Address, Address), U256>,
    allowances: HashMap<(Address, Address, Address), U256>,
    users: HashMap<Address, UserInfo>,
    merchants: HashMap<Address, MerchantInfo>,
    items: Vec<ItemInfo>,
    purchases: Vec<PurchaseInfo>,
    last_claim: HashMap<Address, u64>,
    receipts: HashMap<TxHandle, (&'static str, Receipt)>,
    block: u64,
    timestamp: u64,
    nonce: u64,
}

impl Ledger {
    fn new() -> Self {
        Self {
            balances: HashMap::new(),
            allowances: HashMap::new(),
            users: HashMap::new(),
            merchants: HashMap::new(),
            items: Vec::new(),
            purchases: Vec::new(),
            last_claim: HashMap::new(),
            receipts: HashMap::new(),
            block: 1,
            timestamp: GENESIS_TIMESTAMP,
            nonce: 0,
        }
    }

    fn balance(&self, token: Address, owner: Address) -> U256 {
        self.balances
            .get(&(token, owner))
            .copied()
            .unwrap_or_default()
    }

    fn credit(&mut self, token: Address, owner: Address, amount: U256) {
        let balance = self.balances.entry((token, owner)).or_default();
        *balance = balance.saturating_add(amount);
    }

    fn debit(&mut self, token: Address, owner: Address, amount: U256) -> Result<(), &'static str> {
        let balance = self.balances.entry((token, owner)).or_default();
        if *balance < amount {
            return Err("InsufficientBalance");
        }
        *balance -= amount;
        Ok(())
    }

    fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
    }

    fn item(&self, item_id: u64) -> Option<&ItemInfo> {
        let index = usize::try_from(item_id.checked_sub(1)?).ok()?;
        self.items.get(index)
    }

    fn item_mut(&mut self, item_id: u64) -> Option<&mut ItemInfo> {
        let index = usize::try_from(item_id.checked_sub(1)?).ok()?;
        self.items.get_mut(index)
    }

    fn is_merchant(&self, account: Address) -> bool {
        self.merchants
            .get(&account)
            .is_some_and(|merchant| merchant.is_registered)
    }

    /// Item ids start at 1.
    fn push_item(
        &mut self,
        merchant: Address,
        name: &str,
        description: &str,
        price: U256,
        required_yield: U256,
        is_active: bool,
    ) -> u64 {
        let id = self.items.len() as u64 + 1;
        self.items.push(ItemInfo {
            id,
            merchant,
            name: name.to_string(),
            description: description.to_string(),
            price,
            required_yield,
            is_active,
        });
        id
    }
}

pub struct SimChain {
    contracts: ContractsConfig,
    assets: AssetRegistry,
    settings: SimSettings,
    ledger: Mutex<Ledger>,
    faults: Mutex<Faults>,
    calls: Mutex<Vec<CallRecord>>,
}

impl SimChain {
    pub fn new(contracts: ContractsConfig, assets: AssetRegistry, settings: SimSettings) -> Self {
        Self {
            contracts,
            assets,
            settings,
            ledger: Mutex::new(Ledger::new()),
            faults: Mutex::new(Faults::default()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.contracts.clone(),
            config.assets.clone(),
            SimSettings::default(),
        )
    }

    /// Registers a demo merchant with a small catalog; item 3 is inactive.
    pub fn with_demo_catalog(self, merchant: Address) -> Self {
        self.register_merchant(merchant, "Kopi Kenangan", "Coffee and snacks");
        self.add_item(merchant, "Iced Latte", "Large iced latte", 5, true);
        self.add_item(merchant, "Wireless Earbuds", "Noise cancelling", 40, true);
        self.add_item(merchant, "Gift Card", "Discontinued", 10, false);
        self
    }

    pub fn settings(&self) -> &SimSettings {
        &self.settings
    }

    pub fn mint(&self, token: Address, owner: Address, amount: U256) {
        self.ledger.lock().credit(token, owner, amount);
    }

    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.ledger
            .lock()
            .allowances
            .insert((token, owner, spender), amount);
    }

    /// Direct ledger inspection; not recorded as a chain call.
    pub fn balance(&self, token: Address, owner: Address) -> U256 {
        self.ledger.lock().balance(token, owner)
    }

    pub fn register_merchant(&self, merchant: Address, name: &str, description: &str) {
        self.ledger.lock().merchants.insert(
            merchant,
            MerchantInfo {
                is_registered: true,
                name: name.to_string(),
                description: description.to_string(),
                ..Default::default()
            },
        );
    }

    /// Adds an item priced in whole reward tokens. Returns its id.
    pub fn add_item(
        &self,
        merchant: Address,
        name: &str,
        description: &str,
        price_whole: u64,
        is_active: bool,
    ) -> u64 {
        let unit = U256::from(10u8).pow(U256::from(self.assets.reward.decimals));
        let price = U256::from(price_whole) * unit;
        self.ledger
            .lock()
            .push_item(merchant, name, description, price, price, is_active)
    }

    pub fn advance_time(&self, secs: u64) {
        self.ledger.lock().timestamp += secs;
    }

    pub fn fail_reads(&self, method: &'static str) {
        self.faults.lock().failing_reads.insert(method);
    }

    pub fn restore_reads(&self, method: &'static str) {
        self.faults.lock().failing_reads.remove(method);
    }

    /// Receipts for `method` never resolve.
    pub fn hold_receipts(&self, method: &'static str) {
        self.faults.lock().held_receipts.insert(method);
    }

    /// Receipt lookups for `method` fail at the RPC layer. The transaction
    /// itself still executes.
    pub fn fail_receipts(&self, method: &'static str) {
        self.faults.lock().failing_receipts.insert(method);
    }

    /// The next `method` transaction is included but reverts with `message`.
    pub fn revert_next(&self, method: &'static str, message: &str) {
        self.faults
            .lock()
            .reverts
            .insert(method, message.to_string());
    }

    /// The next `method` submission fails before reaching the chain.
    pub fn reject_next(&self, method: &'static str, message: &str) {
        self.faults
            .lock()
            .rejections
            .insert(method, message.to_string());
    }

    /// The next `count` allowance reads report zero, like a lagging node.
    pub fn stale_allowance_reads(&self, count: usize) {
        self.faults.lock().stale_allowance_reads = count;
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().clone()
    }

    pub fn submitted_methods(&self) -> Vec<&'static str> {
        self.calls
            .lock()
            .iter()
            .filter_map(|record| match record {
                CallRecord::Submit { call, .. } => Some(call.method()),
                _ => None,
            })
            .collect()
    }

    pub fn read_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|record| matches!(record, CallRecord::Read(call) if call.method() == method))
            .count()
    }

    fn record(&self, record: CallRecord) {
        self.calls.lock().push(record);
    }

    fn evaluate(&self, call: &ReadCall) -> Result<ReadValue, ChainError> {
        let ledger = self.ledger.lock();
        let value = match call {
            ReadCall::BalanceOf { token, owner } => ReadValue::Quantity(ledger.balance(*token, *owner)),
            ReadCall::Allowance {
                token,
                owner,
                spender,
            } => {
                let mut faults = self.faults.lock();
                if faults.stale_allowance_reads > 0 {
                    faults.stale_allowance_reads -= 1;
                    ReadValue::Quantity(U256::ZERO)
                } else {
                    ReadValue::Quantity(ledger.allowance(*token, *owner, *spender))
                }
            }
            ReadCall::UserInfo { account, .. } => {
                ReadValue::User(ledger.users.get(account).cloned().unwrap_or_default())
            }
            ReadCall::ItemCount { .. } => ReadValue::Count(ledger.items.len() as u64),
            ReadCall::ItemInfo { item_id, .. } => ReadValue::Item(
                ledger
                    .item(*item_id)
                    .cloned()
                    .ok_or_else(|| ChainError::Rpc("execution reverted: InvalidItem()".into()))?,
            ),
            ReadCall::PurchaseCount { .. } => ReadValue::Count(ledger.purchases.len() as u64),
            ReadCall::PurchaseInfo { purchase_id, .. } => {
                let index = purchase_id.checked_sub(1).map(|i| i as usize);
                ReadValue::Purchase(
                    index
                        .and_then(|i| ledger.purchases.get(i))
                        .cloned()
                        .ok_or_else(|| {
                            ChainError::Rpc("execution reverted: InvalidPurchase()".into())
                        })?,
                )
            }
            ReadCall::MerchantInfo { account, .. } => {
                ReadValue::Merchant(ledger.merchants.get(account).cloned().unwrap_or_default())
            }
            ReadCall::IsEligibleForPurchase { buyer, item_id, .. } => {
                let eligible = ledger.item(*item_id).is_some_and(|item| {
                    item.is_active
                        && ledger.balance(self.assets.reward.address, *buyer) >= item.required_yield
                });
                ReadValue::Flag(eligible)
            }
            ReadCall::ClaimableAmount { account, .. } => {
                if self.claim_ready(&ledger, *account) {
                    ReadValue::Quantity(self.settings.faucet_amount)
                } else {
                    ReadValue::Quantity(U256::ZERO)
                }
            }
        };
        Ok(value)
    }

    fn claim_ready(&self, ledger: &Ledger, account: Address) -> bool {
        match ledger.last_claim.get(&account) {
            Some(last) => ledger.timestamp >= last + self.settings.claim_cooldown_secs,
            None => true,
        }
    }

    fn execute(
        &self,
        ledger: &mut Ledger,
        from: Address,
        call: &WriteCall,
    ) -> Result<(), &'static str> {
        let usdc = self.assets.deposit.address;
        let principal = self.assets.principal.address;
        let reward = self.assets.reward.address;

        match call {
            WriteCall::Approve {
                token,
                spender,
                amount,
            } => {
                ledger.allowances.insert((*token, from, *spender), *amount);
                Ok(())
            }
            WriteCall::Deposit { vault, amount } => {
                if *vault != self.contracts.vault {
                    return Err("UnknownContract");
                }
                if amount.is_zero() {
                    return Err("InvalidAmount");
                }
                let allowance = ledger.allowance(usdc, from, *vault);
                if allowance < *amount {
                    return Err("ERC20InsufficientAllowance");
                }
                ledger.debit(usdc, from, *amount)?;
                ledger.credit(usdc, *vault, *amount);
                if allowance != U256::MAX {
                    ledger
                        .allowances
                        .insert((usdc, from, *vault), allowance - *amount);
                }

                let bonus = *amount * U256::from(self.settings.reward_bps)
                    / U256::from(BPS_DENOMINATOR);
                ledger.credit(principal, from, *amount);
                ledger.credit(reward, from, bonus);

                let timestamp = ledger.timestamp;
                let user = ledger.users.entry(from).or_default();
                user.deposit += *amount;
                user.deposit_time = timestamp;
                user.has_withdrawn = false;
                Ok(())
            }
            WriteCall::Withdraw { vault, amount } => {
                if *vault != self.contracts.vault {
                    return Err("UnknownContract");
                }
                let user = ledger.users.get(&from).cloned().unwrap_or_default();
                if user.has_withdrawn && user.deposit.is_zero() {
                    return Err("AlreadyWithdrawn");
                }
                if ledger.timestamp < user.deposit_time + self.settings.withdrawal_lock_secs {
                    return Err("WithdrawalLocked");
                }
                if amount.is_zero() {
                    return Err("InvalidAmount");
                }
                if ledger.balance(principal, from) < *amount {
                    return Err("InsufficientBalance");
                }
                if ledger.balance(usdc, *vault) < *amount {
                    return Err("VaultInsolvent");
                }
                ledger.debit(principal, from, *amount)?;
                ledger.debit(usdc, *vault, *amount)?;
                ledger.credit(usdc, from, *amount);

                let user = ledger.users.entry(from).or_default();
                user.deposit = user.deposit.saturating_sub(*amount);
                if user.deposit.is_zero() {
                    user.has_withdrawn = true;
                }
                Ok(())
            }
            WriteCall::PurchaseItem { item_id, .. } => {
                let item = ledger
                    .item(*item_id)
                    .filter(|item| item.is_active)
                    .cloned()
                    .ok_or("InvalidItem")?;
                if ledger.balance(reward, from) < item.price {
                    return Err("InsufficientYield");
                }
                ledger.debit(reward, from, item.price)?;
                // Payment is forwarded to the merchant in the same transaction.
                ledger.credit(usdc, item.merchant, item.price);

                let merchant = ledger.merchants.entry(item.merchant).or_default();
                merchant.total_sales += item.price;

                let id = ledger.purchases.len() as u64 + 1;
                let timestamp = ledger.timestamp;
                ledger.purchases.push(PurchaseInfo {
                    id,
                    buyer: from,
                    merchant: item.merchant,
                    item_id: item.id,
                    price: item.price,
                    timestamp,
                    is_paid: true,
                });
                Ok(())
            }
            WriteCall::ClaimTokens { .. } => {
                if !self.claim_ready(ledger, from) {
                    return Err("ClaimCooldown");
                }
                ledger.credit(usdc, from, self.settings.faucet_amount);
                let timestamp = ledger.timestamp;
                ledger.last_claim.insert(from, timestamp);
                Ok(())
            }
            WriteCall::RegisterMerchant {
                name, description, ..
            } => {
                if ledger.is_merchant(from) {
                    return Err("MerchantAlreadyRegistered");
                }
                if name.trim().is_empty() {
                    return Err("InvalidName");
                }
                let merchant = ledger.merchants.entry(from).or_default();
                merchant.is_registered = true;
                merchant.name = name.clone();
                merchant.description = description.clone();
                Ok(())
            }
            WriteCall::UpdateMerchant {
                name, description, ..
            } => {
                if !ledger.is_merchant(from) {
                    return Err("NotRegisteredMerchant");
                }
                if name.trim().is_empty() {
                    return Err("InvalidName");
                }
                let merchant = ledger.merchants.entry(from).or_default();
                merchant.name = name.clone();
                merchant.description = description.clone();
                Ok(())
            }
            WriteCall::ListItem {
                name,
                description,
                price,
                required_yield,
                ..
            } => {
                if !ledger.is_merchant(from) {
                    return Err("NotRegisteredMerchant");
                }
                if name.trim().is_empty() {
                    return Err("InvalidName");
                }
                if price.is_zero() || required_yield.is_zero() {
                    return Err("InvalidPrice");
                }
                ledger.push_item(from, name, description, *price, *required_yield, true);
                Ok(())
            }
            WriteCall::UpdateItem {
                item_id,
                price,
                required_yield,
                is_active,
                ..
            } => {
                if !ledger.is_merchant(from) {
                    return Err("NotRegisteredMerchant");
                }
                if price.is_zero() || required_yield.is_zero() {
                    return Err("InvalidPrice");
                }
                let item = ledger.item_mut(*item_id).ok_or("InvalidItem")?;
                if item.merchant != from {
                    return Err("NotItemOwner");
                }
                item.price = *price;
                item.required_yield = *required_yield;
                item.is_active = *is_active;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ChainClient for SimChain {
    async fn read_state(&self, call: &ReadCall) -> Result<ReadValue, ChainError> {
        self.record(CallRecord::Read(call.clone()));
        if self.faults.lock().failing_reads.contains(call.method()) {
            return Err(ChainError::Rpc(format!("{} request timed out", call.method())));
        }
        self.evaluate(call)
    }

    async fn submit_transaction(
        &self,
        from: Address,
        call: &WriteCall,
    ) -> Result<TxHandle, ChainError> {
        self.record(CallRecord::Submit {
            from,
            call: call.clone(),
        });

        let method = call.method();
        let (forced_revert, rejection) = {
            let mut faults = self.faults.lock();
            (faults.reverts.remove(method), faults.rejections.remove(method))
        };
        if let Some(message) = rejection {
            return Err(ChainError::Rpc(message));
        }

        let mut ledger = self.ledger.lock();
        ledger.nonce += 1;
        ledger.block += 1;
        ledger.timestamp += self.settings.block_time_secs;
        let handle = TxHandle(B256::left_padding_from(&ledger.nonce.to_be_bytes()));

        let status = match forced_revert {
            Some(message) => ReceiptStatus::Reverted { message },
            None => match self.execute(&mut ledger, from, call) {
                Ok(()) => ReceiptStatus::Success,
                Err(reason) => ReceiptStatus::Reverted {
                    message: format!("execution reverted: {reason}()"),
                },
            },
        };
        debug!("sim: {} from {} -> {:?}", method, from, status);

        let receipt = Receipt {
            status,
            transaction: handle,
            block: ledger.block,
        };
        ledger.receipts.insert(handle, (method, receipt));
        Ok(handle)
    }

    async fn await_receipt(&self, handle: TxHandle) -> Result<Receipt, ChainError> {
        self.record(CallRecord::Receipt(handle));
        let (method, receipt) = self
            .ledger
            .lock()
            .receipts
            .get(&handle)
            .cloned()
            .ok_or(ChainError::UnknownTransaction(handle))?;

        let (held, failing) = {
            let faults = self.faults.lock();
            (
                faults.held_receipts.contains(method),
                faults.failing_receipts.contains(method),
            )
        };
        if held {
            std::future::pending::<()>().await;
        }
        if failing {
            return Err(ChainError::Rpc(format!(
                "eth_getTransactionReceipt for {method} failed: upstream unavailable"
            )));
        }
        Ok(receipt)
    }
}
