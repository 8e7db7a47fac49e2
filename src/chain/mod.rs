//! Boundary to the wallet / RPC integration.
//!
//! Reads and writes are typed per contract method so results are decoded into
//! named structs rather than indexed positionally.

use std::fmt;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;

use crate::error::ChainError;

pub mod sim;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHandle(pub B256);

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadCall {
    BalanceOf {
        token: Address,
        owner: Address,
    },
    Allowance {
        token: Address,
        owner: Address,
        spender: Address,
    },
    UserInfo {
        vault: Address,
        account: Address,
    },
    ItemCount {
        merchant: Address,
    },
    ItemInfo {
        merchant: Address,
        item_id: u64,
    },
    PurchaseCount {
        merchant: Address,
    },
    PurchaseInfo {
        merchant: Address,
        purchase_id: u64,
    },
    MerchantInfo {
        merchant: Address,
        account: Address,
    },
    IsEligibleForPurchase {
        merchant: Address,
        buyer: Address,
        item_id: u64,
    },
    ClaimableAmount {
        faucet: Address,
        account: Address,
    },
}

impl ReadCall {
    pub fn contract(&self) -> Address {
        match self {
            ReadCall::BalanceOf { token, .. } | ReadCall::Allowance { token, .. } => *token,
            ReadCall::UserInfo { vault, .. } => *vault,
            ReadCall::ItemCount { merchant }
            | ReadCall::ItemInfo { merchant, .. }
            | ReadCall::PurchaseCount { merchant }
            | ReadCall::PurchaseInfo { merchant, .. }
            | ReadCall::MerchantInfo { merchant, .. }
            | ReadCall::IsEligibleForPurchase { merchant, .. } => *merchant,
            ReadCall::ClaimableAmount { faucet, .. } => *faucet,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            ReadCall::BalanceOf { .. } => "balanceOf",
            ReadCall::Allowance { .. } => "allowance",
            ReadCall::UserInfo { .. } => "userInfo",
            ReadCall::ItemCount { .. } => "itemCount",
            ReadCall::ItemInfo { .. } => "getItemInfo",
            ReadCall::PurchaseCount { .. } => "purchaseCount",
            ReadCall::PurchaseInfo { .. } => "getPurchaseInfo",
            ReadCall::MerchantInfo { .. } => "getMerchantInfo",
            ReadCall::IsEligibleForPurchase { .. } => "isEligibleForPurchase",
            ReadCall::ClaimableAmount { .. } => "getClaimableAmount",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCall {
    Approve {
        token: Address,
        spender: Address,
        amount: U256,
    },
    Deposit {
        vault: Address,
        amount: U256,
    },
    Withdraw {
        vault: Address,
        amount: U256,
    },
    PurchaseItem {
        merchant: Address,
        item_id: u64,
    },
    ClaimTokens {
        faucet: Address,
    },
    RegisterMerchant {
        merchant: Address,
        name: String,
        description: String,
    },
    UpdateMerchant {
        merchant: Address,
        name: String,
        description: String,
    },
    ListItem {
        merchant: Address,
        name: String,
        description: String,
        price: U256,
        required_yield: U256,
    },
    UpdateItem {
        merchant: Address,
        item_id: u64,
        price: U256,
        required_yield: U256,
        is_active: bool,
    },
}

impl WriteCall {
    pub fn contract(&self) -> Address {
        match self {
            WriteCall::Approve { token, .. } => *token,
            WriteCall::Deposit { vault, .. } | WriteCall::Withdraw { vault, .. } => *vault,
            WriteCall::PurchaseItem { merchant, .. }
            | WriteCall::RegisterMerchant { merchant, .. }
            | WriteCall::UpdateMerchant { merchant, .. }
            | WriteCall::ListItem { merchant, .. }
            | WriteCall::UpdateItem { merchant, .. } => *merchant,
            WriteCall::ClaimTokens { faucet } => *faucet,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            WriteCall::Approve { .. } => "approve",
            WriteCall::Deposit { .. } => "deposit",
            WriteCall::Withdraw { .. } => "withdraw",
            WriteCall::PurchaseItem { .. } => "purchaseItem",
            WriteCall::ClaimTokens { .. } => "claimTokens",
            WriteCall::RegisterMerchant { .. } => "registerMerchant",
            WriteCall::UpdateMerchant { .. } => "updateMerchant",
            WriteCall::ListItem { .. } => "listItem",
            WriteCall::UpdateItem { .. } => "updateItem",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub id: u64,
    pub merchant: Address,
    pub name: String,
    pub description: String,
    pub price: U256,
    pub required_yield: U256,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseInfo {
    pub id: u64,
    pub buyer: Address,
    pub merchant: Address,
    pub item_id: u64,
    pub price: U256,
    pub timestamp: u64,
    pub is_paid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MerchantInfo {
    pub is_registered: bool,
    pub name: String,
    pub description: String,
    pub total_sales: U256,
    pub pending_payment: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserInfo {
    pub deposit: U256,
    pub deposit_time: u64,
    pub has_withdrawn: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadValue {
    Quantity(U256),
    Count(u64),
    Flag(bool),
    Item(ItemInfo),
    Purchase(PurchaseInfo),
    Merchant(MerchantInfo),
    User(UserInfo),
}

macro_rules! read_value_accessor {
    ($name:ident, $variant:ident, $ty:ty, $expected:literal) => {
        pub fn $name(self, call: &'static str) -> Result<$ty, ChainError> {
            match self {
                ReadValue::$variant(value) => Ok(value),
                _ => Err(ChainError::UnexpectedValue {
                    call,
                    expected: $expected,
                }),
            }
        }
    };
}

impl ReadValue {
    read_value_accessor!(into_quantity, Quantity, U256, "quantity");
    read_value_accessor!(into_count, Count, u64, "count");
    read_value_accessor!(into_flag, Flag, bool, "flag");
    read_value_accessor!(into_item, Item, ItemInfo, "item info");
    read_value_accessor!(into_purchase, Purchase, PurchaseInfo, "purchase info");
    read_value_accessor!(into_merchant, Merchant, MerchantInfo, "merchant info");
    read_value_accessor!(into_user, User, UserInfo, "user info");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub status: ReceiptStatus,
    pub transaction: TxHandle,
    pub block: u64,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

/// Supplied by the wallet / RPC integration.
///
/// `await_receipt` may stay pending for as long as the transaction is not
/// included; callers never abandon it.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn read_state(&self, call: &ReadCall) -> Result<ReadValue, ChainError>;

    async fn submit_transaction(
        &self,
        from: Address,
        call: &WriteCall,
    ) -> Result<TxHandle, ChainError>;

    async fn await_receipt(&self, handle: TxHandle) -> Result<Receipt, ChainError>;
}

/// Typed reads on top of [`ChainClient::read_state`].
#[async_trait]
pub trait ChainReads: ChainClient {
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        let call = ReadCall::BalanceOf { token, owner };
        self.read_state(&call).await?.into_quantity(call.method())
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        let call = ReadCall::Allowance {
            token,
            owner,
            spender,
        };
        self.read_state(&call).await?.into_quantity(call.method())
    }

    async fn user_info(&self, vault: Address, account: Address) -> Result<UserInfo, ChainError> {
        let call = ReadCall::UserInfo { vault, account };
        self.read_state(&call).await?.into_user(call.method())
    }

    async fn item_count(&self, merchant: Address) -> Result<u64, ChainError> {
        let call = ReadCall::ItemCount { merchant };
        self.read_state(&call).await?.into_count(call.method())
    }

    async fn item_info(&self, merchant: Address, item_id: u64) -> Result<ItemInfo, ChainError> {
        let call = ReadCall::ItemInfo { merchant, item_id };
        self.read_state(&call).await?.into_item(call.method())
    }

    async fn purchase_count(&self, merchant: Address) -> Result<u64, ChainError> {
        let call = ReadCall::PurchaseCount { merchant };
        self.read_state(&call).await?.into_count(call.method())
    }

    async fn purchase_info(
        &self,
        merchant: Address,
        purchase_id: u64,
    ) -> Result<PurchaseInfo, ChainError> {
        let call = ReadCall::PurchaseInfo {
            merchant,
            purchase_id,
        };
        self.read_state(&call).await?.into_purchase(call.method())
    }

    async fn merchant_info(
        &self,
        merchant: Address,
        account: Address,
    ) -> Result<MerchantInfo, ChainError> {
        let call = ReadCall::MerchantInfo { merchant, account };
        self.read_state(&call).await?.into_merchant(call.method())
    }

    async fn is_eligible_for_purchase(
        &self,
        merchant: Address,
        buyer: Address,
        item_id: u64,
    ) -> Result<bool, ChainError> {
        let call = ReadCall::IsEligibleForPurchase {
            merchant,
            buyer,
            item_id,
        };
        self.read_state(&call).await?.into_flag(call.method())
    }

    async fn claimable_amount(&self, faucet: Address, account: Address) -> Result<U256, ChainError> {
        let call = ReadCall::ClaimableAmount { faucet, account };
        self.read_state(&call).await?.into_quantity(call.method())
    }
}

impl<T: ChainClient + ?Sized> ChainReads for T {}
