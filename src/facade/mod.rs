//! Read-only views over the merchant and reward-token contracts, shaped as
//! flat camelCase JSON for the storefront and merchant dashboard.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use serde::Serialize;

use crate::chain::{ChainClient, ChainReads, ItemInfo, MerchantInfo, PurchaseInfo};
use crate::config::Config;
use crate::error::ChainError;

mod routes;

pub use routes::{FacadeError, router};

/// Seconds after purchase at which the timeline shows burning and payment.
const PROCESSING_OFFSET_SECS: u64 = 15;
const PAYMENT_OFFSET_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    pub id: u64,
    pub merchant: Address,
    pub name: String,
    pub description: String,
    pub price: String,
    #[serde(rename = "requiredYSYLD")]
    pub required_yield: String,
    pub is_active: bool,
}

impl From<ItemInfo> for ItemView {
    fn from(item: ItemInfo) -> Self {
        Self {
            id: item.id,
            merchant: item.merchant,
            name: item.name,
            description: item.description,
            price: item.price.to_string(),
            required_yield: item.required_yield.to_string(),
            is_active: item.is_active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemWithMerchant {
    #[serde(flatten)]
    pub item: ItemView,
    pub merchant_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseView {
    pub id: u64,
    pub buyer: Address,
    pub merchant: Address,
    pub item_id: u64,
    pub price: String,
    pub timestamp: u64,
    pub is_paid: bool,
}

impl From<PurchaseInfo> for PurchaseView {
    fn from(purchase: PurchaseInfo) -> Self {
        Self {
            id: purchase.id,
            buyer: purchase.buyer,
            merchant: purchase.merchant,
            item_id: purchase.item_id,
            price: purchase.price.to_string(),
            timestamp: purchase.timestamp,
            is_paid: purchase.is_paid,
        }
    }
}

/// Entry of a buyer's purchase history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseSummary {
    #[serde(flatten)]
    pub purchase: PurchaseView,
    pub item_name: String,
    pub merchant_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantView {
    pub is_registered: bool,
    pub name: String,
    pub description: String,
    pub total_sales: String,
    pub pending_payment: String,
}

impl From<MerchantInfo> for MerchantView {
    fn from(merchant: MerchantInfo) -> Self {
        Self {
            is_registered: merchant.is_registered,
            name: merchant.name,
            description: merchant.description,
            total_sales: merchant.total_sales.to_string(),
            pending_payment: merchant.pending_payment.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItem {
    pub name: String,
    pub description: String,
}

/// Entry of a merchant's order book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    #[serde(flatten)]
    pub purchase: PurchaseView,
    pub item: OrderItem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineStatus {
    Created,
    Processing,
    Completed,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    pub status: TimelineStatus,
    pub timestamp: u64,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseDetail {
    #[serde(flatten)]
    pub purchase: PurchaseView,
    pub item: ItemView,
    pub merchant_info: MerchantView,
    pub timeline: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Eligibility {
    pub is_eligible: bool,
    #[serde(rename = "requiredYSYLD")]
    pub required_yield: String,
    #[serde(rename = "userYSYLDBalance")]
    pub user_balance: String,
}

/// The payment is forwarded in the purchase transaction itself, so the
/// steps after creation are derived from the purchase timestamp.
pub fn timeline(timestamp: u64, is_paid: bool) -> Vec<TimelineEntry> {
    let last = if is_paid {
        TimelineEntry {
            status: TimelineStatus::Completed,
            timestamp: timestamp + PAYMENT_OFFSET_SECS,
            description: "Payment automatically sent to merchant",
        }
    } else {
        TimelineEntry {
            status: TimelineStatus::Pending,
            timestamp: timestamp + PAYMENT_OFFSET_SECS,
            description: "Awaiting payment to merchant",
        }
    };

    vec![
        TimelineEntry {
            status: TimelineStatus::Created,
            timestamp,
            description: "Purchase initiated",
        },
        TimelineEntry {
            status: TimelineStatus::Processing,
            timestamp: timestamp + PROCESSING_OFFSET_SECS,
            description: "Burning ySYLD tokens",
        },
        last,
    ]
}

pub struct MarketplaceReader {
    chain: Arc<dyn ChainClient>,
    merchant: Address,
    reward: Address,
}

impl MarketplaceReader {
    pub fn new(chain: Arc<dyn ChainClient>, merchant: Address, reward: Address) -> Self {
        Self {
            chain,
            merchant,
            reward,
        }
    }

    pub fn from_config(chain: Arc<dyn ChainClient>, config: &Config) -> Self {
        Self::new(chain, config.contracts.merchant, config.assets.reward.address)
    }

    pub async fn item(&self, item_id: u64) -> Result<ItemWithMerchant, ChainError> {
        let item = self.chain.item_info(self.merchant, item_id).await?;
        let merchant = self.chain.merchant_info(self.merchant, item.merchant).await?;
        Ok(ItemWithMerchant {
            item: item.into(),
            merchant_name: merchant.name,
        })
    }

    pub async fn purchase(&self, purchase_id: u64) -> Result<PurchaseDetail, ChainError> {
        let purchase = self.chain.purchase_info(self.merchant, purchase_id).await?;
        let item = self.chain.item_info(self.merchant, purchase.item_id).await?;
        let merchant = self
            .chain
            .merchant_info(self.merchant, purchase.merchant)
            .await?;

        Ok(PurchaseDetail {
            timeline: timeline(purchase.timestamp, purchase.is_paid),
            purchase: purchase.into(),
            item: item.into(),
            merchant_info: merchant.into(),
        })
    }

    /// Newest first.
    pub async fn purchases_by_buyer(
        &self,
        buyer: Address,
    ) -> Result<Vec<PurchaseSummary>, ChainError> {
        let mut summaries = Vec::new();
        for purchase in self.all_purchases().await? {
            if purchase.buyer != buyer {
                continue;
            }
            let item = self.chain.item_info(self.merchant, purchase.item_id).await?;
            let merchant = self
                .chain
                .merchant_info(self.merchant, purchase.merchant)
                .await?;
            summaries.push(PurchaseSummary {
                purchase: purchase.into(),
                item_name: item.name,
                merchant_name: merchant.name,
            });
        }
        summaries.sort_by(|a, b| b.purchase.timestamp.cmp(&a.purchase.timestamp));
        Ok(summaries)
    }

    pub async fn merchant_info(&self, account: Address) -> Result<MerchantView, ChainError> {
        Ok(self.chain.merchant_info(self.merchant, account).await?.into())
    }

    pub async fn merchant_items(&self, account: Address) -> Result<Vec<ItemView>, ChainError> {
        let count = self.chain.item_count(self.merchant).await?;
        let mut items = Vec::new();
        for item_id in 1..=count {
            let item = self.chain.item_info(self.merchant, item_id).await?;
            if item.merchant == account {
                items.push(item.into());
            }
        }
        Ok(items)
    }

    /// Newest first.
    pub async fn merchant_orders(&self, account: Address) -> Result<Vec<OrderView>, ChainError> {
        let mut orders = Vec::new();
        for purchase in self.all_purchases().await? {
            if purchase.merchant != account {
                continue;
            }
            let item = self.chain.item_info(self.merchant, purchase.item_id).await?;
            orders.push(OrderView {
                purchase: purchase.into(),
                item: OrderItem {
                    name: item.name,
                    description: item.description,
                },
            });
        }
        orders.sort_by(|a, b| b.purchase.timestamp.cmp(&a.purchase.timestamp));
        Ok(orders)
    }

    pub async fn eligibility(
        &self,
        account: Address,
        item_id: u64,
    ) -> Result<Eligibility, ChainError> {
        let is_eligible = self
            .chain
            .is_eligible_for_purchase(self.merchant, account, item_id)
            .await?;
        let item = self.chain.item_info(self.merchant, item_id).await?;
        let balance: U256 = self.chain.balance_of(self.reward, account).await?;

        Ok(Eligibility {
            is_eligible,
            required_yield: item.required_yield.to_string(),
            user_balance: balance.to_string(),
        })
    }

    async fn all_purchases(&self) -> Result<Vec<PurchaseInfo>, ChainError> {
        let count = self.chain.purchase_count(self.merchant).await?;
        let mut purchases = Vec::with_capacity(count as usize);
        for purchase_id in 1..=count {
            purchases.push(self.chain.purchase_info(self.merchant, purchase_id).await?);
        }
        Ok(purchases)
    }
}
