use alloy_primitives::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::asset::AssetRegistry;
use crate::error::Error;
use crate::orchestrator::OperationRequest;

/// One line of a replay scenario: `type,id,account,amount,item`.
#[derive(Debug, Deserialize)]
pub struct ScenarioRow {
    #[serde(rename = "type")]
    op_type: String,
    id: u32,
    account: Address,
    amount: Option<Decimal>,
    item: Option<u64>,
}

impl ScenarioRow {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn amount(&self) -> Option<Decimal> {
        self.amount
    }

    /// Rows that move funds are dropped when their id was already seen.
    pub fn should_dedupe(&self) -> bool {
        matches!(self.op_type.as_str(), "deposit" | "withdraw" | "purchase")
    }

    pub fn into_request(self, assets: &AssetRegistry) -> Result<OperationRequest, Error> {
        match self.op_type.as_str() {
            "deposit" => {
                let amount = self.checked_amount()?;
                Ok(OperationRequest::deposit(
                    self.account,
                    assets.deposit.address,
                    amount,
                ))
            }
            "withdraw" => {
                let amount = self.checked_amount()?;
                Ok(OperationRequest::withdraw(
                    self.account,
                    assets.principal.address,
                    amount,
                ))
            }
            "purchase" => match self.item {
                Some(item) => Ok(OperationRequest::purchase(self.account, item)),
                None => Err(Error::InvalidScenarioRow(self.id)),
            },
            "claim" => Ok(OperationRequest::claim(self.account)),
            _ => Err(Error::InvalidScenarioRow(self.id)),
        }
    }

    // Zero is passed through; the orchestrator rejects it during validation.
    fn checked_amount(&self) -> Result<String, Error> {
        match self.amount {
            Some(amount) if !amount.is_sign_negative() => Ok(amount.to_string()),
            _ => Err(Error::InvalidScenarioRow(self.id)),
        }
    }
}

/// Final balances of one account, as written by the replay binary.
#[derive(Debug, Serialize)]
pub struct BalanceRow {
    pub account: String,
    pub usdc: String,
    pub principal: String,
    pub reward: String,
}
