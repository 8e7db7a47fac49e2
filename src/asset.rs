use alloy_primitives::{Address, U256, address};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("{0:?} is not a number")]
    Malformed(String),
    #[error("{0:?} must be greater than zero")]
    NotPositive(String),
    #[error("{input:?} has more than {decimals} decimal places")]
    TooPrecise { input: String, decimals: u8 },
    #[error("{0:?} is too large")]
    Overflow(String),
}

/// A fungible token. Loaded from configuration, never mutated at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
}

impl Asset {
    pub fn new(symbol: &str, address: Address, decimals: u8) -> Self {
        Self {
            symbol: symbol.to_string(),
            address,
            decimals,
        }
    }

    pub fn parse_units(&self, input: &str) -> Result<U256, AmountError> {
        parse_units(input, self.decimals)
    }

    pub fn format_units(&self, value: U256) -> String {
        format_units(value, self.decimals)
    }
}

/// The three tokens of the product: the deposited stablecoin, the principal
/// token minted 1:1 on deposit, and the upfront reward token spent at merchants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRegistry {
    pub deposit: Asset,
    pub principal: Asset,
    pub reward: Asset,
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self {
            deposit: Asset::new(
                "USDC",
                address!("953e5610c73c989fe7c75d3d67be0a1e44a8e797"),
                6,
            ),
            principal: Asset::new(
                "pSYLD",
                address!("13cf4e3e284d34c575ceeccb0791ca535a657da2"),
                6,
            ),
            reward: Asset::new(
                "ySYLD",
                address!("f12cd252ca50781ec88c2d8832ca4f9c4bf11d82"),
                6,
            ),
        }
    }
}

impl AssetRegistry {
    pub fn get(&self, address: Address) -> Option<&Asset> {
        self.iter().find(|asset| asset.address == address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        [&self.deposit, &self.principal, &self.reward].into_iter()
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.iter().map(|asset| asset.address).collect()
    }
}

/// Parses a human-entered amount ("12.5") into base units of a token with
/// `decimals` decimal places. Zero and negative amounts are rejected.
pub fn parse_units(input: &str, decimals: u8) -> Result<U256, AmountError> {
    let trimmed = input.trim();
    let value = Decimal::from_str_exact(trimmed)
        .map_err(|_| AmountError::Malformed(trimmed.to_string()))?;

    if value.is_zero() || value.is_sign_negative() {
        return Err(AmountError::NotPositive(trimmed.to_string()));
    }

    let value = value.normalize();
    let scale = value.scale();
    if scale > u32::from(decimals) {
        return Err(AmountError::TooPrecise {
            input: trimmed.to_string(),
            decimals,
        });
    }

    let mantissa = U256::from(value.mantissa().unsigned_abs());
    let factor = U256::from(10u8)
        .checked_pow(U256::from(u32::from(decimals) - scale))
        .ok_or_else(|| AmountError::Overflow(trimmed.to_string()))?;

    mantissa
        .checked_mul(factor)
        .ok_or_else(|| AmountError::Overflow(trimmed.to_string()))
}

/// Formats base units for display, dropping trailing fractional zeros.
pub fn format_units(value: U256, decimals: u8) -> String {
    let digits = value.to_string();
    let decimals = usize::from(decimals);
    if decimals == 0 {
        return digits;
    }

    let (integer, fraction) = if digits.len() > decimals {
        let split = digits.len() - decimals;
        (digits[..split].to_string(), digits[split..].to_string())
    } else {
        (
            "0".to_string(),
            format!("{}{}", "0".repeat(decimals - digits.len()), digits),
        )
    };

    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        integer
    } else {
        format!("{integer}.{fraction}")
    }
}
