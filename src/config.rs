use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use std::{env, fs};

use alloy_primitives::{Address, address};
use log::info;
use serde::Deserialize;

use crate::asset::AssetRegistry;
use crate::orchestrator::BackoffPolicy;

pub const CONFIG_ENV: &str = "SEYIELD_CONFIG";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub contracts: ContractsConfig,
    pub assets: AssetRegistry,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub explorer_url: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://evm-rpc-testnet.sei-apis.com".to_string(),
            chain_id: 1328,
            explorer_url: "https://www.seiscan.app/atlantic-2".to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn explorer_link(&self, tx: &impl std::fmt::Display) -> String {
        format!("{}/tx/{}", self.explorer_url.trim_end_matches('/'), tx)
    }
}

/// Protocol contracts the orchestrator talks to. Token contracts live in
/// [`AssetRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContractsConfig {
    pub vault: Address,
    pub merchant: Address,
    pub faucet: Address,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            vault: address!("e5f56371f2c27cbbd3dd8eecedcd3b53847c6b05"),
            merchant: address!("7456733cb8d301cbee45c89e0aeb46edda511e7e"),
            faucet: address!("0814c0e18f8a275f58a4a74aa5183f9e0dd324e6"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Allowance re-checks between a confirmed approval and the main action.
    pub approval_grace: BackoffPolicy,
    /// Offsets from the start of settling at which balances are re-read.
    pub settle_schedule_ms: Vec<u64>,
    /// Interval of "still waiting" notices while a receipt is outstanding.
    pub soft_timeout_ms: u64,
    /// Request an unlimited allowance instead of the exact amount. Grants the
    /// spender contract all future transfers of the asset.
    pub unlimited_approval: bool,
    pub event_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            approval_grace: BackoffPolicy::default(),
            settle_schedule_ms: vec![0, 3_000, 6_000],
            soft_timeout_ms: 15_000,
            unlimited_approval: true,
            event_capacity: 256,
        }
    }
}

impl OrchestratorConfig {
    pub fn settle_schedule(&self) -> Vec<Duration> {
        self.settle_schedule_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }

    pub fn soft_timeout(&self) -> Duration {
        Duration::from_millis(self.soft_timeout_ms)
    }
}

impl Config {
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&source)
    }

    /// Loads the file named by `SEYIELD_CONFIG`, or the built-in defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var(CONFIG_ENV) {
            Ok(path) => {
                info!("Loading config from {}", path);
                Self::load(path)
            }
            Err(_) => {
                info!("{} not set, using default config", CONFIG_ENV);
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        let addresses = self
            .assets
            .addresses()
            .into_iter()
            .chain([
                self.contracts.vault,
                self.contracts.merchant,
                self.contracts.faucet,
            ]);
        for address in addresses {
            if address == Address::ZERO {
                return Err(ConfigError::Invalid("zero address configured".into()));
            }
            if !seen.insert(address) {
                return Err(ConfigError::Invalid(format!(
                    "address {address} configured twice"
                )));
            }
        }

        for asset in self.assets.iter() {
            if asset.decimals > 36 {
                return Err(ConfigError::Invalid(format!(
                    "{} has {} decimals",
                    asset.symbol, asset.decimals
                )));
            }
        }

        if self.orchestrator.settle_schedule_ms.is_empty() {
            return Err(ConfigError::Invalid(
                "settle_schedule_ms needs at least one entry".into(),
            ));
        }
        if self.orchestrator.soft_timeout_ms == 0 {
            return Err(ConfigError::Invalid("soft_timeout_ms must be positive".into()));
        }
        if self.orchestrator.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be positive".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.orchestrator.settle_schedule_ms, vec![0, 3_000, 6_000]);
        assert!(config.orchestrator.unlimited_approval);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [orchestrator]
            settle_schedule_ms = [0, 10]
            unlimited_approval = false

            [orchestrator.approval_grace]
            initial_delay_ms = 5
            max_attempts = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.orchestrator.settle_schedule_ms, vec![0, 10]);
        assert!(!config.orchestrator.unlimited_approval);
        assert_eq!(config.orchestrator.approval_grace.max_attempts, 2);
        assert_eq!(config.network.chain_id, 1328);
        assert_eq!(config.assets.deposit.symbol, "USDC");
    }

    #[test]
    fn duplicate_addresses_rejected() {
        let result = Config::from_toml(
            r#"
            [contracts]
            vault = "0x953e5610c73c989fe7c75d3d67be0a1e44a8e797"
            "#,
        );

        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn empty_settle_schedule_rejected() {
        let result = Config::from_toml("[orchestrator]\nsettle_schedule_ms = []\n");

        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn explorer_link_joins_path() {
        let network = NetworkConfig {
            explorer_url: "https://scan.example/".into(),
            ..Default::default()
        };

        assert_eq!(network.explorer_link(&"0xabc"), "https://scan.example/tx/0xabc");
    }
}
