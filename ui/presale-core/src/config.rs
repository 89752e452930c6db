//! Application configuration: defaults, an optional JSON file, then `PRESALE_*` environment
//! overrides.

use std::fs;
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};
use crate::units::parse_units;

/// Path of an optional JSON config file.
pub const CONFIG_FILE_VAR: &str = "PRESALE_CONFIG";

const SECONDS_PER_DAY: u64 = 86_400;

/// One selectable staking tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakingOption {
    pub name: String,
    pub apr_bps: u64,
    pub lock_days: u64,
}

impl StakingOption {
    pub fn lock_duration_secs(&self) -> u64 {
        self.lock_days * SECONDS_PER_DAY
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub contract_address: String,
    pub wallet_rpc_url: String,
    pub explorer_url: String,
    pub token_symbol: String,
    pub token_name: String,
    pub payment_symbol: String,
    pub display_decimals: u8,
    /// Minimum purchase, in payment-token units as a decimal string.
    pub min_purchase: String,
    pub poll_interval_secs: u64,
    pub slow_poll_interval_secs: u64,
    pub debounce_ms: u64,
    pub request_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub chain_time_resync_secs: u64,
    pub event_poll_secs: u64,
    /// Block the presale contract was deployed in; history queries start here.
    pub deployment_block: u64,
    pub staking_options: Vec<StakingOption>,
    pub state_file: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            contract_address: String::new(),
            wallet_rpc_url: "http://127.0.0.1:1248".to_string(),
            explorer_url: "https://etherscan.io".to_string(),
            token_symbol: "PRE".to_string(),
            token_name: "Presale Token".to_string(),
            payment_symbol: "USDT".to_string(),
            display_decimals: 4,
            min_purchase: "10".to_string(),
            poll_interval_secs: 30,
            slow_poll_interval_secs: 60,
            debounce_ms: 500,
            request_timeout_secs: 20,
            cache_ttl_secs: 300,
            chain_time_resync_secs: 300,
            event_poll_secs: 4,
            deployment_block: 0,
            staking_options: vec![
                StakingOption {
                    name: "Bronze".to_string(),
                    apr_bps: 1_000,
                    lock_days: 30,
                },
                StakingOption {
                    name: "Silver".to_string(),
                    apr_bps: 2_000,
                    lock_days: 90,
                },
                StakingOption {
                    name: "Gold".to_string(),
                    apr_bps: 3_500,
                    lock_days: 180,
                },
            ],
            state_file: "presale-state.json".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match lookup(CONFIG_FILE_VAR) {
            Some(path) => {
                let text = fs::read_to_string(&path)
                    .map_err(|e| WalletError::Config(format!("{path}: {e}")))?;
                Self::from_json(&text)?
            }
            None => Self::default(),
        };
        config.apply_overrides(&lookup)?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| WalletError::Config(e.to_string()))
    }

    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<()> {
        let string_vars: [(&str, &mut String); 8] = [
            ("PRESALE_CONTRACT_ADDRESS", &mut self.contract_address),
            ("PRESALE_WALLET_RPC_URL", &mut self.wallet_rpc_url),
            ("PRESALE_EXPLORER_URL", &mut self.explorer_url),
            ("PRESALE_TOKEN_SYMBOL", &mut self.token_symbol),
            ("PRESALE_TOKEN_NAME", &mut self.token_name),
            ("PRESALE_PAYMENT_SYMBOL", &mut self.payment_symbol),
            ("PRESALE_MIN_PURCHASE", &mut self.min_purchase),
            ("PRESALE_STATE_FILE", &mut self.state_file),
        ];
        for (key, field) in string_vars {
            if let Some(value) = lookup(key) {
                *field = value;
            }
        }

        let number_vars: [(&str, &mut u64); 8] = [
            ("PRESALE_POLL_INTERVAL_SECS", &mut self.poll_interval_secs),
            ("PRESALE_SLOW_POLL_INTERVAL_SECS", &mut self.slow_poll_interval_secs),
            ("PRESALE_DEBOUNCE_MS", &mut self.debounce_ms),
            ("PRESALE_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs),
            ("PRESALE_CACHE_TTL_SECS", &mut self.cache_ttl_secs),
            ("PRESALE_CHAIN_TIME_RESYNC_SECS", &mut self.chain_time_resync_secs),
            ("PRESALE_EVENT_POLL_SECS", &mut self.event_poll_secs),
            ("PRESALE_DEPLOYMENT_BLOCK", &mut self.deployment_block),
        ];
        for (key, field) in number_vars {
            if let Some(value) = lookup(key) {
                *field = parse_number(key, &value)?;
            }
        }
        if let Some(value) = lookup("PRESALE_DISPLAY_DECIMALS") {
            let places = parse_number("PRESALE_DISPLAY_DECIMALS", &value)?;
            self.display_decimals = u8::try_from(places).map_err(|_| {
                WalletError::Config(format!("PRESALE_DISPLAY_DECIMALS out of range: {value}"))
            })?;
        }

        if let Some(value) = lookup("PRESALE_STAKING_OPTIONS") {
            self.staking_options = serde_json::from_str(&value)
                .map_err(|e| WalletError::Config(format!("PRESALE_STAKING_OPTIONS: {e}")))?;
        }
        Ok(())
    }

    /// The presale contract address. An empty or malformed value is a configuration error
    /// for the pages that need the contract.
    pub fn contract_address(&self) -> Result<Address> {
        let raw = self.contract_address.trim();
        if raw.is_empty() {
            return Err(WalletError::Config("contract address is not set".into()));
        }
        if !raw.starts_with("0x") || raw.len() != 42 {
            return Err(WalletError::Config(format!("malformed contract address: {raw}")));
        }
        Address::from_str(raw)
            .map_err(|_| WalletError::Config(format!("malformed contract address: {raw}")))
    }

    /// Minimum purchase in base units of a payment token with `decimals` decimals.
    pub fn min_purchase_raw(&self, decimals: u8) -> Result<U256> {
        parse_units(&self.min_purchase, decimals)
            .map_err(|e| WalletError::Config(format!("minPurchase: {e}")))
    }

    pub fn explorer_tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{tx_hash}", self.explorer_url.trim_end_matches('/'))
    }

    pub fn explorer_address_url(&self, address: &str) -> String {
        format!("{}/address/{address}", self.explorer_url.trim_end_matches('/'))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn chain_time_resync(&self) -> Duration {
        Duration::from_secs(self.chain_time_resync_secs)
    }

    pub fn event_poll(&self) -> Duration {
        Duration::from_secs(self.event_poll_secs)
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| WalletError::Config(format!("{key} must be a whole number, got {value:?}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn env_overrides_defaults() {
        let config = AppConfig::from_lookup(lookup(&[
            ("PRESALE_CONTRACT_ADDRESS", "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
            ("PRESALE_POLL_INTERVAL_SECS", "45"),
            ("PRESALE_DISPLAY_DECIMALS", "2"),
            (
                "PRESALE_STAKING_OPTIONS",
                r#"[{"name":"Flex","aprBps":500,"lockDays":7}]"#,
            ),
        ]))
        .unwrap();

        assert_eq!(config.poll_interval_secs, 45);
        assert_eq!(config.display_decimals, 2);
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert_eq!(config.staking_options.len(), 1);
        assert_eq!(config.staking_options[0].lock_duration_secs(), 7 * 86_400);
        assert!(config.contract_address().is_ok());
    }

    #[test]
    fn malformed_numbers_are_config_errors() {
        let err = AppConfig::from_lookup(lookup(&[("PRESALE_DEBOUNCE_MS", "soon")])).unwrap_err();
        assert!(matches!(err, WalletError::Config(_)));
    }

    #[test]
    fn contract_address_is_validated() {
        let mut config = AppConfig::default();
        assert!(matches!(config.contract_address(), Err(WalletError::Config(_))));
        config.contract_address = "0x1234".into();
        assert!(matches!(config.contract_address(), Err(WalletError::Config(_))));
        config.contract_address = "0xZZbDB2315678afecb367f032d93F642f64180aa3".into();
        assert!(matches!(config.contract_address(), Err(WalletError::Config(_))));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = AppConfig::from_json(r#"{"tokenSymbol":"NOC","cacheTtlSecs":60}"#).unwrap();
        assert_eq!(config.token_symbol, "NOC");
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.slow_poll_interval_secs, 60);
        assert_eq!(config.min_purchase_raw(6).unwrap(), U256::from(10_000_000u64));
    }

    #[test]
    fn deployment_block_from_file_and_env() {
        let config = AppConfig::from_json(r#"{"deploymentBlock":18500000}"#).unwrap();
        assert_eq!(config.deployment_block, 18_500_000);
        assert_eq!(AppConfig::default().deployment_block, 0);

        let config =
            AppConfig::from_lookup(lookup(&[("PRESALE_DEPLOYMENT_BLOCK", "19000123")])).unwrap();
        assert_eq!(config.deployment_block, 19_000_123);

        let err = AppConfig::from_lookup(lookup(&[("PRESALE_DEPLOYMENT_BLOCK", "-1")])).unwrap_err();
        assert!(matches!(err, WalletError::Config(_)));
    }

    #[test]
    fn explorer_links() {
        let config = AppConfig {
            explorer_url: "https://bscscan.com/".into(),
            ..AppConfig::default()
        };
        assert_eq!(config.explorer_tx_url("0xabc"), "https://bscscan.com/tx/0xabc");
    }
}
