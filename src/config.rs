//! Configuration management for the USDC router
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::types::ChainId;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub router: RouterConfig,
    pub routing: RoutingConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    pub database: Option<DatabaseConfig>,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub collaborators: CollaboratorConfig,
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    pub instance_id: String,
    pub health_check_interval_secs: u64,
}

/// Route decision parameters
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    /// Savings needed to go cross-chain when the request does not override it
    #[serde(deserialize_with = "crate::types::amount::deserialize")]
    pub default_savings_threshold: u128,
    /// Lowest threshold a request override may set
    #[serde(deserialize_with = "crate::types::amount::deserialize")]
    pub threshold_floor: u128,
    /// Remote costs within this many minor units of the best are ties
    #[serde(deserialize_with = "crate::types::amount::deserialize")]
    pub equality_band: u128,
    /// Maximum signal age before an estimate is stale
    pub freshness_window_secs: u64,
    /// Cost penalty for degraded chains, in basis points of total cost
    #[serde(default = "default_degraded_penalty_bps")]
    pub degraded_penalty_bps: u32,
}

fn default_degraded_penalty_bps() -> u32 {
    100
}

/// Chain health debounce
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    pub failure_threshold: u32,
    pub recovery_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_threshold: 3,
        }
    }
}

/// Intent orchestration parameters
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    pub max_burn_retries: u32,
    pub max_submit_retries: u32,
    /// How often each intent worker drives its state machine
    pub tick_interval_ms: u64,
    /// Wait after fulfillment before completing without settlement confirmation
    pub confirmation_window_secs: u64,
    pub audit_append_attempts: u32,
    pub audit_retry_delay_ms: u64,
    pub event_queue_depth: usize,
    #[serde(default)]
    pub deadlines: StateDeadlines,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_burn_retries: 3,
            max_submit_retries: 3,
            tick_interval_ms: 2_000,
            confirmation_window_secs: 600,
            audit_append_attempts: 3,
            audit_retry_delay_ms: 200,
            event_queue_depth: 64,
            deadlines: StateDeadlines::default(),
        }
    }
}

/// Per-state deadlines in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StateDeadlines {
    pub created_secs: u64,
    pub burn_initiated_secs: u64,
    pub burn_confirmed_secs: u64,
    pub intent_submitted_secs: u64,
    pub awaiting_fulfillment_secs: u64,
    pub refund_initiated_secs: u64,
}

impl Default for StateDeadlines {
    fn default() -> Self {
        Self {
            created_secs: 60,
            burn_initiated_secs: 900,
            burn_confirmed_secs: 300,
            intent_submitted_secs: 300,
            awaiting_fulfillment_secs: 1_800,
            refund_initiated_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// Endpoints of the burn and bridge services
#[derive(Debug, Clone, Deserialize)]
pub struct CollaboratorConfig {
    pub burn_url: String,
    pub bridge_url: String,
    pub request_timeout_ms: u64,
    pub api_key_env: Option<String>,
}

impl CollaboratorConfig {
    /// Shared key for outgoing collaborator calls and incoming webhooks
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub gas_price_strategy: GasPriceStrategy,
    pub max_gas_price_gwei: u64,
    /// USDC token contract
    pub usdc_address: String,
    /// Pool whose USDC balance is the available liquidity
    pub liquidity_pool: String,
    /// Gas used by one swap execution
    pub swap_gas_units: u64,
    /// Price of one native token in USDC minor units
    #[serde(deserialize_with = "crate::types::amount::deserialize")]
    pub native_price_usdc: u128,
    #[serde(default, deserialize_with = "crate::types::amount::deserialize")]
    pub bridge_fee_flat: u128,
    #[serde(default)]
    pub bridge_fee_bps: u32,
    /// Chain-specific deadline overrides
    pub deadlines: Option<StateDeadlines>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("USDC_ROUTER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str)?;

        let settings: Settings = toml::from_str(&config_str)
            .with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        if self.routing.threshold_floor > self.routing.default_savings_threshold {
            anyhow::bail!(
                "threshold_floor ({}) exceeds default_savings_threshold ({})",
                self.routing.threshold_floor,
                self.routing.default_savings_threshold
            );
        }

        if self.routing.freshness_window_secs == 0 {
            anyhow::bail!("freshness_window_secs must be positive");
        }

        if self.health.failure_threshold == 0 || self.health.recovery_threshold == 0 {
            anyhow::bail!("Health thresholds must be positive");
        }

        if self.orchestrator.audit_append_attempts == 0 {
            anyhow::bail!("audit_append_attempts must be at least 1");
        }

        for (name, chain) in &self.chains {
            if chain.enabled {
                if chain.rpc_urls.is_empty() {
                    anyhow::bail!("Chain {} has no RPC URLs configured", name);
                }
                if chain.liquidity_pool.is_empty() {
                    tracing::warn!("Chain {} has no liquidity pool - it will never be eligible", name);
                }
            }
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: ChainId) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")?;

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[router]
instance_id = "router-1"
health_check_interval_secs = 15

[routing]
default_savings_threshold = 100
threshold_floor = 10
equality_band = 5
freshness_window_secs = 30

[api]
host = "127.0.0.1"
port = 8080

[metrics]
enabled = false
port = 9090

[collaborators]
burn_url = "http://burn.local"
bridge_url = "${ROUTER_TEST_BRIDGE_URL}"
request_timeout_ms = 5000

[chains.base]
chain_id = 8453
name = "Base"
rpc_urls = ["http://localhost:8545"]
gas_price_strategy = "eip1559"
max_gas_price_gwei = 50
usdc_address = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
liquidity_pool = "0x0000000000000000000000000000000000000001"
swap_gas_units = 150000
native_price_usdc = 3000000000
bridge_fee_bps = 5
enabled = true
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_load_from_file() {
        env::set_var("ROUTER_TEST_BRIDGE_URL", "http://bridge.local");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.collaborators.bridge_url, "http://bridge.local");
        assert_eq!(settings.routing.degraded_penalty_bps, 100);
        assert_eq!(settings.health.failure_threshold, 3);
        assert_eq!(settings.orchestrator.deadlines, StateDeadlines::default());
        assert!(settings.database.is_none());
        assert_eq!(settings.get_chain_by_id(8453).unwrap().bridge_fee_bps, 5);
        assert_eq!(settings.routing.default_savings_threshold, 100);
        assert_eq!(settings.routing.equality_band, 5);
        assert_eq!(settings.get_chain_by_id(8453).unwrap().native_price_usdc, 3_000_000_000);
    }

    #[test]
    fn test_shipped_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");

        let settings = Settings::load_from(&path).unwrap();

        assert_eq!(settings.routing.default_savings_threshold, 250_000);
        assert_eq!(settings.routing.threshold_floor, 50_000);
        let base = settings.get_chain_by_id(8453).unwrap();
        assert_eq!(base.bridge_fee_flat, 20_000);
        assert_eq!(base.native_price_usdc, 3_000_000_000);
        assert_eq!(settings.get_chain_by_id(1).unwrap().bridge_fee_flat, 0);
        assert!(settings.get_chain_by_id(42161).unwrap().deadlines.is_some());
    }

    #[test]
    fn test_floor_above_default_is_rejected() {
        let broken = SAMPLE.replace("threshold_floor = 10", "threshold_floor = 500");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(broken.as_bytes()).unwrap();

        assert!(Settings::load_from(file.path()).is_err());
    }
}
