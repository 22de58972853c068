//! Chain module - RPC access for routing signals
//!
//! This module provides:
//! - Multi-RPC provider management with automatic failover
//! - Gas price and USDC pool liquidity readings per chain
//! - Last-good caching so a flaky RPC degrades into stale data, not gaps
//! - Periodic health probes that drive chain health

pub mod provider;

pub use provider::ChainProvider;

use crate::adapters::{GasPriceProvider, LiquidityProvider, Observation};
use crate::config::Settings;
use crate::error::{RouterError, RouterResult};
use crate::routing::ChainHealthMonitor;
use crate::types::ChainId;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Manages connections to all configured chains
pub struct ChainManager {
    /// Chain providers indexed by chain ID
    providers: DashMap<ChainId, Arc<ChainProvider>>,
    /// Shared health store fed by periodic checks
    health: Arc<ChainHealthMonitor>,
}

impl ChainManager {
    /// Create a new chain manager with all configured chains
    pub fn new(settings: &Settings, health: Arc<ChainHealthMonitor>) -> RouterResult<Self> {
        let providers = DashMap::new();

        for (name, chain_config) in settings.enabled_chains() {
            info!(
                "Initializing chain {} (ID: {})",
                chain_config.name, chain_config.chain_id
            );

            match ChainProvider::new(chain_config.clone()) {
                Ok(provider) => {
                    providers.insert(chain_config.chain_id, Arc::new(provider));
                    health.register(chain_config.chain_id);
                }
                Err(e) => {
                    warn!("Skipping chain {}: {}", name, e);
                }
            }
        }

        if providers.is_empty() {
            return Err(RouterError::Config(
                "No chain could be initialized".to_string(),
            ));
        }

        Ok(Self { providers, health })
    }

    /// Get provider for a specific chain
    pub fn get_provider(&self, chain_id: ChainId) -> RouterResult<Arc<ChainProvider>> {
        self.providers
            .get(&chain_id)
            .map(|p| p.clone())
            .ok_or(RouterError::ChainNotFound { chain_id })
    }

    /// Probe every chain and feed the result into chain health
    pub async fn health_check(&self) -> Vec<(ChainId, bool)> {
        let providers: Vec<Arc<ChainProvider>> =
            self.providers.iter().map(|e| e.value().clone()).collect();

        let checks = providers.iter().map(|provider| async move {
            (provider.chain_id(), provider.health_check().await)
        });
        let mut results = futures::future::join_all(checks).await;
        results.sort_by_key(|(chain_id, _)| *chain_id);

        for (chain_id, healthy) in &results {
            if *healthy {
                self.health.record_recovery(*chain_id);
            } else {
                self.health.record_outage(*chain_id);
            }
        }

        results
    }

    /// Get all connected chain IDs
    pub fn connected_chains(&self) -> Vec<ChainId> {
        let mut chains: Vec<ChainId> = self.providers.iter().map(|e| *e.key()).collect();
        chains.sort_unstable();
        chains
    }

    fn provider(&self, chain_id: ChainId) -> Option<Arc<ChainProvider>> {
        self.providers.get(&chain_id).map(|p| p.clone())
    }
}

#[async_trait]
impl GasPriceProvider for ChainManager {
    async fn gas_price(&self, chain_id: ChainId) -> RouterResult<Option<Observation<u128>>> {
        match self.provider(chain_id) {
            Some(provider) => provider.gas_price().await,
            None => Ok(None),
        }
    }
}

#[async_trait]
impl LiquidityProvider for ChainManager {
    async fn liquidity(&self, chain_id: ChainId) -> RouterResult<Option<Observation<u128>>> {
        match self.provider(chain_id) {
            Some(provider) => provider.liquidity().await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthConfig;
    use crate::routing::HealthState;
    use std::io::Write;

    const CONFIG: &str = r#"
[router]
instance_id = "test"
health_check_interval_secs = 30

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
burn_url = "http://127.0.0.1:1"
bridge_url = "http://127.0.0.1:1"
request_timeout_ms = 500

[chains.local]
chain_id = 31337
name = "Local"
rpc_urls = ["http://127.0.0.1:1"]
gas_price_strategy = "legacy"
max_gas_price_gwei = 100
usdc_address = "0x0000000000000000000000000000000000000001"
liquidity_pool = "0x0000000000000000000000000000000000000002"
swap_gas_units = 150000
native_price_usdc = 3000000000
enabled = true
"#;

    fn manager() -> (ChainManager, Arc<ChainHealthMonitor>) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        let settings = Settings::load_from(file.path()).unwrap();

        let health = Arc::new(ChainHealthMonitor::new(&HealthConfig {
            failure_threshold: 1,
            recovery_threshold: 1,
        }));
        (ChainManager::new(&settings, health.clone()).unwrap(), health)
    }

    #[tokio::test]
    async fn test_unknown_chain_has_no_signal() {
        let (manager, _) = manager();

        assert_eq!(manager.connected_chains(), vec![31337]);
        assert!(manager.gas_price(1).await.unwrap().is_none());
        assert!(manager.liquidity(1).await.unwrap().is_none());
        assert!(matches!(
            manager.get_provider(1),
            Err(RouterError::ChainNotFound { chain_id: 1 })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_rpc_marks_chain_unavailable() {
        let (manager, health) = manager();
        assert_eq!(health.state(31337), Some(HealthState::Healthy));

        let results = manager.health_check().await;

        assert_eq!(results, vec![(31337, false)]);
        assert_eq!(health.state(31337), Some(HealthState::Unavailable));
        assert!(manager.gas_price(31337).await.is_err());
    }
}
