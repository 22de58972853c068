//! Chain provider with multi-RPC support and automatic failover

use crate::adapters::Observation;
use crate::config::{ChainConfig, GasPriceStrategy};
use crate::error::{RouterError, RouterResult};
use crate::types::ChainId;

use chrono::Utc;
use ethers::abi::{self, Token};
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// `balanceOf(address)`
const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

const PRIORITY_FEE_WEI: u64 = 2_000_000_000;

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    usdc: Address,
    pool: Option<Address>,
    /// Last good readings, served when every RPC fails
    last_gas: RwLock<Option<Observation<u128>>>,
    last_liquidity: RwLock<Option<Observation<u128>>>,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: ChainConfig) -> RouterResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RouterError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        let usdc = Address::from_str(&config.usdc_address).map_err(|e| {
            RouterError::Config(format!(
                "Invalid USDC address for chain {}: {}",
                config.chain_id, e
            ))
        })?;

        let pool = if config.liquidity_pool.is_empty() {
            None
        } else {
            Some(Address::from_str(&config.liquidity_pool).map_err(|e| {
                RouterError::Config(format!(
                    "Invalid liquidity pool for chain {}: {}",
                    config.chain_id, e
                ))
            })?)
        };

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
            usdc,
            pool,
            last_gas: RwLock::new(None),
            last_liquidity: RwLock::new(None),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> RouterResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(RouterError::ChainConnection {
            chain_id: self.config.chain_id,
            message: "All providers failed".to_string(),
        })
    }

    /// Gas price in wei, falling back to the last good reading
    pub async fn gas_price(&self) -> RouterResult<Option<Observation<u128>>> {
        let mut result = Err(RouterError::GasEstimation("no providers".to_string()));
        for _ in 0..self.http_providers.len() {
            result = self.read_gas_price().await;
            match &result {
                Ok(_) => break,
                Err(e) => {
                    warn!("Gas price read failed on chain {}: {}", self.config.chain_id, e);
                    self.failover();
                }
            }
        }

        with_last_good(&self.last_gas, result).await
    }

    async fn read_gas_price(&self) -> RouterResult<u128> {
        let price = match self.config.gas_price_strategy {
            GasPriceStrategy::Legacy => self
                .http()
                .get_gas_price()
                .await
                .map_err(|e| RouterError::GasEstimation(e.to_string()))?,
            GasPriceStrategy::Eip1559 => self.estimate_eip1559_max_fee().await?,
        };

        Ok(saturating_u128(price))
    }

    /// Max fee = 2 * base fee + priority fee, capped at the configured maximum
    async fn estimate_eip1559_max_fee(&self) -> RouterResult<U256> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| RouterError::GasEstimation(e.to_string()))?
            .ok_or_else(|| RouterError::GasEstimation("No latest block".to_string()))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| RouterError::GasEstimation("No base fee in block".to_string()))?;

        Ok(eip1559_max_fee(
            base_fee,
            U256::from(PRIORITY_FEE_WEI),
            self.config.max_gas_price_gwei,
        ))
    }

    /// USDC held by the liquidity pool, falling back to the last good reading.
    /// `Ok(None)` when the chain has no pool configured.
    pub async fn liquidity(&self) -> RouterResult<Option<Observation<u128>>> {
        let Some(pool) = self.pool else {
            return Ok(None);
        };

        let tx: TypedTransaction = TransactionRequest::new()
            .to(self.usdc)
            .data(balance_of_calldata(pool))
            .into();

        let mut result = Err(RouterError::ChainConnection {
            chain_id: self.config.chain_id,
            message: "no providers".to_string(),
        });
        for _ in 0..self.http_providers.len() {
            result = self
                .http()
                .call(&tx, None)
                .await
                .map_err(|e| RouterError::ChainConnection {
                    chain_id: self.config.chain_id,
                    message: e.to_string(),
                })
                .and_then(|bytes| decode_balance(&bytes));
            match &result {
                Ok(_) => break,
                Err(e) => {
                    warn!("Liquidity read failed on chain {}: {}", self.config.chain_id, e);
                    self.failover();
                }
            }
        }

        with_last_good(&self.last_liquidity, result).await
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.chain_id, e);
                false
            }
        }
    }

    /// Get chain ID
    pub fn chain_id(&self) -> ChainId {
        self.config.chain_id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// Record a fresh reading, or serve the cached one if the read failed.
/// A cached reading keeps its original timestamp, so it turns stale on its own.
async fn with_last_good(
    cache: &RwLock<Option<Observation<u128>>>,
    result: RouterResult<u128>,
) -> RouterResult<Option<Observation<u128>>> {
    match result {
        Ok(value) => {
            let observation = Observation::new(value, Utc::now());
            *cache.write().await = Some(observation);
            Ok(Some(observation))
        }
        Err(e) => match *cache.read().await {
            Some(cached) => {
                debug!("Serving cached reading after error: {}", e);
                Ok(Some(cached))
            }
            None => Err(e),
        },
    }
}

fn balance_of_calldata(holder: Address) -> Bytes {
    let mut data = BALANCE_OF_SELECTOR.to_vec();
    data.extend(abi::encode(&[Token::Address(holder)]));
    data.into()
}

fn decode_balance(bytes: &[u8]) -> RouterResult<u128> {
    if bytes.len() < 32 {
        return Err(RouterError::Internal(format!(
            "balanceOf returned {} bytes",
            bytes.len()
        )));
    }
    Ok(saturating_u128(U256::from_big_endian(&bytes[..32])))
}

fn saturating_u128(value: U256) -> u128 {
    if value > U256::from(u128::MAX) {
        u128::MAX
    } else {
        value.as_u128()
    }
}

fn eip1559_max_fee(base_fee: U256, priority_fee: U256, max_gas_price_gwei: u64) -> U256 {
    let max_fee = base_fee * 2 + priority_fee;
    let cap = U256::from(max_gas_price_gwei) * U256::from(1_000_000_000u64);
    std::cmp::min(max_fee, cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_of_calldata() {
        let holder = Address::from_str("0x00000000000000000000000000000000000000aa").unwrap();
        let data = balance_of_calldata(holder);

        assert_eq!(data.len(), 36);
        assert_eq!(&data[..4], &BALANCE_OF_SELECTOR);
        assert_eq!(data[35], 0xaa);
    }

    #[test]
    fn test_decode_balance() {
        let mut word = [0u8; 32];
        word[31] = 0x10;
        word[30] = 0x01;

        assert_eq!(decode_balance(&word).unwrap(), 0x0110);
        assert!(decode_balance(&word[..10]).is_err());
    }

    #[test]
    fn test_eip1559_fee_is_capped() {
        let gwei = U256::from(1_000_000_000u64);
        let fee = eip1559_max_fee(gwei * 10, gwei * 2, 100);
        assert_eq!(fee, gwei * 22);

        let capped = eip1559_max_fee(gwei * 80, gwei * 2, 100);
        assert_eq!(capped, gwei * 100);
    }

    #[tokio::test]
    async fn test_last_good_reading_is_served_on_failure() {
        let cache = RwLock::new(None);

        let err = with_last_good(&cache, Err(RouterError::GasEstimation("down".to_string()))).await;
        assert!(err.is_err());

        let fresh = with_last_good(&cache, Ok(42)).await.unwrap().unwrap();
        let cached = with_last_good(&cache, Err(RouterError::GasEstimation("down".to_string())))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(cached.value, 42);
        assert_eq!(cached.observed_at, fresh.observed_at);
    }
}
