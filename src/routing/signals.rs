//! Signal collection
//!
//! Reads gas price and liquidity for every candidate chain in parallel and
//! feeds the results into chain health. A chain whose providers fail or know
//! nothing is left out of the signal set.

use super::health::ChainHealthMonitor;
use crate::adapters::{GasPriceProvider, LiquidityProvider};
use crate::config::ChainConfig;
use crate::types::{ChainId, ChainSignal, SwapRequest, COST_CEILING};

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Bridge fee schedule for one destination chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeFee {
    pub flat: u128,
    pub bps: u32,
}

impl BridgeFee {
    pub fn for_amount(&self, amount: u128) -> u128 {
        let proportional = amount.saturating_mul(self.bps as u128) / 10_000;
        self.flat.saturating_add(proportional).min(COST_CEILING)
    }
}

impl From<&ChainConfig> for BridgeFee {
    fn from(config: &ChainConfig) -> Self {
        Self {
            flat: config.bridge_fee_flat,
            bps: config.bridge_fee_bps,
        }
    }
}

pub struct SignalCollector {
    gas: Arc<dyn GasPriceProvider>,
    liquidity: Arc<dyn LiquidityProvider>,
    health: Arc<ChainHealthMonitor>,
    chains: Vec<ChainId>,
    fees: HashMap<ChainId, BridgeFee>,
    freshness_window: Duration,
}

impl SignalCollector {
    pub fn new(
        gas: Arc<dyn GasPriceProvider>,
        liquidity: Arc<dyn LiquidityProvider>,
        health: Arc<ChainHealthMonitor>,
        freshness_window_secs: u64,
    ) -> Self {
        Self {
            gas,
            liquidity,
            health,
            chains: Vec::new(),
            fees: HashMap::new(),
            freshness_window: Duration::seconds(freshness_window_secs as i64),
        }
    }

    /// Add a candidate chain and its bridge fee schedule
    pub fn with_chain(mut self, chain_id: ChainId, fee: BridgeFee) -> Self {
        if !self.chains.contains(&chain_id) {
            self.chains.push(chain_id);
            self.chains.sort_unstable();
        }
        self.fees.insert(chain_id, fee);
        self.health.register(chain_id);
        self
    }

    pub fn chains(&self) -> &[ChainId] {
        &self.chains
    }

    /// Signals for the request's source chain and every remote candidate
    pub async fn collect(&self, request: &SwapRequest) -> Vec<ChainSignal> {
        let mut targets = self.chains.clone();
        if !targets.contains(&request.source_chain) {
            targets.push(request.source_chain);
        }

        let now = Utc::now();
        let reads = targets
            .iter()
            .map(|&chain_id| self.read_chain(request, chain_id, now));

        join_all(reads).await.into_iter().flatten().collect()
    }

    async fn read_chain(
        &self,
        request: &SwapRequest,
        chain_id: ChainId,
        now: DateTime<Utc>,
    ) -> Option<ChainSignal> {
        let (gas, liquidity) = futures::join!(
            self.gas.gas_price(chain_id),
            self.liquidity.liquidity(chain_id)
        );

        let (gas, liquidity) = match (gas, liquidity) {
            (Ok(Some(gas)), Ok(Some(liquidity))) => (gas, liquidity),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Signal read failed for chain {}: {}", chain_id, e);
                self.health.record_outage(chain_id);
                return None;
            }
            _ => {
                debug!("No signal known for chain {}", chain_id);
                return None;
            }
        };

        let observed_at = gas.observed_at.min(liquidity.observed_at);
        if now - observed_at > self.freshness_window {
            self.health.record_stale(chain_id);
        } else {
            self.health.record_recovery(chain_id);
        }

        let bridge_fee = if chain_id == request.source_chain {
            0
        } else {
            self.fees
                .get(&chain_id)
                .map(|fee| fee.for_amount(request.amount))
                .unwrap_or(0)
        };

        Some(ChainSignal {
            chain_id,
            gas_price: gas.value,
            bridge_fee,
            liquidity: liquidity.value,
            observed_at,
        })
    }
}
