//! Per-chain cost estimation
//!
//! Pure and deterministic: every input, including the clock, is passed in.

use crate::config::ChainConfig;
use crate::error::{RouterError, RouterResult};
use crate::types::{ChainId, ChainSignal, Confidence, CostEstimate, SwapRequest, COST_CEILING};

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

const WEI_PER_NATIVE: u128 = 1_000_000_000_000_000_000;

/// Converts a chain's gas price into USDC execution cost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainCostParams {
    /// Gas used by one swap execution
    pub swap_gas_units: u64,
    /// Price of one native token (10^18 wei) in USDC minor units
    pub native_price_usdc: u128,
}

impl ChainCostParams {
    /// Gas price is already quoted in USDC minor units per swap
    pub const UNIT: ChainCostParams = ChainCostParams {
        swap_gas_units: 1,
        native_price_usdc: WEI_PER_NATIVE,
    };
}

impl From<&ChainConfig> for ChainCostParams {
    fn from(config: &ChainConfig) -> Self {
        Self {
            swap_gas_units: config.swap_gas_units,
            native_price_usdc: config.native_price_usdc,
        }
    }
}

/// Maps a chain signal to a total cost for a request
#[derive(Debug, Clone)]
pub struct CostModel {
    freshness_window: Duration,
    params: HashMap<ChainId, ChainCostParams>,
}

impl CostModel {
    pub fn new(freshness_window_secs: u64) -> Self {
        Self {
            freshness_window: Duration::seconds(freshness_window_secs as i64),
            params: HashMap::new(),
        }
    }

    pub fn with_chain(mut self, chain_id: ChainId, params: ChainCostParams) -> Self {
        self.params.insert(chain_id, params);
        self
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    fn params_for(&self, chain_id: ChainId) -> ChainCostParams {
        self.params
            .get(&chain_id)
            .copied()
            .unwrap_or(ChainCostParams::UNIT)
    }

    /// Estimate the total cost of executing `request` on the signal's chain
    pub fn estimate(
        &self,
        request: &SwapRequest,
        signal: &ChainSignal,
        now: DateTime<Utc>,
    ) -> CostEstimate {
        let params = self.params_for(signal.chain_id);

        let execution_cost = execution_cost(signal.gas_price, &params);
        let slippage = expected_slippage(request.amount, signal.liquidity);
        let bridge_fee = signal.bridge_fee.min(COST_CEILING);
        let total_cost = execution_cost
            .saturating_add(bridge_fee)
            .saturating_add(slippage)
            .min(COST_CEILING);

        // Observations from the future (clock skew) count as age zero
        let age = (now - signal.observed_at).max(Duration::zero());
        let confidence = if age > self.freshness_window {
            Confidence::Stale
        } else {
            Confidence::Fresh
        };

        CostEstimate {
            chain_id: signal.chain_id,
            execution_cost,
            bridge_fee,
            slippage,
            total_cost,
            penalty: 0,
            liquidity: signal.liquidity,
            confidence,
            signal_age_secs: age.num_seconds(),
        }
    }
}

impl CostEstimate {
    /// Error form of a stale estimate, for callers that must not use it
    pub fn ensure_fresh(&self) -> RouterResult<()> {
        match self.confidence {
            Confidence::Fresh => Ok(()),
            Confidence::Stale => Err(RouterError::StaleData {
                chain_id: self.chain_id,
                age_secs: self.signal_age_secs,
            }),
        }
    }

    /// Add a penalty of `bps` basis points of the total cost
    pub fn with_penalty_bps(mut self, bps: u32) -> Self {
        self.penalty = self.total_cost.saturating_mul(bps as u128) / 10_000;
        self
    }
}

fn execution_cost(gas_price: u128, params: &ChainCostParams) -> u128 {
    let gas_wei = gas_price.saturating_mul(params.swap_gas_units as u128);
    match gas_wei.checked_mul(params.native_price_usdc) {
        Some(product) => (product / WEI_PER_NATIVE).min(COST_CEILING),
        // Divide first on overflow, losing sub-unit precision only
        None => (gas_wei / WEI_PER_NATIVE)
            .saturating_mul(params.native_price_usdc)
            .min(COST_CEILING),
    }
}

/// Constant-product price impact: amount^2 / liquidity
fn expected_slippage(amount: u128, liquidity: u128) -> u128 {
    if liquidity == 0 {
        return COST_CEILING;
    }
    amount
        .checked_mul(amount)
        .map(|squared| squared / liquidity)
        .unwrap_or(COST_CEILING)
        .min(COST_CEILING)
}
