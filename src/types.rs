//! Core value types shared by routing and orchestration
//!
//! All amounts and costs are integer USDC minor units (6 decimals).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// EVM chain id
pub type ChainId = u64;

/// Upper bound for any computed cost. Keeps every amount representable as a
/// JSON number in audit records.
pub const COST_CEILING: u128 = u64::MAX as u128;

/// Serde adapter for `u128` amounts carried as `u64` on the wire.
///
/// Internally tagged enums and TOML cannot carry `u128`, so amounts in those
/// positions go through here. Values above `u64::MAX` fail to serialize.
pub mod amount {
    use serde::{ser, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        let value = u64::try_from(*value).map_err(|_| {
            <S::Error as ser::Error>::custom(format!("amount {} exceeds u64", value))
        })?;
        serializer.serialize_u64(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        u64::deserialize(deserializer).map(u128::from)
    }
}

/// Identifier of a swap request, referenced by every downstream record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

fn default_max_slippage_bps() -> u32 {
    50
}

/// A swap request as handed over by the on-chain hook. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    #[serde(default)]
    pub id: RequestId,
    pub requester: String,
    /// Input amount in USDC minor units
    pub amount: u128,
    pub source_chain: ChainId,
    /// Maximum acceptable slippage in basis points of `amount`
    #[serde(default = "default_max_slippage_bps")]
    pub max_slippage_bps: u32,
    #[serde(default)]
    pub destination_preference: Option<ChainId>,
    #[serde(default)]
    pub savings_threshold_override: Option<u128>,
}

impl SwapRequest {
    pub fn new(requester: impl Into<String>, amount: u128, source_chain: ChainId) -> Self {
        Self {
            id: RequestId::new(),
            requester: requester.into(),
            amount,
            source_chain,
            max_slippage_bps: default_max_slippage_bps(),
            destination_preference: None,
            savings_threshold_override: None,
        }
    }

    pub fn with_id(mut self, id: RequestId) -> Self {
        self.id = id;
        self
    }

    pub fn with_max_slippage_bps(mut self, bps: u32) -> Self {
        self.max_slippage_bps = bps;
        self
    }

    pub fn with_destination_preference(mut self, chain_id: ChainId) -> Self {
        self.destination_preference = Some(chain_id);
        self
    }

    pub fn with_savings_threshold(mut self, threshold: u128) -> Self {
        self.savings_threshold_override = Some(threshold);
        self
    }

    /// Largest slippage cost this request tolerates
    pub fn slippage_budget(&self) -> u128 {
        self.amount.saturating_mul(self.max_slippage_bps as u128) / 10_000
    }
}

/// Per-chain, per-request snapshot of cost signals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSignal {
    pub chain_id: ChainId,
    /// Gas price in wei per gas unit
    pub gas_price: u128,
    /// Bridge fee quoted for this request, zero on the local chain
    pub bridge_fee: u128,
    /// Available USDC liquidity
    pub liquidity: u128,
    /// Oldest observation time among the inputs
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Fresh,
    Stale,
}

/// Cost of executing a request on one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub chain_id: ChainId,
    pub execution_cost: u128,
    pub bridge_fee: u128,
    pub slippage: u128,
    pub total_cost: u128,
    /// Health penalty added on degraded chains
    #[serde(default)]
    pub penalty: u128,
    pub liquidity: u128,
    pub confidence: Confidence,
    /// Age of the underlying signal in seconds
    pub signal_age_secs: i64,
}

impl CostEstimate {
    pub fn is_fresh(&self) -> bool {
        self.confidence == Confidence::Fresh
    }

    /// Cost used for ranking: total plus any health penalty
    pub fn effective_cost(&self) -> u128 {
        self.total_cost.saturating_add(self.penalty).min(COST_CEILING)
    }
}

/// Where a request executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Route {
    Local,
    CrossChain { chain_id: ChainId },
}

impl Route {
    pub fn is_cross_chain(&self) -> bool {
        matches!(self, Route::CrossChain { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Route::Local => "local",
            Route::CrossChain { .. } => "cross_chain",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Savings met the threshold
    Savings,
    BelowThreshold,
    NoEligibleChain,
    /// Every remote signal was stale
    StaleSignals,
    /// No usable signal for the source chain, savings cannot be measured
    LocalSignalUnavailable,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::Savings => "savings",
            DecisionReason::BelowThreshold => "below_threshold",
            DecisionReason::NoEligibleChain => "no_eligible_chain",
            DecisionReason::StaleSignals => "stale_signals",
            DecisionReason::LocalSignalUnavailable => "local_signal_unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    Unavailable,
    Stale,
    SlippageBound,
}

/// A remote chain that was excluded before ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRejection {
    pub chain_id: ChainId,
    pub reason: RejectionReason,
}

/// The routing outcome for one request. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub request_id: RequestId,
    pub source_chain: ChainId,
    pub route: Route,
    pub reason: DecisionReason,
    /// Local cost minus chosen remote cost, zero for local decisions
    pub estimated_savings: u128,
    pub threshold: u128,
    pub local_cost: Option<u128>,
    pub decided_at: DateTime<Utc>,
    pub considered: Vec<CostEstimate>,
    pub rejected: Vec<CandidateRejection>,
}

impl RouteDecision {
    pub fn destination(&self) -> Option<ChainId> {
        match self.route {
            Route::CrossChain { chain_id } => Some(chain_id),
            Route::Local => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slippage_budget() {
        let request = SwapRequest::new("0xabc", 1_000_000, 1).with_max_slippage_bps(30);
        assert_eq!(request.slippage_budget(), 3_000);
    }

    #[test]
    fn test_request_defaults_from_json() {
        let request: SwapRequest = serde_json::from_str(
            r#"{"requester":"0xabc","amount":1000,"source_chain":8453}"#,
        )
        .unwrap();
        assert_eq!(request.max_slippage_bps, 50);
        assert!(request.destination_preference.is_none());
        assert!(request.savings_threshold_override.is_none());
    }

    #[test]
    fn test_effective_cost_caps_at_ceiling() {
        let estimate = CostEstimate {
            chain_id: 10,
            execution_cost: 0,
            bridge_fee: 0,
            slippage: COST_CEILING,
            total_cost: COST_CEILING,
            penalty: 5,
            liquidity: 0,
            confidence: Confidence::Fresh,
            signal_age_secs: 0,
        };
        assert_eq!(estimate.effective_cost(), COST_CEILING);
    }
}
