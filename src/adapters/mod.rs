//! Collaborator interfaces consumed by the router
//!
//! Signal providers feed route decisions; burn and bridge adapters carry the
//! cross-chain leg. Concrete implementations live in `chain` (RPC signals)
//! and `adapters::http` (burn/bridge services).

pub mod http;

pub use http::{HttpBridgeAdapter, HttpBurnAdapter};

use crate::coordination::IntentNonce;
use crate::error::RouterResult;
use crate::types::{ChainId, RequestId};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value read from a chain together with when it was read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation<T> {
    pub value: T,
    pub observed_at: DateTime<Utc>,
}

impl<T> Observation<T> {
    pub fn new(value: T, observed_at: DateTime<Utc>) -> Self {
        Self { value, observed_at }
    }
}

/// Gas price source. `Ok(None)` means no value is known for the chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GasPriceProvider: Send + Sync {
    /// Gas price in wei per gas unit
    async fn gas_price(&self, chain_id: ChainId) -> RouterResult<Option<Observation<u128>>>;
}

/// USDC liquidity source. `Ok(None)` means no value is known for the chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LiquidityProvider: Send + Sync {
    async fn liquidity(&self, chain_id: ChainId) -> RouterResult<Option<Observation<u128>>>;
}

/// Proof that USDC was burned on the source chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnAttestation {
    pub nonce: IntentNonce,
    /// Amount actually burned
    pub amount: u128,
    /// Opaque attestation payload, hex encoded
    pub attestation: String,
}

/// Burn side of the burn/mint protocol.
///
/// `burn` must be safe to call repeatedly with the same nonce. `Ok(None)`
/// means the burn was accepted and the attestation is not available yet;
/// calling again later returns it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BurnAdapter: Send + Sync {
    async fn burn(
        &self,
        amount: u128,
        destination_chain: ChainId,
        nonce: &IntentNonce,
    ) -> RouterResult<Option<BurnAttestation>>;
}

/// Handle returned by the bridge for a submitted intent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BridgeRef(pub String);

impl fmt::Display for BridgeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentParams {
    pub request_id: RequestId,
    pub nonce: IntentNonce,
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub amount: u128,
    pub recipient: String,
    pub attestation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundParams {
    pub request_id: RequestId,
    pub nonce: IntentNonce,
    pub bridge_ref: Option<BridgeRef>,
    pub source_chain: ChainId,
    pub amount: u128,
    pub recipient: String,
}

/// Fulfillment progress as reported by the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FulfillmentStatus {
    /// Not yet picked up
    Pending,
    Acknowledged,
    Fulfilled {
        #[serde(with = "crate::types::amount")]
        minted_amount: u128,
    },
    Settled {
        #[serde(with = "crate::types::amount")]
        minted_amount: u128,
    },
    Rejected { reason: String },
}

/// Intent bridge (relayer network)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BridgeAdapter: Send + Sync {
    async fn submit_intent(&self, params: &IntentParams) -> RouterResult<BridgeRef>;

    async fn poll_fulfillment(&self, bridge_ref: &BridgeRef) -> RouterResult<FulfillmentStatus>;

    async fn refund(&self, params: &RefundParams) -> RouterResult<()>;
}
