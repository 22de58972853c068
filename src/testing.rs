//! Fake collaborators and fixtures shared by unit tests

use crate::adapters::{
    BridgeAdapter, BridgeRef, BurnAdapter, BurnAttestation, FulfillmentStatus, IntentParams,
    RefundParams,
};
use crate::config::OrchestratorConfig;
use crate::coordination::{Collaborators, Intent, IntentNonce};
use crate::error::{RouterError, RouterResult};
use crate::state::{AuditLedger, AuditQuery, AuditRecord, InMemoryLedger};
use crate::types::{ChainId, Route, RouteDecision, SwapRequest};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const SOURCE: ChainId = 1;
pub const DESTINATION: ChainId = 8453;

pub fn orchestrator_config() -> OrchestratorConfig {
    OrchestratorConfig {
        max_burn_retries: 2,
        max_submit_retries: 2,
        tick_interval_ms: 10,
        confirmation_window_secs: 60,
        audit_append_attempts: 2,
        audit_retry_delay_ms: 1,
        event_queue_depth: 16,
        deadlines: Default::default(),
    }
}

pub fn cross_chain_decision(request: &SwapRequest, now: DateTime<Utc>) -> RouteDecision {
    RouteDecision {
        request_id: request.id,
        source_chain: request.source_chain,
        route: Route::CrossChain {
            chain_id: DESTINATION,
        },
        reason: crate::types::DecisionReason::Savings,
        estimated_savings: 330,
        threshold: 100,
        local_cost: Some(500),
        decided_at: now,
        considered: Vec::new(),
        rejected: Vec::new(),
    }
}

pub fn intent(amount: u128, now: DateTime<Utc>) -> Intent {
    let request = SwapRequest::new("0xrecipient", amount, SOURCE);
    let decision = cross_chain_decision(&request, now);
    Intent::new(&request, &decision, now).unwrap()
}

pub fn collaborators(
    burn: Arc<dyn BurnAdapter>,
    bridge: Arc<dyn BridgeAdapter>,
    ledger: Arc<InMemoryLedger>,
) -> Collaborators {
    Collaborators {
        burn,
        bridge,
        ledger: ledger.clone(),
        store: ledger,
    }
}

/// Burn service that attests the requested amount after `pending` calls
pub struct FakeBurn {
    pub calls: AtomicUsize,
    pending: usize,
    reject: bool,
}

impl FakeBurn {
    pub fn attesting() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            pending: 0,
            reject: false,
        }
    }

    pub fn pending_for(calls: usize) -> Self {
        Self {
            pending: calls,
            ..Self::attesting()
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::attesting()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BurnAdapter for FakeBurn {
    async fn burn(
        &self,
        amount: u128,
        _destination_chain: ChainId,
        nonce: &IntentNonce,
    ) -> RouterResult<Option<BurnAttestation>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(RouterError::BurnRejected("insufficient allowance".to_string()));
        }
        if call < self.pending {
            return Ok(None);
        }
        Ok(Some(BurnAttestation {
            nonce: *nonce,
            amount,
            attestation: "0xfeed".to_string(),
        }))
    }
}

/// Bridge that replays scripted fulfillment statuses, repeating the last one
pub struct FakeBridge {
    pub submissions: AtomicUsize,
    pub polls: AtomicUsize,
    pub refunds: AtomicUsize,
    statuses: Mutex<VecDeque<FulfillmentStatus>>,
    reject_submissions: bool,
    fail_refunds: bool,
}

impl FakeBridge {
    pub fn new(statuses: Vec<FulfillmentStatus>) -> Self {
        Self {
            submissions: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            refunds: AtomicUsize::new(0),
            statuses: Mutex::new(statuses.into()),
            reject_submissions: false,
            fail_refunds: false,
        }
    }

    pub fn rejecting_submissions() -> Self {
        Self {
            reject_submissions: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn failing_refunds(statuses: Vec<FulfillmentStatus>) -> Self {
        Self {
            fail_refunds: true,
            ..Self::new(statuses)
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BridgeAdapter for FakeBridge {
    async fn submit_intent(&self, params: &IntentParams) -> RouterResult<BridgeRef> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        if self.reject_submissions {
            return Err(RouterError::SubmissionRejected("route paused".to_string()));
        }
        Ok(BridgeRef(format!("ref-{}", params.request_id)))
    }

    async fn poll_fulfillment(&self, _bridge_ref: &BridgeRef) -> RouterResult<FulfillmentStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self
            .statuses
            .lock()
            .map_err(|_| RouterError::Internal("poisoned".to_string()))?;
        let status = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        Ok(status.unwrap_or(FulfillmentStatus::Pending))
    }

    async fn refund(&self, _params: &RefundParams) -> RouterResult<()> {
        self.refunds.fetch_add(1, Ordering::SeqCst);
        if self.fail_refunds {
            return Err(RouterError::Collaborator("bridge unreachable".to_string()));
        }
        Ok(())
    }
}

/// Ledger whose appends always fail
pub struct FailingLedger;

#[async_trait]
impl AuditLedger for FailingLedger {
    async fn append(&self, _record: &AuditRecord) -> RouterResult<()> {
        Err(RouterError::Internal("ledger offline".to_string()))
    }

    async fn query(&self, _query: AuditQuery) -> RouterResult<Vec<AuditRecord>> {
        Ok(Vec::new())
    }
}

/// Fixed gas and liquidity readings per chain, observed now
#[derive(Default)]
pub struct StaticSignals {
    gas: std::collections::HashMap<ChainId, u128>,
    liquidity: std::collections::HashMap<ChainId, u128>,
}

impl StaticSignals {
    pub fn with_chain(mut self, chain_id: ChainId, gas: u128, liquidity: u128) -> Self {
        self.gas.insert(chain_id, gas);
        self.liquidity.insert(chain_id, liquidity);
        self
    }
}

#[async_trait]
impl crate::adapters::GasPriceProvider for StaticSignals {
    async fn gas_price(
        &self,
        chain_id: ChainId,
    ) -> RouterResult<Option<crate::adapters::Observation<u128>>> {
        Ok(self
            .gas
            .get(&chain_id)
            .map(|v| crate::adapters::Observation::new(*v, Utc::now())))
    }
}

#[async_trait]
impl crate::adapters::LiquidityProvider for StaticSignals {
    async fn liquidity(
        &self,
        chain_id: ChainId,
    ) -> RouterResult<Option<crate::adapters::Observation<u128>>> {
        Ok(self
            .liquidity
            .get(&chain_id)
            .map(|v| crate::adapters::Observation::new(*v, Utc::now())))
    }
}

/// Ingress wired to in-memory collaborators. The source chain costs 500 and
/// the destination `remote_gas + 50`; burns never attest.
pub fn swap_router(ledger: Arc<InMemoryLedger>, remote_gas: u128) -> crate::service::SwapRouter {
    use crate::config::{HealthConfig, RoutingConfig};
    use crate::coordination::IntentOrchestrator;
    use crate::routing::{BridgeFee, ChainHealthMonitor, CostModel, RouteDecisionEngine, SignalCollector};

    let health = Arc::new(ChainHealthMonitor::new(&HealthConfig::default()));
    let signals = Arc::new(
        StaticSignals::default()
            .with_chain(SOURCE, 500, u64::MAX as u128)
            .with_chain(DESTINATION, remote_gas, u64::MAX as u128),
    );
    let collector = SignalCollector::new(signals.clone(), signals, health.clone(), 30)
        .with_chain(SOURCE, BridgeFee::default())
        .with_chain(DESTINATION, BridgeFee { flat: 50, bps: 0 });
    let engine = RouteDecisionEngine::new(
        CostModel::new(30),
        health.clone(),
        ledger.clone(),
        RoutingConfig {
            default_savings_threshold: 100,
            threshold_floor: 10,
            equality_band: 5,
            freshness_window_secs: 30,
            degraded_penalty_bps: 100,
        },
    );
    let orchestrator = Arc::new(IntentOrchestrator::new(
        collaborators(
            Arc::new(FakeBurn::pending_for(usize::MAX)),
            Arc::new(FakeBridge::new(Vec::new())),
            ledger.clone(),
        ),
        orchestrator_config(),
    ));

    crate::service::SwapRouter::new(collector, engine, orchestrator, ledger, health)
}
