//! Swap ingress
//!
//! `SwapRouter::submit` is what the on-chain hook calls. It returns the
//! route decision and, for cross-chain routes, the freshly opened intent.
//! It never waits for settlement.

use crate::coordination::{Intent, IntentOrchestrator};
use crate::error::{RouterError, RouterResult};
use crate::events::IntentEvent;
use crate::routing::{ChainHealth, ChainHealthMonitor, RouteDecisionEngine, SignalCollector};
use crate::state::{AuditKind, AuditLedger, AuditQuery, AuditRecord};
use crate::types::{RequestId, RouteDecision, SwapRequest};

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// What the caller gets back for a request
#[derive(Debug, Clone, Serialize)]
pub struct SwapReceipt {
    pub decision: RouteDecision,
    pub intent: Option<Intent>,
}

/// Once-only results for one request id
#[derive(Default)]
struct RequestSlot {
    decision: OnceCell<RouteDecision>,
    intent: OnceCell<Option<Intent>>,
}

pub struct SwapRouter {
    signals: SignalCollector,
    engine: RouteDecisionEngine,
    orchestrator: Arc<IntentOrchestrator>,
    ledger: Arc<dyn AuditLedger>,
    health: Arc<ChainHealthMonitor>,
    requests: DashMap<RequestId, Arc<RequestSlot>>,
}

impl SwapRouter {
    pub fn new(
        signals: SignalCollector,
        engine: RouteDecisionEngine,
        orchestrator: Arc<IntentOrchestrator>,
        ledger: Arc<dyn AuditLedger>,
        health: Arc<ChainHealthMonitor>,
    ) -> Self {
        Self {
            signals,
            engine,
            orchestrator,
            ledger,
            health,
            requests: DashMap::new(),
        }
    }

    /// Decide a route for the request and open its intent if cross-chain.
    ///
    /// Submitting the same request id again returns the original decision;
    /// concurrent submissions of one id wait for a single decision.
    pub async fn submit(&self, request: SwapRequest) -> RouterResult<SwapReceipt> {
        if request.amount == 0 {
            return Err(RouterError::InvalidRequest("amount must be positive".to_string()));
        }
        if request.requester.is_empty() {
            return Err(RouterError::InvalidRequest("requester is required".to_string()));
        }

        let slot = self.requests.entry(request.id).or_default().clone();
        let receipt = self.settle_slot(&slot, &request).await;

        // Later submissions are deduplicated by the audit log and the orchestrator
        self.requests
            .remove_if(&request.id, |_, current| Arc::ptr_eq(current, &slot));

        receipt
    }

    async fn settle_slot(&self, slot: &RequestSlot, request: &SwapRequest) -> RouterResult<SwapReceipt> {
        let decision = slot
            .decision
            .get_or_try_init(|| self.decide_once(request))
            .await?
            .clone();

        let intent = slot
            .intent
            .get_or_try_init(|| self.open_once(request, &decision))
            .await?
            .clone();

        Ok(SwapReceipt { decision, intent })
    }

    async fn decide_once(&self, request: &SwapRequest) -> RouterResult<RouteDecision> {
        if let Some(existing) = self.recorded_decision(&request.id).await? {
            debug!("Request {} already decided, reusing decision", request.id);
            return Ok(existing);
        }

        let signals = self.signals.collect(request).await;
        self.engine.analyze_optimal_route(request, &signals).await
    }

    async fn open_once(
        &self,
        request: &SwapRequest,
        decision: &RouteDecision,
    ) -> RouterResult<Option<Intent>> {
        if !decision.route.is_cross_chain() {
            return Ok(None);
        }

        if let Some(existing) = self.orchestrator.status(&request.id).await? {
            return Ok(Some(existing));
        }

        let intent = Intent::new(request, decision, decision.decided_at)?;
        let intent = self.orchestrator.open_intent(intent).await?;
        info!(
            "Request {} handed to intent {} for chain {}",
            request.id, intent.id, intent.destination_chain
        );
        Ok(Some(intent))
    }

    async fn recorded_decision(&self, request_id: &RequestId) -> RouterResult<Option<RouteDecision>> {
        let records = self.ledger.query(AuditQuery::Request(*request_id)).await?;
        records
            .into_iter()
            .find(|r| r.kind == AuditKind::Decision)
            .map(|r| {
                serde_json::from_value(r.detail)
                    .map_err(|e| RouterError::Internal(format!("Unreadable decision record: {}", e)))
            })
            .transpose()
    }

    /// Decision and current intent state for a request
    pub async fn status(&self, request_id: &RequestId) -> RouterResult<Option<SwapReceipt>> {
        let decision = match self
            .requests
            .get(request_id)
            .and_then(|slot| slot.decision.get().cloned())
        {
            Some(decision) => decision,
            None => match self.recorded_decision(request_id).await? {
                Some(decision) => decision,
                None => return Ok(None),
            },
        };

        let intent = if decision.route.is_cross_chain() {
            self.orchestrator.status(request_id).await?
        } else {
            None
        };

        Ok(Some(SwapReceipt { decision, intent }))
    }

    /// Every audit record for a request, in append order
    pub async fn audit_trail(&self, request_id: &RequestId) -> RouterResult<Vec<AuditRecord>> {
        self.ledger.query(AuditQuery::Request(*request_id)).await
    }

    /// Forward an external event to the request's intent
    pub async fn deliver_event(&self, request_id: &RequestId, event: IntentEvent) -> RouterResult<()> {
        self.orchestrator.deliver(request_id, event).await
    }

    pub fn chain_health(&self) -> Vec<ChainHealth> {
        self.health.snapshot()
    }

    pub fn open_intents(&self) -> usize {
        self.orchestrator.open_count()
    }
}
