//! Route decision engine
//!
//! Picks local execution or a single destination chain for each request.
//! `decide` is a pure function of the request, the signals, the current
//! health snapshot and the clock; `analyze_optimal_route` adds the audit
//! record.

use super::cost::CostModel;
use super::health::{ChainHealthMonitor, HealthState};
use crate::config::RoutingConfig;
use crate::error::{RouterError, RouterResult};
use crate::state::{append_durable, AppendPolicy, AuditLedger, AuditRecord};
use crate::types::{
    CandidateRejection, ChainId, ChainSignal, CostEstimate, DecisionReason, RejectionReason,
    Route, RouteDecision, SwapRequest,
};

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct RouteDecisionEngine {
    cost_model: CostModel,
    health: Arc<ChainHealthMonitor>,
    ledger: Arc<dyn AuditLedger>,
    config: RoutingConfig,
    append_policy: AppendPolicy,
}

impl RouteDecisionEngine {
    pub fn new(
        cost_model: CostModel,
        health: Arc<ChainHealthMonitor>,
        ledger: Arc<dyn AuditLedger>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            cost_model,
            health,
            ledger,
            config,
            append_policy: AppendPolicy::default(),
        }
    }

    pub fn with_append_policy(mut self, policy: AppendPolicy) -> Self {
        self.append_policy = policy;
        self
    }

    /// Request override may only lower the default, never below the floor
    pub fn effective_threshold(&self, request: &SwapRequest) -> u128 {
        let default = self.config.default_savings_threshold;
        match request.savings_threshold_override {
            Some(requested) => requested.min(default).max(self.config.threshold_floor),
            None => default,
        }
    }

    /// Decide and record the decision in the audit ledger
    pub async fn analyze_optimal_route(
        &self,
        request: &SwapRequest,
        candidate_signals: &[ChainSignal],
    ) -> RouterResult<RouteDecision> {
        let decision = self.decide(request, candidate_signals, Utc::now());

        let record = AuditRecord::decision(&decision)?;
        append_durable(self.ledger.as_ref(), &record, &self.append_policy).await?;

        crate::metrics::record_decision(&decision);
        info!(
            "Request {} routed {} ({}), savings {}",
            request.id,
            decision.route.label(),
            decision.reason.as_str(),
            decision.estimated_savings
        );

        Ok(decision)
    }

    pub fn decide(
        &self,
        request: &SwapRequest,
        candidate_signals: &[ChainSignal],
        now: DateTime<Utc>,
    ) -> RouteDecision {
        let threshold = self.effective_threshold(request);
        let mut considered = Vec::new();
        let mut rejected = Vec::new();

        let mut latest = latest_per_chain(candidate_signals);

        let local_estimate = latest
            .remove(&request.source_chain)
            .map(|s| self.cost_model.estimate(request, s, now));
        if let Some(estimate) = &local_estimate {
            considered.push(estimate.clone());
        }

        let mut fresh = Vec::new();
        let mut saw_stale = false;
        for signal in latest.into_values() {
            let health = match self.health.state(signal.chain_id) {
                Some(state) if state != HealthState::Unavailable => state,
                _ => {
                    rejected.push(CandidateRejection {
                        chain_id: signal.chain_id,
                        reason: RejectionReason::Unavailable,
                    });
                    continue;
                }
            };

            let mut estimate = self.cost_model.estimate(request, signal, now);
            if health == HealthState::Degraded {
                estimate = estimate.with_penalty_bps(self.config.degraded_penalty_bps);
            }
            considered.push(estimate.clone());

            if let Err(e) = estimate.ensure_fresh() {
                debug!("Request {}: {}", request.id, e);
                saw_stale = true;
                rejected.push(CandidateRejection {
                    chain_id: signal.chain_id,
                    reason: RejectionReason::Stale,
                });
                continue;
            }

            if estimate.slippage > request.slippage_budget() {
                rejected.push(CandidateRejection {
                    chain_id: signal.chain_id,
                    reason: RejectionReason::SlippageBound,
                });
                continue;
            }

            fresh.push(estimate);
        }

        let local = |reason: DecisionReason, local_cost: Option<u128>| RouteDecision {
            request_id: request.id,
            source_chain: request.source_chain,
            route: Route::Local,
            reason,
            estimated_savings: 0,
            threshold,
            local_cost,
            decided_at: now,
            considered: considered.clone(),
            rejected: rejected.clone(),
        };

        let local_cost = match local_estimate.as_ref().filter(|e| e.is_fresh()) {
            Some(estimate) => estimate.effective_cost(),
            None => return local(DecisionReason::LocalSignalUnavailable, None),
        };

        match select_remote(request, &fresh, local_cost, threshold, self.config.equality_band) {
            Ok(Some(chosen)) => RouteDecision {
                request_id: request.id,
                source_chain: request.source_chain,
                route: Route::CrossChain {
                    chain_id: chosen.chain_id,
                },
                reason: DecisionReason::Savings,
                estimated_savings: local_cost - chosen.effective_cost(),
                threshold,
                local_cost: Some(local_cost),
                decided_at: now,
                considered,
                rejected,
            },
            Ok(None) => local(DecisionReason::BelowThreshold, Some(local_cost)),
            Err(e) => {
                debug!("Request {} falls back to local: {}", request.id, e);
                let reason = if saw_stale {
                    DecisionReason::StaleSignals
                } else {
                    DecisionReason::NoEligibleChain
                };
                local(reason, Some(local_cost))
            }
        }
    }
}

/// One signal per chain, ordered by chain id. Duplicates resolve to the
/// freshest reading, then to the most expensive one, independent of input order.
fn latest_per_chain(signals: &[ChainSignal]) -> BTreeMap<ChainId, &ChainSignal> {
    let rank = |s: &ChainSignal| (s.observed_at, s.gas_price, s.bridge_fee, Reverse(s.liquidity));

    let mut latest: BTreeMap<ChainId, &ChainSignal> = BTreeMap::new();
    for signal in signals {
        latest
            .entry(signal.chain_id)
            .and_modify(|kept| {
                if rank(signal) > rank(*kept) {
                    *kept = signal;
                }
            })
            .or_insert(signal);
    }
    latest
}

/// Pick the destination among fresh remote estimates.
///
/// Returns `Ok(None)` when the cheapest remote does not save at least
/// `threshold`. Among chains that do, those within `equality_band` of the
/// cheapest tie; the request's preferred destination wins a tie, then the
/// deepest liquidity, then the lowest chain id.
fn select_remote<'a>(
    request: &SwapRequest,
    fresh: &'a [CostEstimate],
    local_cost: u128,
    threshold: u128,
    equality_band: u128,
) -> RouterResult<Option<&'a CostEstimate>> {
    let best_cost = fresh
        .iter()
        .map(|e| e.effective_cost())
        .min()
        .ok_or_else(|| RouterError::NoEligibleChain {
            request_id: request.id.to_string(),
        })?;

    let saves_enough =
        |cost: u128| cost <= local_cost && local_cost - cost >= threshold;

    if !saves_enough(best_cost) {
        return Ok(None);
    }

    let band_limit = best_cost.saturating_add(equality_band);
    let tied: Vec<&CostEstimate> = fresh
        .iter()
        .filter(|e| e.effective_cost() <= band_limit && saves_enough(e.effective_cost()))
        .collect();

    if let Some(preferred) = request.destination_preference {
        if let Some(estimate) = tied.iter().find(|e| e.chain_id == preferred) {
            return Ok(Some(*estimate));
        }
    }

    Ok(tied
        .into_iter()
        .min_by_key(|e| (Reverse(e.liquidity), e.chain_id)))
}
