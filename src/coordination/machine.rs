//! Per-intent state machine
//!
//! An `IntentMachine` owns one intent and is driven by its worker: `step`
//! performs the collaborator call that belongs to the current state, `apply`
//! folds in an external event. Every transition is appended to the audit
//! ledger before the in-memory state changes, so a failed append leaves the
//! intent where it was and the step is retried on the next tick.

use super::intent::{FailureReason, Intent, IntentOutcome, IntentState};
use crate::adapters::{BridgeAdapter, BurnAdapter, IntentParams, RefundParams};
use crate::config::{OrchestratorConfig, StateDeadlines};
use crate::error::{RouterError, RouterResult};
use crate::events::IntentEvent;
use crate::state::{append_durable, AppendPolicy, AuditLedger, AuditRecord, IntentStore};

use chrono::{DateTime, Utc};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Everything an intent talks to
#[derive(Clone)]
pub struct Collaborators {
    pub burn: Arc<dyn BurnAdapter>,
    pub bridge: Arc<dyn BridgeAdapter>,
    pub ledger: Arc<dyn AuditLedger>,
    pub store: Arc<dyn IntentStore>,
}

pub struct IntentMachine {
    intent: Intent,
    deps: Collaborators,
    config: OrchestratorConfig,
    deadlines: StateDeadlines,
    append_policy: AppendPolicy,
}

impl IntentMachine {
    pub fn new(
        intent: Intent,
        deps: Collaborators,
        config: OrchestratorConfig,
        deadlines: StateDeadlines,
    ) -> Self {
        let append_policy = AppendPolicy::from(&config);

        Self {
            intent,
            deps,
            config,
            deadlines,
            append_policy,
        }
    }

    pub fn intent(&self) -> &Intent {
        &self.intent
    }

    pub fn is_terminal(&self) -> bool {
        self.intent.is_terminal()
    }

    /// When the current state expires. For Fulfilled this is the end of the
    /// confirmation window.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let d = &self.deadlines;
        let secs = match self.intent.state {
            IntentState::Created => d.created_secs,
            IntentState::BurnInitiated => d.burn_initiated_secs,
            IntentState::BurnConfirmed => d.burn_confirmed_secs,
            IntentState::IntentSubmitted => d.intent_submitted_secs,
            IntentState::AwaitingFulfillment => d.awaiting_fulfillment_secs,
            IntentState::Fulfilled => self.config.confirmation_window_secs,
            IntentState::RefundInitiated => d.refund_initiated_secs,
            IntentState::TimedOut
            | IntentState::Completed
            | IntentState::Refunded
            | IntentState::Failed => return None,
        };
        Some(self.intent.state_entered_at + chrono::Duration::seconds(secs as i64))
    }

    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline().map(|d| now >= d).unwrap_or(false)
    }

    /// Drive the intent as far as the collaborators allow right now
    pub async fn step(&mut self, now: DateTime<Utc>) -> RouterResult<()> {
        if self.is_terminal() {
            return Ok(());
        }

        if self.expired(now) {
            let state = self.intent.state;
            if state.can_time_out() {
                self.transition(
                    IntentState::TimedOut,
                    "deadline_exceeded",
                    json!({ "state": state, "entered_at": self.intent.state_entered_at }),
                    now,
                )
                .await?;
            } else if state == IntentState::Fulfilled {
                return self
                    .transition(
                        IntentState::Completed,
                        "confirmation_window_elapsed",
                        json!({ "window_secs": self.config.confirmation_window_secs }),
                        now,
                    )
                    .await;
            } else if state == IntentState::RefundInitiated {
                return self
                    .fail(FailureReason::RefundTimedOut, "refund_deadline_exceeded", now)
                    .await;
            }
        }

        match self.intent.state {
            IntentState::Created => {
                self.transition(
                    IntentState::BurnInitiated,
                    "burn_requested",
                    json!({ "amount": self.intent.amount }),
                    now,
                )
                .await?;
                self.request_burn(now).await
            }
            IntentState::BurnInitiated => self.request_burn(now).await,
            IntentState::BurnConfirmed => self.submit_intent(now).await,
            IntentState::IntentSubmitted
            | IntentState::AwaitingFulfillment
            | IntentState::Fulfilled => self.poll_fulfillment(now).await,
            IntentState::TimedOut => {
                self.transition(
                    IntentState::RefundInitiated,
                    "refund_requested",
                    json!({ "bridge_ref": self.intent.bridge_ref }),
                    now,
                )
                .await?;
                self.request_refund(now).await
            }
            IntentState::RefundInitiated => self.request_refund(now).await,
            IntentState::Completed | IntentState::Refunded | IntentState::Failed => Ok(()),
        }
    }

    /// Apply an external event. Returns whether it changed the intent.
    ///
    /// Events for another nonce, events already applied, and events that do
    /// not fit the current state are ignored.
    pub async fn apply(&mut self, event: IntentEvent, now: DateTime<Utc>) -> RouterResult<bool> {
        if event.nonce() != &self.intent.nonce {
            warn!(
                "Intent {} ignoring {} for foreign nonce {}",
                self.intent.id,
                event.name(),
                event.nonce()
            );
            return Ok(false);
        }

        let kind = event.kind();
        if self.is_terminal() || self.intent.processed_events.contains(&kind) {
            debug!(
                "Intent {} ignoring repeated or late {}",
                self.intent.id,
                event.name()
            );
            return Ok(false);
        }

        let state = self.intent.state;
        let mut next = self.intent.clone();
        next.processed_events.insert(kind);

        match (state, event) {
            (
                IntentState::BurnInitiated,
                IntentEvent::BurnAttested {
                    amount, attestation, ..
                },
            ) => {
                next.burned_amount = Some(amount);

                if amount != self.intent.amount {
                    error!(
                        "Intent {} burn attested {} but {} was requested",
                        self.intent.id, amount, self.intent.amount
                    );
                    self.commit(
                        next,
                        IntentState::Failed,
                        "burn_amount_mismatch",
                        json!({ "requested_amount": self.intent.amount, "burned_amount": amount }),
                        Some(FailureReason::BurnAmountMismatch {
                            requested: self.intent.amount,
                            burned: amount,
                        }),
                        now,
                    )
                    .await?;
                    return Ok(true);
                }

                next.attestation = Some(attestation.clone());
                self.commit(
                    next,
                    IntentState::BurnConfirmed,
                    "burn_attested",
                    json!({ "burned_amount": amount, "attestation": attestation }),
                    None,
                    now,
                )
                .await?;
            }

            (IntentState::IntentSubmitted, IntentEvent::SubmissionAcknowledged { .. }) => {
                self.commit(
                    next,
                    IntentState::AwaitingFulfillment,
                    "submission_acknowledged",
                    json!({ "bridge_ref": self.intent.bridge_ref }),
                    None,
                    now,
                )
                .await?;
            }

            (IntentState::AwaitingFulfillment, IntentEvent::FulfillmentObserved { minted_amount, .. }) => {
                let burned = self.intent.burned_amount.unwrap_or(self.intent.amount);
                next.minted_amount = Some(minted_amount);

                if minted_amount != burned {
                    let mismatch = RouterError::ConservationMismatch {
                        burned,
                        minted: minted_amount,
                    };
                    error!("Intent {}: {}", self.intent.id, mismatch);
                    self.commit(
                        next,
                        IntentState::Failed,
                        "conservation_mismatch",
                        json!({ "burned_amount": burned, "minted_amount": minted_amount }),
                        Some(FailureReason::ConservationMismatch {
                            burned,
                            minted: minted_amount,
                        }),
                        now,
                    )
                    .await?;
                } else {
                    self.commit(
                        next,
                        IntentState::Fulfilled,
                        "fulfillment_observed",
                        json!({ "burned_amount": burned, "minted_amount": minted_amount }),
                        None,
                        now,
                    )
                    .await?;
                }
            }

            (IntentState::Fulfilled, IntentEvent::SettlementConfirmed { .. }) => {
                self.commit(
                    next,
                    IntentState::Completed,
                    "settlement_confirmed",
                    json!({ "minted_amount": self.intent.minted_amount }),
                    None,
                    now,
                )
                .await?;
            }

            (IntentState::Fulfilled, IntentEvent::Disputed { reason, .. }) => {
                self.commit(
                    next,
                    IntentState::Failed,
                    "fulfillment_disputed",
                    json!({ "reason": reason }),
                    Some(FailureReason::Disputed { reason }),
                    now,
                )
                .await?;
            }

            (
                IntentState::IntentSubmitted | IntentState::AwaitingFulfillment,
                IntentEvent::BridgeRejected { reason, .. },
            ) => {
                warn!("Intent {} rejected by bridge: {}", self.intent.id, reason);
                self.commit(
                    next,
                    IntentState::TimedOut,
                    "bridge_rejected",
                    json!({ "reason": reason }),
                    None,
                    now,
                )
                .await?;
            }

            (state, event) => {
                debug!(
                    "Intent {} in {} has no use for {}",
                    self.intent.id,
                    state,
                    event.name()
                );
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn request_burn(&mut self, now: DateTime<Utc>) -> RouterResult<()> {
        let burn = self.deps.burn.clone();
        let nonce = self.intent.nonce;
        let result = self
            .bounded(
                "burn",
                now,
                burn.burn(self.intent.amount, self.intent.destination_chain, &nonce),
            )
            .await;

        match result {
            Ok(Some(attestation)) => {
                self.apply(IntentEvent::from(attestation), now).await?;
                Ok(())
            }
            Ok(None) => {
                debug!("Intent {} burn accepted, attestation pending", self.intent.id);
                Ok(())
            }
            Err(RouterError::BurnRejected(message)) => {
                self.retry_or_fail(
                    self.config.max_burn_retries,
                    "burn_rejected",
                    FailureReason::BurnRejected { message },
                    now,
                )
                .await
            }
            Err(e) => {
                warn!("Intent {} burn call failed: {}", self.intent.id, e);
                Ok(())
            }
        }
    }

    async fn submit_intent(&mut self, now: DateTime<Utc>) -> RouterResult<()> {
        let attestation = self.intent.attestation.clone().ok_or_else(|| {
            RouterError::Internal(format!(
                "Intent {} confirmed without attestation",
                self.intent.id
            ))
        })?;

        let params = IntentParams {
            request_id: self.intent.request_id,
            nonce: self.intent.nonce,
            source_chain: self.intent.source_chain,
            destination_chain: self.intent.destination_chain,
            amount: self.intent.burned_amount.unwrap_or(self.intent.amount),
            recipient: self.intent.requester.clone(),
            attestation,
        };

        let bridge = self.deps.bridge.clone();
        match self
            .bounded("submit_intent", now, bridge.submit_intent(&params))
            .await
        {
            Ok(bridge_ref) => {
                let mut next = self.intent.clone();
                next.bridge_ref = Some(bridge_ref.clone());
                self.commit(
                    next,
                    IntentState::IntentSubmitted,
                    "intent_submitted",
                    json!({ "bridge_ref": bridge_ref }),
                    None,
                    now,
                )
                .await
            }
            Err(RouterError::SubmissionRejected(message)) => {
                self.retry_or_fail(
                    self.config.max_submit_retries,
                    "submission_rejected",
                    FailureReason::SubmissionRejected { message },
                    now,
                )
                .await
            }
            Err(e) => {
                warn!("Intent {} submission failed: {}", self.intent.id, e);
                Ok(())
            }
        }
    }

    async fn poll_fulfillment(&mut self, now: DateTime<Utc>) -> RouterResult<()> {
        let Some(bridge_ref) = self.intent.bridge_ref.clone() else {
            warn!("Intent {} has no bridge reference to poll", self.intent.id);
            return Ok(());
        };

        let bridge = self.deps.bridge.clone();
        match self
            .bounded("poll_fulfillment", now, bridge.poll_fulfillment(&bridge_ref))
            .await
        {
            Ok(status) => {
                for event in IntentEvent::from_fulfillment(self.intent.nonce, status) {
                    self.apply(event, now).await?;
                }
                Ok(())
            }
            Err(e) => {
                warn!("Intent {} fulfillment poll failed: {}", self.intent.id, e);
                Ok(())
            }
        }
    }

    async fn request_refund(&mut self, now: DateTime<Utc>) -> RouterResult<()> {
        let params = RefundParams {
            request_id: self.intent.request_id,
            nonce: self.intent.nonce,
            bridge_ref: self.intent.bridge_ref.clone(),
            source_chain: self.intent.source_chain,
            amount: self.intent.burned_amount.unwrap_or(self.intent.amount),
            recipient: self.intent.requester.clone(),
        };

        let bridge = self.deps.bridge.clone();
        match self.bounded("refund", now, bridge.refund(&params)).await {
            Ok(()) => {
                self.transition(
                    IntentState::Refunded,
                    "refund_confirmed",
                    json!({ "amount": params.amount }),
                    now,
                )
                .await
            }
            // Never retried: a second refund could pay out twice
            Err(RouterError::RefundRejected(message)) => {
                error!(
                    "Intent {} refund rejected, operator action required: {}",
                    self.intent.id, message
                );
                self.fail(FailureReason::RefundRejected { message }, "refund_rejected", now)
                    .await
            }
            Err(e) => {
                warn!("Intent {} refund call failed: {}", self.intent.id, e);
                Ok(())
            }
        }
    }

    /// Run a collaborator call, bounded by what is left of the state deadline
    async fn bounded<T>(
        &self,
        operation: &'static str,
        now: DateTime<Utc>,
        call: impl Future<Output = RouterResult<T>>,
    ) -> RouterResult<T> {
        let limit = self
            .deadline()
            .and_then(|d| (d - now).to_std().ok())
            .unwrap_or(Duration::ZERO);

        match tokio::time::timeout(limit, call).await {
            Ok(Ok(value)) => {
                crate::metrics::record_collaborator_call(operation, "ok");
                Ok(value)
            }
            Ok(Err(e)) => {
                let result = match e {
                    RouterError::BurnRejected(_)
                    | RouterError::SubmissionRejected(_)
                    | RouterError::RefundRejected(_) => "rejected",
                    _ => "error",
                };
                crate::metrics::record_collaborator_call(operation, result);
                Err(e)
            }
            Err(_) => {
                crate::metrics::record_collaborator_call(operation, "timeout");
                Err(RouterError::TimeoutExceeded {
                    operation: operation.to_string(),
                })
            }
        }
    }

    async fn retry_or_fail(
        &mut self,
        max_retries: u32,
        trigger: &str,
        reason: FailureReason,
        now: DateTime<Utc>,
    ) -> RouterResult<()> {
        if self.intent.retry_count >= max_retries {
            warn!(
                "Intent {} exhausted {} retries in {}",
                self.intent.id, max_retries, self.intent.state
            );
            return self.fail(reason, trigger, now).await;
        }

        let state = self.intent.state;
        self.transition(
            state,
            trigger,
            json!({ "retry": self.intent.retry_count + 1, "max_retries": max_retries, "reason": reason }),
            now,
        )
        .await
    }

    async fn fail(
        &mut self,
        reason: FailureReason,
        trigger: &str,
        now: DateTime<Utc>,
    ) -> RouterResult<()> {
        let detail = json!({ "reason": reason });
        self.commit(
            self.intent.clone(),
            IntentState::Failed,
            trigger,
            detail,
            Some(reason),
            now,
        )
        .await
    }

    async fn transition(
        &mut self,
        to: IntentState,
        trigger: &str,
        detail: serde_json::Value,
        now: DateTime<Utc>,
    ) -> RouterResult<()> {
        self.commit(self.intent.clone(), to, trigger, detail, None, now)
            .await
    }

    /// Make `next` the current intent in state `to`, after the audit record
    /// for the move is durable
    async fn commit(
        &mut self,
        mut next: Intent,
        to: IntentState,
        trigger: &str,
        detail: serde_json::Value,
        failure: Option<FailureReason>,
        now: DateTime<Utc>,
    ) -> RouterResult<()> {
        let from = self.intent.state;
        if !from.can_transition_to(to) {
            return Err(RouterError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let record = AuditRecord::transition(&self.intent, to, trigger, detail, now);
        append_durable(self.deps.ledger.as_ref(), &record, &self.append_policy).await?;

        if to == from {
            next.retry_count = next.retry_count.saturating_add(1);
        } else {
            next.retry_count = 0;
            next.state_entered_at = now;
        }
        next.state = to;
        next.updated_at = now;
        next.outcome = match to {
            IntentState::Completed => Some(IntentOutcome::Completed),
            IntentState::Refunded => Some(IntentOutcome::Refunded),
            IntentState::Failed => failure.map(|reason| IntentOutcome::Failed { reason }),
            _ => None,
        };
        self.intent = next;

        crate::metrics::record_transition(from.as_str(), to.as_str());
        if let Some(outcome) = &self.intent.outcome {
            let elapsed = (now - self.intent.created_at).num_milliseconds() as f64 / 1000.0;
            crate::metrics::record_intent_outcome(
                self.intent.destination_chain,
                outcome.label(),
                elapsed,
            );
        }
        info!(
            "Intent {} {} -> {} ({})",
            self.intent.id, from, to, trigger
        );

        if let Err(e) = self.deps.store.save_intent(&self.intent).await {
            warn!("Failed to persist intent {} snapshot: {}", self.intent.id, e);
        }

        Ok(())
    }
}
