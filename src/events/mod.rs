//! External intent events
//!
//! Events come from collaborator call results, fulfillment polling, and the
//! fulfillment webhook. They are queued per intent and applied in arrival
//! order by the intent's worker.

use crate::adapters::{BurnAttestation, FulfillmentStatus};
use crate::coordination::IntentNonce;

use serde::{Deserialize, Serialize};

/// Events that move an intent forward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntentEvent {
    /// Burn attestation received
    BurnAttested {
        nonce: IntentNonce,
        #[serde(with = "crate::types::amount")]
        amount: u128,
        attestation: String,
    },

    /// Bridge acknowledged the submitted intent
    SubmissionAcknowledged { nonce: IntentNonce },

    /// Relayer minted on the destination chain
    FulfillmentObserved {
        nonce: IntentNonce,
        #[serde(with = "crate::types::amount")]
        minted_amount: u128,
    },

    /// Fulfillment settled on the bridge
    SettlementConfirmed { nonce: IntentNonce },

    /// Fulfillment disputed inside the confirmation window
    Disputed { nonce: IntentNonce, reason: String },

    /// Bridge dropped the intent without fulfilling it
    BridgeRejected { nonce: IntentNonce, reason: String },
}

/// Dedup key for an event on one intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    BurnAttested,
    SubmissionAcknowledged,
    FulfillmentObserved,
    SettlementConfirmed,
    Disputed,
    BridgeRejected,
}

impl IntentEvent {
    pub fn nonce(&self) -> &IntentNonce {
        match self {
            IntentEvent::BurnAttested { nonce, .. } => nonce,
            IntentEvent::SubmissionAcknowledged { nonce } => nonce,
            IntentEvent::FulfillmentObserved { nonce, .. } => nonce,
            IntentEvent::SettlementConfirmed { nonce } => nonce,
            IntentEvent::Disputed { nonce, .. } => nonce,
            IntentEvent::BridgeRejected { nonce, .. } => nonce,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            IntentEvent::BurnAttested { .. } => EventKind::BurnAttested,
            IntentEvent::SubmissionAcknowledged { .. } => EventKind::SubmissionAcknowledged,
            IntentEvent::FulfillmentObserved { .. } => EventKind::FulfillmentObserved,
            IntentEvent::SettlementConfirmed { .. } => EventKind::SettlementConfirmed,
            IntentEvent::Disputed { .. } => EventKind::Disputed,
            IntentEvent::BridgeRejected { .. } => EventKind::BridgeRejected,
        }
    }

    /// Get event name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            IntentEvent::BurnAttested { .. } => "burn_attested",
            IntentEvent::SubmissionAcknowledged { .. } => "submission_acknowledged",
            IntentEvent::FulfillmentObserved { .. } => "fulfillment_observed",
            IntentEvent::SettlementConfirmed { .. } => "settlement_confirmed",
            IntentEvent::Disputed { .. } => "disputed",
            IntentEvent::BridgeRejected { .. } => "bridge_rejected",
        }
    }

    /// Events implied by a polled fulfillment status, in application order
    pub fn from_fulfillment(nonce: IntentNonce, status: FulfillmentStatus) -> Vec<IntentEvent> {
        match status {
            FulfillmentStatus::Pending => Vec::new(),
            FulfillmentStatus::Acknowledged => {
                vec![IntentEvent::SubmissionAcknowledged { nonce }]
            }
            FulfillmentStatus::Fulfilled { minted_amount } => vec![
                IntentEvent::SubmissionAcknowledged { nonce },
                IntentEvent::FulfillmentObserved {
                    nonce,
                    minted_amount,
                },
            ],
            FulfillmentStatus::Settled { minted_amount } => vec![
                IntentEvent::SubmissionAcknowledged { nonce },
                IntentEvent::FulfillmentObserved {
                    nonce,
                    minted_amount,
                },
                IntentEvent::SettlementConfirmed { nonce },
            ],
            FulfillmentStatus::Rejected { reason } => {
                vec![IntentEvent::BridgeRejected { nonce, reason }]
            }
        }
    }
}

impl From<BurnAttestation> for IntentEvent {
    fn from(attestation: BurnAttestation) -> Self {
        IntentEvent::BurnAttested {
            nonce: attestation.nonce,
            amount: attestation.amount,
            attestation: attestation.attestation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestId;

    #[test]
    fn test_settled_expands_in_order() {
        let nonce = IntentNonce::derive(&RequestId::new());
        let events =
            IntentEvent::from_fulfillment(nonce, FulfillmentStatus::Settled { minted_amount: 7 });

        let kinds: Vec<_> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::SubmissionAcknowledged,
                EventKind::FulfillmentObserved,
                EventKind::SettlementConfirmed
            ]
        );
    }

    #[test]
    fn test_webhook_payload() {
        let nonce = IntentNonce::derive(&RequestId::new());
        let body = format!(
            r#"{{"type":"fulfillment_observed","nonce":"{}","minted_amount":1000}}"#,
            nonce
        );

        let event: IntentEvent = serde_json::from_str(&body).unwrap();
        assert_eq!(
            event,
            IntentEvent::FulfillmentObserved {
                nonce,
                minted_amount: 1000
            }
        );
        assert_eq!(event.name(), "fulfillment_observed");
    }
}
