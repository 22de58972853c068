//! Intent model and its transition graph

use crate::adapters::BridgeRef;
use crate::error::{RouterError, RouterResult};
use crate::events::EventKind;
use crate::types::{ChainId, RequestId, RouteDecision, SwapRequest};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

const NONCE_DOMAIN: &[u8] = b"usdc-router/intent-nonce/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentId(pub Uuid);

impl IntentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IntentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Dedup key shared with the burn and bridge collaborators.
///
/// Derived from the request id, so every retry for a request reuses it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntentNonce(pub [u8; 32]);

impl IntentNonce {
    pub fn derive(request_id: &RequestId) -> Self {
        let mut hasher = Keccak256::new();
        hasher.update(NONCE_DOMAIN);
        hasher.update(request_id.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim_start_matches("0x"), &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for IntentNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for IntentNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IntentNonce({})", self.to_hex())
    }
}

impl Serialize for IntentNonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for IntentNonce {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        IntentNonce::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentState {
    Created,
    BurnInitiated,
    BurnConfirmed,
    IntentSubmitted,
    AwaitingFulfillment,
    Fulfilled,
    Completed,
    TimedOut,
    RefundInitiated,
    Refunded,
    Failed,
}

impl IntentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntentState::Completed | IntentState::Refunded | IntentState::Failed
        )
    }

    /// States whose deadline routes to the refund path. Once fulfilled the
    /// minted funds exist on the destination, so a refund would double-pay.
    pub fn can_time_out(&self) -> bool {
        matches!(
            self,
            IntentState::Created
                | IntentState::BurnInitiated
                | IntentState::BurnConfirmed
                | IntentState::IntentSubmitted
                | IntentState::AwaitingFulfillment
        )
    }

    /// Self-loops used by bounded retries
    pub fn is_retry_state(&self) -> bool {
        matches!(self, IntentState::BurnInitiated | IntentState::BurnConfirmed)
    }

    pub fn can_transition_to(&self, next: IntentState) -> bool {
        use IntentState::*;

        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        if next == TimedOut {
            return self.can_time_out();
        }
        if next == *self {
            return self.is_retry_state();
        }

        matches!(
            (self, next),
            (Created, BurnInitiated)
                | (BurnInitiated, BurnConfirmed)
                | (BurnConfirmed, IntentSubmitted)
                | (IntentSubmitted, AwaitingFulfillment)
                | (AwaitingFulfillment, Fulfilled)
                | (Fulfilled, Completed)
                | (TimedOut, RefundInitiated)
                | (RefundInitiated, Refunded)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentState::Created => "created",
            IntentState::BurnInitiated => "burn_initiated",
            IntentState::BurnConfirmed => "burn_confirmed",
            IntentState::IntentSubmitted => "intent_submitted",
            IntentState::AwaitingFulfillment => "awaiting_fulfillment",
            IntentState::Fulfilled => "fulfilled",
            IntentState::Completed => "completed",
            IntentState::TimedOut => "timed_out",
            IntentState::RefundInitiated => "refund_initiated",
            IntentState::Refunded => "refunded",
            IntentState::Failed => "failed",
        }
    }
}

impl fmt::Display for IntentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    BurnRejected { message: String },
    SubmissionRejected { message: String },
    ConservationMismatch {
        #[serde(with = "crate::types::amount")]
        burned: u128,
        #[serde(with = "crate::types::amount")]
        minted: u128,
    },
    /// Attested burn differs from the amount requested
    BurnAmountMismatch {
        #[serde(with = "crate::types::amount")]
        requested: u128,
        #[serde(with = "crate::types::amount")]
        burned: u128,
    },
    RefundRejected { message: String },
    /// Refund path did not finish before its deadline
    RefundTimedOut,
    Disputed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IntentOutcome {
    Completed,
    Refunded,
    Failed { reason: FailureReason },
}

impl IntentOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            IntentOutcome::Completed => "completed",
            IntentOutcome::Refunded => "refunded",
            IntentOutcome::Failed { .. } => "failed",
        }
    }
}

/// The cross-chain unit of work, owned by exactly one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub id: IntentId,
    pub request_id: RequestId,
    pub requester: String,
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub amount: u128,
    pub state: IntentState,
    pub nonce: IntentNonce,
    /// Retries spent in the current retry state
    pub retry_count: u32,
    pub bridge_ref: Option<BridgeRef>,
    pub attestation: Option<String>,
    pub burned_amount: Option<u128>,
    pub minted_amount: Option<u128>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state_entered_at: DateTime<Utc>,
    pub outcome: Option<IntentOutcome>,
    /// Events already applied, for idempotent re-delivery
    #[serde(default)]
    pub processed_events: BTreeSet<EventKind>,
}

impl Intent {
    /// Create the intent for a cross-chain decision
    pub fn new(
        request: &SwapRequest,
        decision: &RouteDecision,
        now: DateTime<Utc>,
    ) -> RouterResult<Self> {
        let destination_chain = decision.destination().ok_or_else(|| {
            RouterError::Internal(format!(
                "Request {} was routed locally, no intent to create",
                request.id
            ))
        })?;

        if decision.request_id != request.id {
            return Err(RouterError::Internal(format!(
                "Decision {} does not belong to request {}",
                decision.request_id, request.id
            )));
        }

        Ok(Self {
            id: IntentId::new(),
            request_id: request.id,
            requester: request.requester.clone(),
            source_chain: request.source_chain,
            destination_chain,
            amount: request.amount,
            state: IntentState::Created,
            nonce: IntentNonce::derive(&request.id),
            retry_count: 0,
            bridge_ref: None,
            attestation: None,
            burned_amount: None,
            minted_amount: None,
            created_at: now,
            updated_at: now,
            state_entered_at: now,
            outcome: None,
            processed_events: BTreeSet::new(),
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use IntentState::*;

    const ALL: [IntentState; 11] = [
        Created,
        BurnInitiated,
        BurnConfirmed,
        IntentSubmitted,
        AwaitingFulfillment,
        Fulfilled,
        Completed,
        TimedOut,
        RefundInitiated,
        Refunded,
        Failed,
    ];

    #[test]
    fn test_happy_path_is_allowed() {
        let path = [
            Created,
            BurnInitiated,
            BurnConfirmed,
            IntentSubmitted,
            AwaitingFulfillment,
            Fulfilled,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for from in [Completed, Refunded, Failed] {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_no_backward_transitions() {
        assert!(!BurnConfirmed.can_transition_to(BurnInitiated));
        assert!(!AwaitingFulfillment.can_transition_to(IntentSubmitted));
        assert!(!Fulfilled.can_transition_to(AwaitingFulfillment));
        assert!(!RefundInitiated.can_transition_to(TimedOut));
    }

    #[test]
    fn test_only_retry_states_self_loop() {
        for state in ALL {
            let expected = matches!(state, BurnInitiated | BurnConfirmed);
            assert_eq!(state.can_transition_to(state), expected, "{}", state);
        }
    }

    #[test]
    fn test_fulfilled_cannot_time_out() {
        assert!(!Fulfilled.can_transition_to(TimedOut));
        assert!(AwaitingFulfillment.can_transition_to(TimedOut));
        assert!(TimedOut.can_transition_to(RefundInitiated));
        assert!(!TimedOut.can_transition_to(Completed));
    }

    #[test]
    fn test_nonce_is_derived_from_request_id() {
        let id = RequestId::new();
        assert_eq!(IntentNonce::derive(&id), IntentNonce::derive(&id));
        assert_ne!(IntentNonce::derive(&id), IntentNonce::derive(&RequestId::new()));
    }

    #[test]
    fn test_nonce_hex_serde() {
        let nonce = IntentNonce::derive(&RequestId::new());
        let json = serde_json::to_string(&nonce).unwrap();
        assert!(json.starts_with("\"0x"));
        let back: IntentNonce = serde_json::from_str(&json).unwrap();
        assert_eq!(back, nonce);
    }

    #[test]
    fn test_failed_snapshot_round_trips() {
        let now = Utc::now();
        let mut intent = crate::testing::intent(1_000, now);
        intent.state = Failed;
        intent.burned_amount = Some(1_000);
        intent.minted_amount = Some(999);
        intent.outcome = Some(IntentOutcome::Failed {
            reason: FailureReason::ConservationMismatch {
                burned: 1_000,
                minted: 999,
            },
        });

        let snapshot = serde_json::to_value(&intent).unwrap();
        assert_eq!(snapshot["outcome"]["reason"]["kind"], "conservation_mismatch");
        let restored: Intent = serde_json::from_value(snapshot).unwrap();
        assert_eq!(restored, intent);
    }
}
