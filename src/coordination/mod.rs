//! Cross-chain intent orchestration
//!
//! The orchestrator:
//! 1. Creates one intent per cross-chain route decision
//! 2. Runs a single worker per intent that drives its state machine
//! 3. Applies burn, fulfillment and settlement events with dedup by nonce
//! 4. Routes expired intents to the refund path

mod engine;
mod intent;
mod machine;

pub use engine::IntentOrchestrator;
pub use intent::{FailureReason, Intent, IntentId, IntentNonce, IntentOutcome, IntentState};
pub use machine::{Collaborators, IntentMachine};
