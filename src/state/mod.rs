//! Audit ledger and intent persistence
//!
//! Handles:
//! - Append-only audit records for decisions and intent transitions
//! - Intent snapshots for status queries and restart recovery
//! - In-memory and PostgreSQL backends

pub mod ledger;
mod manager;

pub use ledger::{
    append_durable, AppendPolicy, AuditKind, AuditLedger, AuditQuery, AuditRecord,
    InMemoryLedger, IntentStore,
};
pub use manager::{IntentStats, StateManager};
