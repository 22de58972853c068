//! Error types for the USDC router

use crate::types::ChainId;
use thiserror::Error;

/// Main error type for the router
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: ChainId, message: String },

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Signal for chain {chain_id} is stale ({age_secs}s old)")]
    StaleData { chain_id: ChainId, age_secs: i64 },

    #[error("No eligible chain for request {request_id}")]
    NoEligibleChain { request_id: String },

    #[error("Burn rejected: {0}")]
    BurnRejected(String),

    #[error("Intent submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("Refund rejected: {0}")]
    RefundRejected(String),

    #[error("Conservation mismatch: burned {burned}, minted {minted}")]
    ConservationMismatch { burned: u128, minted: u128 },

    #[error("Timeout waiting for {operation}")]
    TimeoutExceeded { operation: String },

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Audit append failed: {0}")]
    AuditAppend(String),

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: ChainId },

    #[error("Intent for request {request_id} not found")]
    IntentNotFound { request_id: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RouterError::ChainConnection { .. }
                | RouterError::TimeoutExceeded { .. }
                | RouterError::Collaborator(_)
                | RouterError::AuditAppend(_)
                | RouterError::BurnRejected(_)
                | RouterError::SubmissionRejected(_)
        )
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            RouterError::ConservationMismatch { .. }
                | RouterError::RefundRejected(_)
                | RouterError::AuditAppend(_)
        )
    }
}

/// Result type for router operations
pub type RouterResult<T> = Result<T, RouterError>;
