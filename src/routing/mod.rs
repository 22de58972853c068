//! Route decision engine
//!
//! Handles:
//! - Per-chain cost estimation from gas, bridge fee and slippage
//! - Chain health tracking with debounced state changes
//! - Parallel signal collection
//! - Local versus cross-chain route selection

pub mod cost;
mod engine;
pub mod health;
mod signals;

pub use cost::{ChainCostParams, CostModel};
pub use engine::RouteDecisionEngine;
pub use health::{ChainHealth, ChainHealthMonitor, HealthState};
pub use signals::{BridgeFee, SignalCollector};
