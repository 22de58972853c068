//! USDC router - route decisions and cross-chain intent orchestration
//!
//! A swap request is priced against its source chain and every eligible
//! remote chain. When a remote chain saves more than the threshold, an
//! intent is opened and driven through burn, bridge submission and
//! fulfillment, falling back to a refund when a deadline passes.

pub mod adapters;
pub mod api;
pub mod chain;
pub mod config;
pub mod coordination;
pub mod error;
pub mod events;
pub mod metrics;
pub mod routing;
pub mod service;
pub mod state;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::{RouterError, RouterResult};
pub use service::{SwapReceipt, SwapRouter};
