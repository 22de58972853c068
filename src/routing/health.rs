//! Per-chain health tracking with debounce
//!
//! Adapters report failures and successes; route decisions read eligibility.
//! Each chain's state lives in one `DashMap` entry, so a reader never sees a
//! half-applied update.

use crate::config::HealthConfig;
use crate::types::ChainId;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    /// Eligible, with a cost penalty
    Degraded,
    /// Excluded from routing
    Unavailable,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainHealth {
    pub chain_id: ChainId,
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub updated_at: DateTime<Utc>,
}

impl ChainHealth {
    fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            state: HealthState::Healthy,
            consecutive_failures: 0,
            consecutive_successes: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Shared, read-mostly chain health store
pub struct ChainHealthMonitor {
    chains: DashMap<ChainId, ChainHealth>,
    failure_threshold: u32,
    recovery_threshold: u32,
}

impl ChainHealthMonitor {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            chains: DashMap::new(),
            failure_threshold: config.failure_threshold.max(1),
            recovery_threshold: config.recovery_threshold.max(1),
        }
    }

    /// Start tracking a chain as Healthy
    pub fn register(&self, chain_id: ChainId) {
        self.chains
            .entry(chain_id)
            .or_insert_with(|| ChainHealth::new(chain_id));
    }

    /// Unknown chains are not eligible
    pub fn is_eligible(&self, chain_id: ChainId) -> bool {
        self.state(chain_id)
            .map(|s| s != HealthState::Unavailable)
            .unwrap_or(false)
    }

    pub fn state(&self, chain_id: ChainId) -> Option<HealthState> {
        self.chains.get(&chain_id).map(|h| h.state)
    }

    pub fn record_outage(&self, chain_id: ChainId) {
        let mut health = self
            .chains
            .entry(chain_id)
            .or_insert_with(|| ChainHealth::new(chain_id));

        health.consecutive_successes = 0;
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.updated_at = Utc::now();

        let next = if health.consecutive_failures >= self.failure_threshold {
            HealthState::Unavailable
        } else if health.state == HealthState::Unavailable {
            HealthState::Unavailable
        } else {
            HealthState::Degraded
        };

        if next != health.state {
            warn!(
                "Chain {} {} -> {} after {} consecutive failures",
                chain_id,
                health.state.as_str(),
                next.as_str(),
                health.consecutive_failures
            );
            health.state = next;
            crate::metrics::record_chain_health(chain_id, next);
        }
    }

    pub fn record_recovery(&self, chain_id: ChainId) {
        let mut health = self
            .chains
            .entry(chain_id)
            .or_insert_with(|| ChainHealth::new(chain_id));

        health.consecutive_failures = 0;
        health.consecutive_successes = health.consecutive_successes.saturating_add(1);
        health.updated_at = Utc::now();

        if health.state != HealthState::Healthy
            && health.consecutive_successes >= self.recovery_threshold
        {
            info!(
                "Chain {} recovered ({} -> healthy)",
                chain_id,
                health.state.as_str()
            );
            health.state = HealthState::Healthy;
            crate::metrics::record_chain_health(chain_id, HealthState::Healthy);
        }
    }

    /// A stale observation degrades a healthy chain without counting as a failure
    pub fn record_stale(&self, chain_id: ChainId) {
        let mut health = self
            .chains
            .entry(chain_id)
            .or_insert_with(|| ChainHealth::new(chain_id));

        health.consecutive_successes = 0;
        health.updated_at = Utc::now();
        if health.state == HealthState::Healthy {
            health.state = HealthState::Degraded;
            crate::metrics::record_chain_health(chain_id, HealthState::Degraded);
        }
    }

    /// Consistent copy of every chain's health, ordered by chain id
    pub fn snapshot(&self) -> Vec<ChainHealth> {
        let mut all: Vec<ChainHealth> = self.chains.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|h| h.chain_id);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> ChainHealthMonitor {
        ChainHealthMonitor::new(&HealthConfig {
            failure_threshold: 3,
            recovery_threshold: 2,
        })
    }

    #[test]
    fn test_unknown_chain_not_eligible() {
        let monitor = monitor();
        assert!(!monitor.is_eligible(10));
        monitor.register(10);
        assert!(monitor.is_eligible(10));
    }

    #[test]
    fn test_debounced_outage() {
        let monitor = monitor();
        monitor.register(10);

        monitor.record_outage(10);
        assert_eq!(monitor.state(10), Some(HealthState::Degraded));
        assert!(monitor.is_eligible(10));

        monitor.record_outage(10);
        assert!(monitor.is_eligible(10));

        monitor.record_outage(10);
        assert_eq!(monitor.state(10), Some(HealthState::Unavailable));
        assert!(!monitor.is_eligible(10));
    }

    #[test]
    fn test_interleaved_success_resets_failures() {
        let monitor = monitor();
        monitor.register(10);

        monitor.record_outage(10);
        monitor.record_outage(10);
        monitor.record_recovery(10);
        monitor.record_outage(10);
        monitor.record_outage(10);

        assert_eq!(monitor.state(10), Some(HealthState::Degraded));
    }

    #[test]
    fn test_recovery_needs_consecutive_successes() {
        let monitor = monitor();
        for _ in 0..3 {
            monitor.record_outage(10);
        }
        assert_eq!(monitor.state(10), Some(HealthState::Unavailable));

        monitor.record_recovery(10);
        assert_eq!(monitor.state(10), Some(HealthState::Unavailable));

        // A failure between successes restarts the count
        monitor.record_outage(10);
        monitor.record_recovery(10);
        assert_eq!(monitor.state(10), Some(HealthState::Unavailable));

        monitor.record_recovery(10);
        assert_eq!(monitor.state(10), Some(HealthState::Healthy));
    }

    #[test]
    fn test_stale_degrades_but_keeps_eligible() {
        let monitor = monitor();
        monitor.register(10);

        monitor.record_stale(10);

        assert_eq!(monitor.state(10), Some(HealthState::Degraded));
        assert!(monitor.is_eligible(10));
    }

    #[test]
    fn test_snapshot_sorted() {
        let monitor = monitor();
        monitor.register(42161);
        monitor.register(10);
        monitor.register(8453);

        let ids: Vec<_> = monitor.snapshot().into_iter().map(|h| h.chain_id).collect();
        assert_eq!(ids, vec![10, 8453, 42161]);
    }
}
