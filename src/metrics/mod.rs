//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain health
//! - Route decisions and realized savings
//! - Intent transitions and outcomes
//! - Collaborator calls and audit durability

use crate::error::{RouterError, RouterResult};
use crate::routing::HealthState;
use crate::types::{ChainId, RouteDecision};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_HEALTH: GaugeVec = register_gauge_vec!(
        "usdc_router_chain_health",
        "Chain health (2=healthy, 1=degraded, 0=unavailable)",
        &["chain_id"]
    ).unwrap();

    // Decision metrics
    pub static ref DECISIONS: CounterVec = register_counter_vec!(
        "usdc_router_decisions_total",
        "Route decisions by route and reason",
        &["route", "reason"]
    ).unwrap();

    pub static ref ESTIMATED_SAVINGS: HistogramVec = register_histogram_vec!(
        "usdc_router_estimated_savings_usdc",
        "Estimated savings of cross-chain decisions in USDC",
        &["destination"],
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0, 1000.0]
    ).unwrap();

    // Intent metrics
    pub static ref INTENT_TRANSITIONS: CounterVec = register_counter_vec!(
        "usdc_router_intent_transitions_total",
        "Intent state transitions",
        &["from", "to"]
    ).unwrap();

    pub static ref INTENT_OUTCOMES: CounterVec = register_counter_vec!(
        "usdc_router_intent_outcomes_total",
        "Terminal intent outcomes",
        &["destination", "outcome"]
    ).unwrap();

    pub static ref INTENT_LATENCY: HistogramVec = register_histogram_vec!(
        "usdc_router_intent_latency_seconds",
        "Time from intent creation to terminal state",
        &["outcome"],
        vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0, 1800.0, 3600.0]
    ).unwrap();

    pub static ref OPEN_INTENTS: GaugeVec = register_gauge_vec!(
        "usdc_router_open_intents",
        "Intents with a running worker",
        &[]
    ).unwrap();

    // Collaborator metrics
    pub static ref COLLABORATOR_CALLS: CounterVec = register_counter_vec!(
        "usdc_router_collaborator_calls_total",
        "Burn and bridge calls by operation and result",
        &["operation", "result"]
    ).unwrap();

    // Ledger metrics
    pub static ref AUDIT_APPEND_FAILURES: CounterVec = register_counter_vec!(
        "usdc_router_audit_append_failures_total",
        "Audit records that could not be made durable",
        &[]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "usdc_router_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "usdc_router_health_check_failure_total",
        "Total failed health checks",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> RouterResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RouterError::Internal(format!("Metrics bind failed: {}", e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RouterError::Internal(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: ChainId, state: HealthState) {
    let value = match state {
        HealthState::Healthy => 2.0,
        HealthState::Degraded => 1.0,
        HealthState::Unavailable => 0.0,
    };
    CHAIN_HEALTH
        .with_label_values(&[&chain_id.to_string()])
        .set(value);
}

pub fn record_decision(decision: &RouteDecision) {
    DECISIONS
        .with_label_values(&[decision.route.label(), decision.reason.as_str()])
        .inc();

    if let Some(destination) = decision.destination() {
        // Minor units to whole USDC
        ESTIMATED_SAVINGS
            .with_label_values(&[&destination.to_string()])
            .observe(decision.estimated_savings as f64 / 1_000_000.0);
    }
}

pub fn record_transition(from: &str, to: &str) {
    INTENT_TRANSITIONS.with_label_values(&[from, to]).inc();
}

pub fn record_intent_outcome(destination: ChainId, outcome: &str, latency_secs: f64) {
    INTENT_OUTCOMES
        .with_label_values(&[&destination.to_string(), outcome])
        .inc();
    INTENT_LATENCY
        .with_label_values(&[outcome])
        .observe(latency_secs);
}

pub fn set_open_intents(count: usize) {
    OPEN_INTENTS.with_label_values(&[]).set(count as f64);
}

pub fn record_collaborator_call(operation: &str, result: &str) {
    COLLABORATOR_CALLS
        .with_label_values(&[operation, result])
        .inc();
}

pub fn record_audit_append_failure() {
    AUDIT_APPEND_FAILURES.with_label_values(&[]).inc();
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}
