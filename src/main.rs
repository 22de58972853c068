//! USDC Router - route decisions and cross-chain intent orchestration
//!
//! Decides per swap whether the local chain or a cheaper remote chain should
//! execute it, and drives cross-chain intents through burn, bridge submission,
//! fulfillment and refund.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use usdc_router::adapters::{HttpBridgeAdapter, HttpBurnAdapter};
use usdc_router::api::{self, AppState};
use usdc_router::chain::ChainManager;
use usdc_router::config::Settings;
use usdc_router::coordination::{Collaborators, IntentOrchestrator};
use usdc_router::metrics::{self, MetricsServer};
use usdc_router::routing::{
    BridgeFee, ChainCostParams, ChainHealthMonitor, CostModel, RouteDecisionEngine,
    SignalCollector,
};
use usdc_router::state::{AppendPolicy, AuditLedger, InMemoryLedger, IntentStore, StateManager};
use usdc_router::SwapRouter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting USDC Router v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains (instance {})",
        settings.enabled_chains().len(),
        settings.router.instance_id
    );

    // Audit ledger and intent store
    let state_manager = match &settings.database {
        Some(database) => {
            let manager = Arc::new(StateManager::new(database).await?);
            info!("Database connection established");
            manager.run_migrations().await?;
            info!("Database migrations complete");
            Some(manager)
        }
        None => {
            warn!("No database configured, audit records are kept in memory only");
            None
        }
    };
    let (ledger, store): (Arc<dyn AuditLedger>, Arc<dyn IntentStore>) = match &state_manager {
        Some(manager) => (manager.clone(), manager.clone()),
        None => {
            let memory = Arc::new(InMemoryLedger::new());
            (memory.clone(), memory)
        }
    };

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // Chain health and RPC signal sources
    let health = Arc::new(ChainHealthMonitor::new(&settings.health));
    let chain_manager = Arc::new(ChainManager::new(&settings, health.clone())?);
    info!("Chain connections initialized");

    let mut cost_model = CostModel::new(settings.routing.freshness_window_secs);
    let mut signals = SignalCollector::new(
        chain_manager.clone(),
        chain_manager.clone(),
        health.clone(),
        settings.routing.freshness_window_secs,
    );
    for (_, chain) in settings.enabled_chains() {
        cost_model = cost_model.with_chain(chain.chain_id, ChainCostParams::from(chain));
        signals = signals.with_chain(chain.chain_id, BridgeFee::from(chain));
    }

    let engine = RouteDecisionEngine::new(
        cost_model,
        health.clone(),
        ledger.clone(),
        settings.routing.clone(),
    )
    .with_append_policy(AppendPolicy::from(&settings.orchestrator));

    // Intent orchestration
    let deps = Collaborators {
        burn: Arc::new(HttpBurnAdapter::new(&settings.collaborators)?),
        bridge: Arc::new(HttpBridgeAdapter::new(&settings.collaborators)?),
        ledger: ledger.clone(),
        store,
    };
    let mut orchestrator = IntentOrchestrator::new(deps, settings.orchestrator.clone());
    for (_, chain) in settings.enabled_chains() {
        if let Some(deadlines) = &chain.deadlines {
            orchestrator = orchestrator.with_chain_deadlines(chain.chain_id, *deadlines);
        }
    }
    let orchestrator = Arc::new(orchestrator);

    let resumed = orchestrator.resume().await?;
    info!("Intent orchestrator initialized, resumed {} open intents", resumed);

    let router = Arc::new(SwapRouter::new(
        signals,
        engine,
        orchestrator.clone(),
        ledger,
        health,
    ));

    // Start API server
    let api_handle = tokio::spawn({
        let api_config = settings.api.clone();
        let webhook_key = settings.collaborators.api_key().map(Arc::new);
        if webhook_key.is_none() {
            warn!("No collaborator API key set; event webhooks will reject every request");
        }
        let state = AppState {
            router: router.clone(),
            state_manager: state_manager.clone(),
            webhook_key,
        };
        async move {
            if let Err(e) = api::run_server(api_config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let chain_manager = chain_manager.clone();
        let state_manager = state_manager.clone();
        let interval = settings.router.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                // Probe chain RPCs, feeding chain health
                let results = chain_manager.health_check().await;
                let mut healthy = true;
                for (chain_id, ok) in results {
                    if !ok {
                        warn!("Chain {} health check failed", chain_id);
                        healthy = false;
                    }
                }

                // Check database connection
                if let Some(manager) = &state_manager {
                    if let Err(e) = manager.health_check().await {
                        warn!("Database health check failed: {}", e);
                        healthy = false;
                    }
                }

                if healthy {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    info!("USDC Router is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    orchestrator.stop().await;

    // Abort background tasks
    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("USDC Router stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,usdc_router=debug,sqlx=warn,hyper=warn"));

    // JSON lines for log shippers, human-readable otherwise
    if std::env::var("USDC_ROUTER_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
