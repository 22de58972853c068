//! HTTP API for swap ingress, intent status, collaborator events and health

mod auth;

pub use auth::webhook_auth_middleware;

use crate::config::ApiConfig;
use crate::error::{RouterError, RouterResult};
use crate::events::IntentEvent;
use crate::routing::{ChainHealth, HealthState};
use crate::service::SwapRouter;
use crate::state::StateManager;
use crate::types::{RequestId, SwapRequest};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<SwapRouter>,
    /// Present when audit records live in PostgreSQL
    pub state_manager: Option<Arc<StateManager>>,
    /// Key collaborators present when posting events
    pub webhook_key: Option<Arc<String>>,
}

/// Build the route table
pub fn router(state: AppState) -> Router {
    let webhooks = Router::new()
        .route("/swaps/:id/events", post(post_event))
        .route_layer(middleware::from_fn_with_state(
            state.webhook_key.clone(),
            webhook_auth_middleware,
        ));

    Router::new()
        .route("/swaps", post(submit_swap))
        .route("/swaps/:id", get(get_swap))
        .route("/swaps/:id/audit", get(get_audit_trail))
        .merge(webhooks)
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/chains", get(get_chains))
        .route("/stats", get(get_stats))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> RouterResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RouterError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RouterError::Internal(format!("API server failed: {}", e)))?;

    Ok(())
}

/// Router errors as HTTP responses
struct ApiError(RouterError);

impl From<RouterError> for ApiError {
    fn from(err: RouterError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

fn status_for(err: &RouterError) -> StatusCode {
    match err {
        RouterError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        RouterError::IntentNotFound { .. } => StatusCode::NOT_FOUND,
        RouterError::AuditAppend(_) | RouterError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn parse_request_id(raw: &str) -> Result<RequestId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError(RouterError::InvalidRequest(format!("bad request id {}", raw))))
}

async fn submit_swap(
    State(state): State<AppState>,
    Json(request): Json<SwapRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let receipt = state.router.submit(request).await?;
    Ok(Json(receipt))
}

async fn get_swap(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let request_id = parse_request_id(&id)?;
    match state.router.status(&request_id).await? {
        Some(receipt) => Ok(Json(receipt).into_response()),
        None => Err(ApiError(RouterError::IntentNotFound { request_id: id })),
    }
}

async fn get_audit_trail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = parse_request_id(&id)?;
    let records = state.router.audit_trail(&request_id).await?;
    Ok(Json(records))
}

/// Webhook for burn attestations and bridge notifications
async fn post_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(event): Json<IntentEvent>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = parse_request_id(&id)?;
    state.router.deliver_event(&request_id, event).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - audit store reachable and at least one chain routable
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match &state.state_manager {
        Some(manager) => manager.health_check().await.is_ok(),
        None => true,
    };

    let details = state.router.chain_health();
    let chains = details.iter().any(|c| c.state != HealthState::Unavailable);
    let ready = database && chains;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            database,
            chains,
            details,
        }),
    )
}

async fn get_chains(State(state): State<AppState>) -> impl IntoResponse {
    Json(ChainsResponse {
        chains: state.router.chain_health(),
    })
}

/// Intent counts; totals by outcome need the database
async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let mut stats = StatsResponse {
        open: state.router.open_intents() as u64,
        completed: None,
        refunded: None,
        failed: None,
    };

    if let Some(manager) = &state.state_manager {
        let stored = manager.get_stats().await?;
        stats.completed = Some(stored.completed);
        stats.refunded = Some(stored.refunded);
        stats.failed = Some(stored.failed);
    }

    Ok(Json(stats))
}

// Response types

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
    chains: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainsResponse {
    chains: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct StatsResponse {
    open: u64,
    completed: Option<u64>,
    refunded: Option<u64>,
    failed: Option<u64>,
}
