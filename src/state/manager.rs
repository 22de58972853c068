//! PostgreSQL state manager

use super::ledger::{AuditKind, AuditLedger, AuditQuery, AuditRecord, IntentStore};
use crate::config::DatabaseConfig;
use crate::coordination::{Intent, IntentId, IntentState};
use crate::error::{RouterError, RouterResult};
use crate::types::RequestId;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

/// State manager for PostgreSQL persistence
pub struct StateManager {
    pool: PgPool,
}

impl StateManager {
    /// Create a new state manager
    pub async fn new(config: &DatabaseConfig) -> RouterResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> RouterResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_records (
                seq BIGSERIAL PRIMARY KEY,
                id UUID NOT NULL UNIQUE,
                request_id UUID NOT NULL,
                intent_id UUID,
                kind VARCHAR(20) NOT NULL,
                from_state VARCHAR(30),
                to_state VARCHAR(30),
                trigger VARCHAR(100) NOT NULL,
                detail JSONB NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_audit_request
            ON audit_records (request_id, seq)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_audit_intent
            ON audit_records (intent_id, seq)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS intents (
                intent_id UUID PRIMARY KEY,
                request_id UUID NOT NULL UNIQUE,
                state VARCHAR(30) NOT NULL,
                terminal BOOLEAN NOT NULL,
                snapshot JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> RouterResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Intent counts by state
    pub async fn get_stats(&self) -> RouterResult<IntentStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE NOT terminal) as open,
                COUNT(*) FILTER (WHERE state = 'completed') as completed,
                COUNT(*) FILTER (WHERE state = 'refunded') as refunded,
                COUNT(*) FILTER (WHERE state = 'failed') as failed
            FROM intents
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(IntentStats {
            open: row.get::<i64, _>("open") as u64,
            completed: row.get::<i64, _>("completed") as u64,
            refunded: row.get::<i64, _>("refunded") as u64,
            failed: row.get::<i64, _>("failed") as u64,
        })
    }
}

fn parse_state(value: Option<String>) -> RouterResult<Option<IntentState>> {
    value
        .map(|s| {
            serde_json::from_value(serde_json::Value::String(s))
                .map_err(|e| RouterError::Internal(format!("Invalid stored state: {}", e)))
        })
        .transpose()
}

fn row_to_record(row: PgRow) -> RouterResult<AuditRecord> {
    let kind: String = row.get("kind");
    let kind = match kind.as_str() {
        "decision" => AuditKind::Decision,
        "intent_created" => AuditKind::IntentCreated,
        "transition" => AuditKind::Transition,
        other => {
            return Err(RouterError::Internal(format!("Unknown audit kind {}", other)));
        }
    };

    Ok(AuditRecord {
        id: row.get::<Uuid, _>("id"),
        request_id: RequestId(row.get::<Uuid, _>("request_id")),
        intent_id: row.get::<Option<Uuid>, _>("intent_id").map(IntentId),
        kind,
        from_state: parse_state(row.get("from_state"))?,
        to_state: parse_state(row.get("to_state"))?,
        trigger: row.get("trigger"),
        detail: row.get("detail"),
        recorded_at: row.get::<DateTime<Utc>, _>("recorded_at"),
    })
}

fn row_to_intent(row: PgRow) -> RouterResult<Intent> {
    let snapshot: serde_json::Value = row.get("snapshot");
    serde_json::from_value(snapshot)
        .map_err(|e| RouterError::Internal(format!("Invalid intent snapshot: {}", e)))
}

#[async_trait]
impl AuditLedger for StateManager {
    async fn append(&self, record: &AuditRecord) -> RouterResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_records
                (id, request_id, intent_id, kind, from_state, to_state, trigger, detail, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.request_id.0)
        .bind(record.intent_id.map(|i| i.0))
        .bind(record.kind.as_str())
        .bind(record.from_state.map(|s| s.as_str()))
        .bind(record.to_state.map(|s| s.as_str()))
        .bind(&record.trigger)
        .bind(&record.detail)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;

        debug!(
            "Appended {} record for request {}",
            record.kind.as_str(),
            record.request_id
        );
        Ok(())
    }

    async fn query(&self, query: AuditQuery) -> RouterResult<Vec<AuditRecord>> {
        let rows = match query {
            AuditQuery::Request(id) => {
                sqlx::query("SELECT * FROM audit_records WHERE request_id = $1 ORDER BY seq")
                    .bind(id.0)
                    .fetch_all(&self.pool)
                    .await?
            }
            AuditQuery::Intent(id) => {
                sqlx::query("SELECT * FROM audit_records WHERE intent_id = $1 ORDER BY seq")
                    .bind(id.0)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(row_to_record).collect()
    }
}

#[async_trait]
impl IntentStore for StateManager {
    async fn save_intent(&self, intent: &Intent) -> RouterResult<()> {
        let snapshot =
            serde_json::to_value(intent).map_err(|e| RouterError::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO intents (intent_id, request_id, state, terminal, snapshot, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (intent_id)
            DO UPDATE SET state = $3, terminal = $4, snapshot = $5, updated_at = $6
            "#,
        )
        .bind(intent.id.0)
        .bind(intent.request_id.0)
        .bind(intent.state.as_str())
        .bind(intent.is_terminal())
        .bind(snapshot)
        .bind(intent.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_intent(&self, request_id: &RequestId) -> RouterResult<Option<Intent>> {
        let row = sqlx::query("SELECT snapshot FROM intents WHERE request_id = $1")
            .bind(request_id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_intent).transpose()
    }

    async fn load_open_intents(&self) -> RouterResult<Vec<Intent>> {
        let rows = sqlx::query("SELECT snapshot FROM intents WHERE NOT terminal")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_intent).collect()
    }
}

/// Intent statistics
#[derive(Debug, Clone)]
pub struct IntentStats {
    pub open: u64,
    pub completed: u64,
    pub refunded: u64,
    pub failed: u64,
}
