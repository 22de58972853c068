//! Append-only audit ledger and intent snapshot store

use crate::config::OrchestratorConfig;
use crate::coordination::{Intent, IntentId, IntentState};
use crate::error::{RouterError, RouterResult};
use crate::types::{RequestId, RouteDecision};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Decision,
    IntentCreated,
    Transition,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Decision => "decision",
            AuditKind::IntentCreated => "intent_created",
            AuditKind::Transition => "transition",
        }
    }
}

/// One write-once ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub request_id: RequestId,
    pub intent_id: Option<IntentId>,
    pub kind: AuditKind,
    pub from_state: Option<IntentState>,
    pub to_state: Option<IntentState>,
    /// What caused this entry
    pub trigger: String,
    /// Data that justified it
    pub detail: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn decision(decision: &RouteDecision) -> RouterResult<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            request_id: decision.request_id,
            intent_id: None,
            kind: AuditKind::Decision,
            from_state: None,
            to_state: None,
            trigger: decision.reason.as_str().to_string(),
            detail: serde_json::to_value(decision)
                .map_err(|e| RouterError::Internal(e.to_string()))?,
            recorded_at: decision.decided_at,
        })
    }

    pub fn intent_created(intent: &Intent) -> RouterResult<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            request_id: intent.request_id,
            intent_id: Some(intent.id),
            kind: AuditKind::IntentCreated,
            from_state: None,
            to_state: Some(intent.state),
            trigger: "route_decision".to_string(),
            detail: serde_json::to_value(intent)
                .map_err(|e| RouterError::Internal(e.to_string()))?,
            recorded_at: intent.created_at,
        })
    }

    pub fn transition(
        intent: &Intent,
        to: IntentState,
        trigger: &str,
        detail: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id: intent.request_id,
            intent_id: Some(intent.id),
            kind: AuditKind::Transition,
            from_state: Some(intent.state),
            to_state: Some(to),
            trigger: trigger.to_string(),
            detail,
            recorded_at: at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditQuery {
    Request(RequestId),
    Intent(IntentId),
}

/// Append-only audit log. There is no update or delete.
#[async_trait]
pub trait AuditLedger: Send + Sync {
    /// Appending a record id that is already present is a no-op
    async fn append(&self, record: &AuditRecord) -> RouterResult<()>;

    /// Records in append order
    async fn query(&self, query: AuditQuery) -> RouterResult<Vec<AuditRecord>>;
}

/// Latest snapshot of every intent, for status queries and restart recovery
#[async_trait]
pub trait IntentStore: Send + Sync {
    async fn save_intent(&self, intent: &Intent) -> RouterResult<()>;

    async fn load_intent(&self, request_id: &RequestId) -> RouterResult<Option<Intent>>;

    async fn load_open_intents(&self) -> RouterResult<Vec<Intent>>;
}

/// How hard to try before a transition is declared not durable
#[derive(Debug, Clone, Copy)]
pub struct AppendPolicy {
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl Default for AppendPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

impl From<&OrchestratorConfig> for AppendPolicy {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            attempts: config.audit_append_attempts,
            retry_delay: Duration::from_millis(config.audit_retry_delay_ms),
        }
    }
}

/// Append with retries. An error here means the record is not durable and
/// the step that produced it must not take effect.
pub async fn append_durable(
    ledger: &dyn AuditLedger,
    record: &AuditRecord,
    policy: &AppendPolicy,
) -> RouterResult<()> {
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match ledger.append(record).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(
                    "Audit append for request {} failed (attempt {}/{}): {}",
                    record.request_id, attempt, attempts, e
                );
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(policy.retry_delay).await;
                }
            }
        }
    }

    crate::metrics::record_audit_append_failure();
    let message = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown error".to_string());
    error!(
        "Audit record {} for request {} not durable: {}",
        record.id, record.request_id, message
    );
    Err(RouterError::AuditAppend(message))
}

/// Records in append order with lookups by id, request and intent
#[derive(Default)]
struct AuditLog {
    entries: Vec<AuditRecord>,
    ids: HashSet<Uuid>,
    by_request: HashMap<RequestId, Vec<usize>>,
    by_intent: HashMap<IntentId, Vec<usize>>,
}

impl AuditLog {
    fn push(&mut self, record: &AuditRecord) {
        if !self.ids.insert(record.id) {
            return;
        }
        let position = self.entries.len();
        self.by_request
            .entry(record.request_id)
            .or_default()
            .push(position);
        if let Some(intent_id) = record.intent_id {
            self.by_intent.entry(intent_id).or_default().push(position);
        }
        self.entries.push(record.clone());
    }

    fn select(&self, query: AuditQuery) -> Vec<AuditRecord> {
        let positions = match query {
            AuditQuery::Request(id) => self.by_request.get(&id),
            AuditQuery::Intent(id) => self.by_intent.get(&id),
        };
        positions
            .map(|positions| positions.iter().map(|&i| self.entries[i].clone()).collect())
            .unwrap_or_default()
    }
}

/// In-process ledger and intent store
#[derive(Default)]
pub struct InMemoryLedger {
    log: RwLock<AuditLog>,
    intents: DashMap<RequestId, Intent>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.log.read().await.entries.len()
    }
}

#[async_trait]
impl AuditLedger for InMemoryLedger {
    async fn append(&self, record: &AuditRecord) -> RouterResult<()> {
        self.log.write().await.push(record);
        Ok(())
    }

    async fn query(&self, query: AuditQuery) -> RouterResult<Vec<AuditRecord>> {
        Ok(self.log.read().await.select(query))
    }
}

#[async_trait]
impl IntentStore for InMemoryLedger {
    async fn save_intent(&self, intent: &Intent) -> RouterResult<()> {
        self.intents.insert(intent.request_id, intent.clone());
        Ok(())
    }

    async fn load_intent(&self, request_id: &RequestId) -> RouterResult<Option<Intent>> {
        Ok(self.intents.get(request_id).map(|i| i.clone()))
    }

    async fn load_open_intents(&self) -> RouterResult<Vec<Intent>> {
        Ok(self
            .intents
            .iter()
            .filter(|e| !e.value().is_terminal())
            .map(|e| e.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn record(request_id: RequestId) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            request_id,
            intent_id: None,
            kind: AuditKind::Decision,
            from_state: None,
            to_state: None,
            trigger: "savings".to_string(),
            detail: serde_json::json!({}),
            recorded_at: Utc::now(),
        }
    }

    /// Fails the first `failures` appends
    struct FlakyLedger {
        failures: u32,
        calls: AtomicU32,
        inner: InMemoryLedger,
    }

    #[async_trait]
    impl AuditLedger for FlakyLedger {
        async fn append(&self, record: &AuditRecord) -> RouterResult<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(RouterError::Internal("disk full".to_string()));
            }
            self.inner.append(record).await
        }

        async fn query(&self, query: AuditQuery) -> RouterResult<Vec<AuditRecord>> {
            self.inner.query(query).await
        }
    }

    fn fast_policy(attempts: u32) -> AppendPolicy {
        AppendPolicy {
            attempts,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_query_by_request() {
        let ledger = InMemoryLedger::new();
        let a = RequestId::new();
        let b = RequestId::new();
        ledger.append(&record(a)).await.unwrap();
        ledger.append(&record(b)).await.unwrap();
        ledger.append(&record(a)).await.unwrap();

        assert_eq!(ledger.query(AuditQuery::Request(a)).await.unwrap().len(), 2);
        assert_eq!(ledger.query(AuditQuery::Request(b)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_record_id_is_ignored() {
        let ledger = InMemoryLedger::new();
        let r = record(RequestId::new());
        ledger.append(&r).await.unwrap();
        ledger.append(&r).await.unwrap();

        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_query_by_intent_keeps_append_order() {
        let ledger = InMemoryLedger::new();
        let request_id = RequestId::new();
        let intent_id = IntentId::new();
        let mut triggers = Vec::new();

        ledger.append(&record(request_id)).await.unwrap();
        for step in 0..5 {
            let mut r = record(request_id);
            r.intent_id = Some(intent_id);
            r.trigger = format!("step_{}", step);
            triggers.push(r.trigger.clone());
            ledger.append(&r).await.unwrap();
            // Retried appends of the same record must not reorder or repeat it
            ledger.append(&r).await.unwrap();
        }
        ledger.append(&record(RequestId::new())).await.unwrap();

        let trail = ledger.query(AuditQuery::Intent(intent_id)).await.unwrap();
        let seen: Vec<_> = trail.into_iter().map(|r| r.trigger).collect();
        assert_eq!(seen, triggers);
        assert_eq!(ledger.query(AuditQuery::Request(request_id)).await.unwrap().len(), 6);
        assert!(ledger
            .query(AuditQuery::Intent(IntentId::new()))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(ledger.len().await, 7);
    }

    #[tokio::test]
    async fn test_append_durable_retries() {
        let ledger = FlakyLedger {
            failures: 2,
            calls: AtomicU32::new(0),
            inner: InMemoryLedger::new(),
        };

        tokio_test::assert_ok!(append_durable(&ledger, &record(RequestId::new()), &fast_policy(3)).await);
        assert_eq!(ledger.inner.len().await, 1);
    }

    #[tokio::test]
    async fn test_append_durable_gives_up() {
        let ledger = FlakyLedger {
            failures: 5,
            calls: AtomicU32::new(0),
            inner: InMemoryLedger::new(),
        };

        let result = append_durable(&ledger, &record(RequestId::new()), &fast_policy(3)).await;

        assert!(matches!(result, Err(RouterError::AuditAppend(_))));
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 3);
    }
}
