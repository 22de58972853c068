//! Intent orchestrator
//!
//! One tokio task per open intent. The task owns the intent's state
//! machine, so transitions on an intent are serialized; external events
//! reach it through an mpsc queue and are applied in arrival order.

use super::intent::Intent;
use super::machine::{Collaborators, IntentMachine};
use crate::config::{OrchestratorConfig, StateDeadlines};
use crate::error::{RouterError, RouterResult};
use crate::events::IntentEvent;
use crate::state::{append_durable, AppendPolicy, AuditRecord};
use crate::types::{ChainId, RequestId};

use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Channel into a running intent worker plus its latest snapshot
struct IntentHandle {
    events: mpsc::Sender<IntentEvent>,
    snapshot: Arc<RwLock<Intent>>,
}

/// Cross-chain intent orchestrator
pub struct IntentOrchestrator {
    /// External collaborators shared by every worker
    deps: Collaborators,
    /// Configuration
    config: OrchestratorConfig,
    /// Deadline overrides keyed by destination chain
    chain_deadlines: HashMap<ChainId, StateDeadlines>,
    /// Running workers
    workers: Arc<DashMap<RequestId, IntentHandle>>,
    /// Shutdown signal
    shutdown: watch::Sender<bool>,
}

impl IntentOrchestrator {
    pub fn new(deps: Collaborators, config: OrchestratorConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            deps,
            config,
            chain_deadlines: HashMap::new(),
            workers: Arc::new(DashMap::new()),
            shutdown,
        }
    }

    pub fn with_chain_deadlines(mut self, chain_id: ChainId, deadlines: StateDeadlines) -> Self {
        self.chain_deadlines.insert(chain_id, deadlines);
        self
    }

    fn deadlines_for(&self, chain_id: ChainId) -> StateDeadlines {
        self.chain_deadlines
            .get(&chain_id)
            .copied()
            .unwrap_or(self.config.deadlines)
    }

    /// Record a new intent and start driving it. Opening an intent that is
    /// already running returns its current snapshot.
    pub async fn open_intent(&self, intent: Intent) -> RouterResult<Intent> {
        if let Some(snapshot) = self.running_snapshot(&intent.request_id).await {
            debug!("Intent for request {} already open", intent.request_id);
            return Ok(snapshot);
        }

        let policy = AppendPolicy::from(&self.config);
        let record = AuditRecord::intent_created(&intent)?;
        append_durable(self.deps.ledger.as_ref(), &record, &policy).await?;

        if let Err(e) = self.deps.store.save_intent(&intent).await {
            warn!("Failed to persist intent {} snapshot: {}", intent.id, e);
        }

        info!(
            "Opened intent {} for request {}: {} USDC units {} -> {}",
            intent.id, intent.request_id, intent.amount, intent.source_chain, intent.destination_chain
        );

        self.spawn_worker(intent.clone());
        Ok(intent)
    }

    /// Restart workers for every non-terminal intent in the store
    pub async fn resume(&self) -> RouterResult<usize> {
        let open = self.deps.store.load_open_intents().await?;
        let mut resumed = 0;

        for intent in open {
            if self.workers.contains_key(&intent.request_id) {
                continue;
            }
            info!(
                "Resuming intent {} for request {} in {}",
                intent.id, intent.request_id, intent.state
            );
            self.spawn_worker(intent);
            resumed += 1;
        }

        Ok(resumed)
    }

    /// Queue an external event for an intent
    pub async fn deliver(&self, request_id: &RequestId, event: IntentEvent) -> RouterResult<()> {
        let sender = self.workers.get(request_id).map(|h| h.events.clone());

        match sender {
            Some(sender) => sender.send(event).await.map_err(|_| {
                RouterError::Internal(format!("Worker for request {} has stopped", request_id))
            }),
            None => match self.deps.store.load_intent(request_id).await? {
                Some(intent) if intent.is_terminal() => {
                    debug!(
                        "Dropping {} for finished intent {}",
                        event.name(),
                        intent.id
                    );
                    Ok(())
                }
                _ => Err(RouterError::IntentNotFound {
                    request_id: request_id.to_string(),
                }),
            },
        }
    }

    /// Latest known state of the intent for a request
    pub async fn status(&self, request_id: &RequestId) -> RouterResult<Option<Intent>> {
        if let Some(snapshot) = self.running_snapshot(request_id).await {
            return Ok(Some(snapshot));
        }
        self.deps.store.load_intent(request_id).await
    }

    pub fn open_count(&self) -> usize {
        self.workers.len()
    }

    async fn running_snapshot(&self, request_id: &RequestId) -> Option<Intent> {
        let snapshot = self.workers.get(request_id).map(|h| h.snapshot.clone())?;
        let intent = snapshot.read().await.clone();
        Some(intent)
    }

    fn spawn_worker(&self, intent: Intent) {
        let request_id = intent.request_id;
        let (events_tx, events_rx) = mpsc::channel(self.config.event_queue_depth.max(1));
        let snapshot = Arc::new(RwLock::new(intent.clone()));

        self.workers.insert(
            request_id,
            IntentHandle {
                events: events_tx,
                snapshot: snapshot.clone(),
            },
        );
        crate::metrics::set_open_intents(self.workers.len());

        let deadlines = self.deadlines_for(intent.destination_chain);
        let machine = IntentMachine::new(intent, self.deps.clone(), self.config.clone(), deadlines);

        tokio::spawn(run_worker(
            machine,
            events_rx,
            snapshot,
            self.shutdown.subscribe(),
            Duration::from_millis(self.config.tick_interval_ms.max(1)),
            self.workers.clone(),
        ));
    }

    /// Stop all workers. Open intents stay in the store and are resumed on
    /// the next start.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        info!("Intent orchestrator shutdown initiated");

        for _ in 0..50 {
            if self.workers.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if !self.workers.is_empty() {
            warn!("{} intent workers still running at shutdown", self.workers.len());
        }
    }
}

async fn run_worker(
    mut machine: IntentMachine,
    mut events: mpsc::Receiver<IntentEvent>,
    snapshot: Arc<RwLock<Intent>>,
    mut shutdown: watch::Receiver<bool>,
    tick: Duration,
    workers: Arc<DashMap<RequestId, IntentHandle>>,
) {
    let request_id = machine.intent().request_id;
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!("Worker started for request {}", request_id);

    while !machine.is_terminal() {
        tokio::select! {
            Some(event) = events.recv() => {
                if let Err(e) = machine.apply(event, Utc::now()).await {
                    error!("Intent {} failed to apply event: {}", machine.intent().id, e);
                }
            }

            _ = ticker.tick() => {
                if let Err(e) = machine.step(Utc::now()).await {
                    if e.is_retryable() && !e.should_alert() {
                        warn!("Intent {} step failed, will retry: {}", machine.intent().id, e);
                    } else {
                        error!("Intent {} step failed: {}", machine.intent().id, e);
                    }
                }
            }

            _ = shutdown.changed() => {
                debug!("Worker for request {} stopping", request_id);
                break;
            }
        }

        *snapshot.write().await = machine.intent().clone();
    }

    workers.remove(&request_id);
    crate::metrics::set_open_intents(workers.len());

    if let Some(outcome) = &machine.intent().outcome {
        info!(
            "Intent {} for request {} finished: {}",
            machine.intent().id,
            request_id,
            outcome.label()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::FulfillmentStatus;
    use crate::coordination::{IntentOutcome, IntentState};
    use crate::state::{AuditKind, AuditLedger, AuditQuery, InMemoryLedger, IntentStore};
    use crate::testing::{self, FakeBridge, FakeBurn};

    fn orchestrator(
        burn: FakeBurn,
        bridge: FakeBridge,
    ) -> (IntentOrchestrator, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new());
        let deps = testing::collaborators(Arc::new(burn), Arc::new(bridge), ledger.clone());
        (
            IntentOrchestrator::new(deps, testing::orchestrator_config()),
            ledger,
        )
    }

    async fn wait_for_state(
        orchestrator: &IntentOrchestrator,
        request_id: &RequestId,
        state: IntentState,
    ) -> Intent {
        let wait = async {
            loop {
                if let Some(intent) = orchestrator.status(request_id).await.unwrap() {
                    if intent.state == state {
                        return intent;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("intent never reached {}", state))
    }

    #[tokio::test]
    async fn test_worker_drives_intent_to_completion() {
        let (orchestrator, ledger) = orchestrator(
            FakeBurn::attesting(),
            FakeBridge::new(vec![FulfillmentStatus::Settled { minted_amount: 1_000 }]),
        );
        let intent = testing::intent(1_000, Utc::now());
        let request_id = intent.request_id;

        orchestrator.open_intent(intent).await.unwrap();
        let done = wait_for_state(&orchestrator, &request_id, IntentState::Completed).await;

        assert_eq!(done.outcome, Some(IntentOutcome::Completed));
        let records = ledger.query(AuditQuery::Request(request_id)).await.unwrap();
        assert_eq!(records[0].kind, AuditKind::IntentCreated);
        assert_eq!(records.last().unwrap().to_state, Some(IntentState::Completed));
    }

    #[tokio::test]
    async fn test_delivered_event_advances_intent() {
        let (orchestrator, _) = orchestrator(FakeBurn::pending_for(usize::MAX), FakeBridge::new(Vec::new()));
        let intent = testing::intent(1_000, Utc::now());
        let request_id = intent.request_id;
        let nonce = intent.nonce;

        orchestrator.open_intent(intent).await.unwrap();
        wait_for_state(&orchestrator, &request_id, IntentState::BurnInitiated).await;

        orchestrator
            .deliver(
                &request_id,
                IntentEvent::BurnAttested {
                    nonce,
                    amount: 1_000,
                    attestation: "0xfeed".to_string(),
                },
            )
            .await
            .unwrap();

        let submitted = wait_for_state(&orchestrator, &request_id, IntentState::IntentSubmitted).await;
        assert_eq!(submitted.burned_amount, Some(1_000));
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_open_twice_runs_one_worker() {
        let (orchestrator, ledger) = orchestrator(FakeBurn::pending_for(usize::MAX), FakeBridge::new(Vec::new()));
        let intent = testing::intent(1_000, Utc::now());
        let request_id = intent.request_id;

        orchestrator.open_intent(intent.clone()).await.unwrap();
        orchestrator.open_intent(intent).await.unwrap();

        assert_eq!(orchestrator.open_count(), 1);
        let created = ledger
            .query(AuditQuery::Request(request_id))
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.kind == AuditKind::IntentCreated)
            .count();
        assert_eq!(created, 1);
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_resume_picks_up_open_intents() {
        let (orchestrator, ledger) = orchestrator(
            FakeBurn::attesting(),
            FakeBridge::new(vec![FulfillmentStatus::Settled { minted_amount: 1_000 }]),
        );
        let finished = {
            let mut intent = testing::intent(500, Utc::now());
            intent.state = IntentState::Completed;
            intent
        };
        let open = testing::intent(1_000, Utc::now());
        ledger.save_intent(&finished).await.unwrap();
        ledger.save_intent(&open).await.unwrap();

        assert_eq!(orchestrator.resume().await.unwrap(), 1);
        wait_for_state(&orchestrator, &open.request_id, IntentState::Completed).await;
    }

    #[tokio::test]
    async fn test_deliver_to_unknown_request() {
        let (orchestrator, _) = orchestrator(FakeBurn::attesting(), FakeBridge::new(Vec::new()));
        let intent = testing::intent(1_000, Utc::now());

        let result = orchestrator
            .deliver(
                &intent.request_id,
                IntentEvent::SettlementConfirmed { nonce: intent.nonce },
            )
            .await;

        assert!(matches!(result, Err(RouterError::IntentNotFound { .. })));
    }

    #[tokio::test]
    async fn test_stop_ends_workers() {
        let (orchestrator, ledger) = orchestrator(FakeBurn::pending_for(usize::MAX), FakeBridge::new(Vec::new()));
        let intent = testing::intent(1_000, Utc::now());
        let request_id = intent.request_id;
        orchestrator.open_intent(intent).await.unwrap();

        orchestrator.stop().await;

        assert_eq!(orchestrator.open_count(), 0);
        // Still open in the store for the next start
        let stored = ledger.load_intent(&request_id).await.unwrap().unwrap();
        assert!(!stored.is_terminal());
    }
}
