//! The async ledger worker: owns the ring buffer, drains it on signal, and
//! carries the health sentinel.
//!
//! Producers (proxy handlers) call [`LedgerWorker::submit`], which never
//! blocks: a full ring drops the event, counts it, and logs. A single
//! consumer task wakes on a one-slot notify, drains the ring to empty, and
//! runs each event through the processor. A processor failure marks the
//! worker unhealthy and draining continues.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;
use vouch_core::canonical::CanonicalError;
use vouch_core::crypto::{calculate_event_hash, LedgerSigner};
use vouch_core::event::{actor, event_type, method, task_state, Event, GENESIS_HASH};
use vouch_core::repo::{EventRepository, RepoError};
use vouch_core::ring::{RingBuffer, RingError};

use crate::metrics::DaemonMetrics;
use crate::pool::EventPool;
use crate::processor::EventProcessor;

/// Ring utilization (percent) above which submits log a loud warning.
const BACKPRESSURE_WARN_PCT: usize = 80;

/// Errors starting or bootstrapping the worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Repository failure while bootstrapping.
    #[error("repository: {0}")]
    Repo(#[from] RepoError),

    /// Genesis payload failed to canonicalize.
    #[error("canonicalizing genesis payload: {0}")]
    Canonical(#[from] CanonicalError),

    /// The ring buffer could not be constructed.
    #[error("ring buffer: {0}")]
    Ring(#[from] RingError),
}

/// Asynchronous ledger worker.
pub struct LedgerWorker {
    ring: RingBuffer<Box<Event>>,
    notify: Notify,
    repo: Arc<dyn EventRepository>,
    signer: Arc<LedgerSigner>,
    processor: EventProcessor,
    pool: Arc<EventPool>,
    metrics: Arc<DaemonMetrics>,
    run_id: RwLock<String>,
    agent_name: String,
    task_states: Mutex<HashMap<String, String>>,
    unhealthy: AtomicBool,
    closed: AtomicBool,
}

impl LedgerWorker {
    /// Creates a worker with a ring of `capacity` events.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Ring`] when `capacity` is zero.
    pub fn new(
        repo: Arc<dyn EventRepository>,
        signer: Arc<LedgerSigner>,
        pool: Arc<EventPool>,
        metrics: Arc<DaemonMetrics>,
        capacity: usize,
        agent_name: impl Into<String>,
    ) -> Result<Self, WorkerError> {
        Ok(Self {
            ring: RingBuffer::new(capacity)?,
            notify: Notify::new(),
            processor: EventProcessor::new(Arc::clone(&repo), Arc::clone(&signer)),
            repo,
            signer,
            pool,
            metrics,
            run_id: RwLock::new(String::new()),
            agent_name: agent_name.into(),
            task_states: Mutex::new(HashMap::new()),
            unhealthy: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Bootstraps the run (creating the genesis event when the store is
    /// empty) and spawns the consumer task.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] when bootstrap reads or the genesis append
    /// fail.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, WorkerError> {
        let run_id = if self.repo.has_runs()? {
            match self.repo.current_run_id()? {
                Some(id) => {
                    info!(run_id = %short(&id), "loaded existing run");
                    id
                },
                None => self.create_genesis()?,
            }
        } else {
            self.create_genesis()?
        };
        *self.run_id.write().unwrap_or_else(|e| e.into_inner()) = run_id;

        let worker = Arc::clone(self);
        let handle = tokio::spawn(worker.run());
        info!("ledger worker started");
        Ok(handle)
    }

    /// Submits an event for asynchronous persistence. Never blocks; a full
    /// ring drops the event by policy and counts the drop.
    pub fn submit(&self, event: Box<Event>) {
        let capacity = self.ring.capacity();
        let queued = self.ring.len();
        if queued * 100 >= capacity * BACKPRESSURE_WARN_PCT {
            warn!(
                queued,
                capacity, "BACKPRESSURE: ledger ring at or above {BACKPRESSURE_WARN_PCT}% utilization"
            );
        }

        let event_id = event.id.clone();
        if self.ring.push(event).is_err() {
            self.metrics.event_dropped();
            warn!(event_id = %event_id, "BACKPRESSURE: ring buffer full, dropping event");
            return;
        }
        self.notify.notify_one();
    }

    /// Stops the consumer: it drains the remaining ring contents, then
    /// closes the repository.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// False once any persist has failed since startup.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        !self.unhealthy.load(Ordering::Acquire)
    }

    /// The id of the run currently being appended to.
    #[must_use]
    pub fn run_id(&self) -> String {
        self.run_id
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The signer backing this worker.
    #[must_use]
    pub fn signer(&self) -> &Arc<LedgerSigner> {
        &self.signer
    }

    /// The repository backing this worker.
    #[must_use]
    pub fn repo(&self) -> &Arc<dyn EventRepository> {
        &self.repo
    }

    /// `(processed, dropped)` counters.
    #[must_use]
    pub fn stats(&self) -> (u64, u64) {
        (
            self.metrics.events_processed(),
            self.metrics.events_dropped(),
        )
    }

    /// Starts a fresh run: new run record, new genesis event signed with the
    /// currently active key. Used after key rotation, which always begins a
    /// new run so every run verifies against a single pinned public key.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] when the run or genesis append fails.
    pub fn begin_new_run(&self) -> Result<String, WorkerError> {
        let run_id = self.create_genesis()?;
        *self.run_id.write().unwrap_or_else(|e| e.into_inner()) = run_id.clone();
        Ok(run_id)
    }

    /// Creates a run record and its genesis event (seq 0, all-zero prev
    /// hash, `vouch:init`).
    fn create_genesis(&self) -> Result<String, WorkerError> {
        let run_id = Uuid::new_v4().to_string();

        let mut event = Event {
            id: Event::new_id(),
            run_id: run_id.clone(),
            seq_index: 0,
            actor: actor::SYSTEM.to_string(),
            event_type: event_type::GENESIS.to_string(),
            method: method::INIT.to_string(),
            prev_hash: GENESIS_HASH.to_string(),
            ..Event::default()
        };

        let timestamp = event.timestamp_rfc3339();
        let payload = event.canonical_payload(&timestamp);
        event.current_hash = calculate_event_hash(&event.prev_hash, &payload)?;
        event.signature = self.signer.sign_hash(&event.current_hash);

        self.repo.insert_run(
            &run_id,
            &self.agent_name,
            &event.current_hash,
            &self.signer.public_key_hex(),
        )?;
        self.repo.store_event(&event)?;
        self.metrics.event_processed();

        info!(
            run_id = %short(&run_id),
            pub_key = %&self.signer.public_key_hex()[..16],
            "genesis event created"
        );
        Ok(run_id)
    }

    /// Consumer loop: drain on every wake; after `close`, drain once more,
    /// close the repository, and exit.
    async fn run(self: Arc<Self>) {
        loop {
            self.drain();
            if self.closed.load(Ordering::Acquire) {
                self.drain();
                break;
            }
            self.notify.notified().await;
        }
        if let Err(e) = self.repo.close() {
            warn!(error = %e, "repository close failed");
        }
        info!("ledger worker stopped");
    }

    fn drain(&self) {
        while let Ok(mut event) = self.ring.pop() {
            let run_id = self.run_id();
            match self.processor.process(&mut event, &run_id) {
                Ok(()) => {
                    self.metrics.event_processed();
                    self.log_event(&event);
                    self.observe_task_state(&event);
                    self.pool.release(event);
                },
                Err(e) => {
                    self.unhealthy.store(true, Ordering::Release);
                    error!(
                        event_id = %event.id,
                        error = %e,
                        "CRITICAL: ledger persist failure, worker marked unhealthy"
                    );
                },
            }
        }
    }

    fn log_event(&self, event: &Event) {
        let hash = &event.current_hash[..16.min(event.current_hash.len())];
        if event.was_blocked {
            info!(method = %event.method, seq = event.seq_index, hash, "BLOCKED");
        } else if event.event_type == event_type::TOOL_CALL {
            info!(method = %event.method, seq = event.seq_index, hash, "CALL");
        } else if event.event_type == event_type::TOOL_RESPONSE {
            info!(method = %event.method, seq = event.seq_index, hash, "RESPONSE");
        }
    }

    /// Tracks per-task state across tool calls/responses and synthesizes a
    /// `task_terminal` event on a transition into a terminal state. The map
    /// entry is purged on terminal so it cannot grow without bound.
    fn observe_task_state(&self, event: &Event) {
        if event.task_id.is_empty()
            || (event.event_type != event_type::TOOL_CALL
                && event.event_type != event_type::TOOL_RESPONSE)
        {
            return;
        }

        let terminal_transition = {
            let mut states = self
                .task_states
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            match states.get(&event.task_id) {
                Some(old_state) if *old_state != event.task_state => {
                    info!(
                        task_id = %event.task_id,
                        from = %old_state,
                        to = %event.task_state,
                        "task state change"
                    );
                    if task_state::is_terminal(&event.task_state) {
                        states.remove(&event.task_id);
                        true
                    } else {
                        states.insert(event.task_id.clone(), event.task_state.clone());
                        false
                    }
                },
                Some(_) => false,
                None => {
                    states.insert(event.task_id.clone(), event.task_state.clone());
                    false
                },
            }
        };

        if terminal_transition {
            self.create_task_terminal(&event.task_id, &event.task_state);
        }
    }

    /// Synthesizes the `task_terminal` record for a finished task.
    fn create_task_terminal(&self, task_id: &str, state: &str) {
        let mut event = self.pool.acquire();
        event.id = Event::new_id();
        event.timestamp = chrono::Utc::now();
        event.actor = actor::SYSTEM.to_string();
        event.event_type = event_type::TASK_TERMINAL.to_string();
        event.method = method::TASK_STATE.to_string();
        event.params = serde_json::json!({
            "task_id": task_id,
            "state": state,
        });
        event.task_id = task_id.to_string();
        event.task_state = state.to_string();

        info!(task_id = %task_id, state = %state, "task reached terminal state");
        self.submit(event);
    }
}

fn short(id: &str) -> &str {
    &id[..8.min(id.len())]
}

#[cfg(test)]
mod tests {
    use vouch_core::repo::SqliteEventRepository;
    use vouch_core::verify::verify_chain;

    use super::*;

    struct Harness {
        worker: Arc<LedgerWorker>,
        handle: JoinHandle<()>,
        repo: Arc<SqliteEventRepository>,
        _dir: tempfile::TempDir,
    }

    fn start_worker(capacity: usize) -> Harness {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = Arc::new(SqliteEventRepository::open(dir.path().join("vouch.db")).unwrap());
        let signer = Arc::new(LedgerSigner::load_or_generate(dir.path().join("key")).unwrap());
        let metrics = Arc::new(DaemonMetrics::new().unwrap());
        let pool = Arc::new(EventPool::new(64, Arc::clone(&metrics)));

        let worker = Arc::new(
            LedgerWorker::new(
                Arc::clone(&repo) as Arc<dyn EventRepository>,
                signer,
                pool,
                metrics,
                capacity,
                "test-agent",
            )
            .unwrap(),
        );
        let handle = worker.start().unwrap();
        Harness {
            worker,
            handle,
            repo,
            _dir: dir,
        }
    }

    fn tool_call(method_name: &str) -> Box<Event> {
        Box::new(Event {
            id: Event::new_id(),
            actor: actor::AGENT.to_string(),
            event_type: event_type::TOOL_CALL.to_string(),
            method: method_name.to_string(),
            ..Event::default()
        })
    }

    #[tokio::test]
    async fn start_creates_genesis_once() {
        let h = start_worker(16);
        let run_id = h.worker.run_id();
        assert!(!run_id.is_empty());

        let events = h.repo.all_events(&run_id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, event_type::GENESIS);
        assert_eq!(events[0].method, method::INIT);
        assert_eq!(events[0].prev_hash, GENESIS_HASH);

        h.worker.close();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn submits_drain_in_order_and_chain_verifies() {
        let h = start_worker(64);
        for i in 0..10 {
            h.worker.submit(tool_call(&format!("os:read:{i}")));
        }
        h.worker.close();
        h.handle.await.unwrap();

        let run_id = h.worker.run_id();
        let events = h.repo.all_events(&run_id).unwrap();
        assert_eq!(events.len(), 11);
        for (i, event) in events.iter().enumerate().skip(1) {
            assert_eq!(event.method, format!("os:read:{}", i - 1));
        }

        let (processed, dropped) = h.worker.stats();
        assert_eq!(processed, 11);
        assert_eq!(dropped, 0);

        let result = verify_chain(h.repo.as_ref(), &run_id).unwrap();
        assert!(result.valid, "{}", result.error_message());
    }

    #[tokio::test]
    async fn overflow_drops_and_counts() {
        let h = start_worker(2);

        // Stall the consumer indirectly by flooding faster than it can
        // wake: push straight into the ring until full, then one more.
        for i in 0..16 {
            h.worker.submit(tool_call(&format!("m:{i}")));
        }

        h.worker.close();
        h.handle.await.unwrap();

        let (processed, dropped) = h.worker.stats();
        assert!(processed >= 3); // genesis plus everything that fit
        assert!(processed + dropped >= 17);
    }

    #[tokio::test]
    async fn restart_loads_existing_run() {
        let dir = tempfile::TempDir::new().unwrap();
        let metrics = Arc::new(DaemonMetrics::new().unwrap());
        let pool = Arc::new(EventPool::new(8, Arc::clone(&metrics)));
        let signer = Arc::new(LedgerSigner::load_or_generate(dir.path().join("key")).unwrap());

        let first_run = {
            let repo: Arc<dyn EventRepository> =
                Arc::new(SqliteEventRepository::open(dir.path().join("vouch.db")).unwrap());
            let worker = Arc::new(
                LedgerWorker::new(
                    repo,
                    Arc::clone(&signer),
                    Arc::clone(&pool),
                    Arc::clone(&metrics),
                    8,
                    "test-agent",
                )
                .unwrap(),
            );
            let handle = worker.start().unwrap();
            let run_id = worker.run_id();
            worker.close();
            handle.await.unwrap();
            run_id
        };

        let repo: Arc<dyn EventRepository> =
            Arc::new(SqliteEventRepository::open(dir.path().join("vouch.db")).unwrap());
        let worker = Arc::new(
            LedgerWorker::new(repo, signer, pool, metrics, 8, "test-agent").unwrap(),
        );
        let handle = worker.start().unwrap();
        assert_eq!(worker.run_id(), first_run);
        worker.close();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn task_terminal_is_synthesized_and_purged() {
        let h = start_worker(64);

        let mut call = tool_call("job:poll");
        call.task_id = "task-9".to_string();
        call.task_state = "working".to_string();
        h.worker.submit(call);

        let mut done = tool_call("job:poll");
        done.event_type = event_type::TOOL_RESPONSE.to_string();
        done.task_id = "task-9".to_string();
        done.task_state = "completed".to_string();
        h.worker.submit(done);

        h.worker.close();
        h.handle.await.unwrap();

        let events = h.repo.events_by_task("task-9").unwrap();
        let terminal: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == event_type::TASK_TERMINAL)
            .collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].method, method::TASK_STATE);
        assert_eq!(terminal[0].task_state, "completed");

        assert!(h
            .worker
            .task_states
            .lock()
            .unwrap()
            .get("task-9")
            .is_none());
    }

    #[tokio::test]
    async fn persist_failure_sets_health_sentinel() {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = Arc::new(SqliteEventRepository::open(dir.path().join("vouch.db")).unwrap());
        let signer = Arc::new(LedgerSigner::load_or_generate(dir.path().join("key")).unwrap());
        let metrics = Arc::new(DaemonMetrics::new().unwrap());
        let pool = Arc::new(EventPool::new(8, Arc::clone(&metrics)));

        let worker = Arc::new(
            LedgerWorker::new(
                Arc::clone(&repo) as Arc<dyn EventRepository>,
                signer,
                pool,
                metrics,
                8,
                "test-agent",
            )
            .unwrap(),
        );
        let handle = worker.start().unwrap();
        assert!(worker.is_healthy());

        // Break the store out from under the worker.
        repo.connection()
            .lock()
            .unwrap()
            .execute_batch("DROP TABLE events")
            .unwrap();

        worker.submit(tool_call("os:read"));
        worker.close();
        handle.await.unwrap();

        assert!(!worker.is_healthy());
    }

    #[tokio::test]
    async fn begin_new_run_starts_a_fresh_chain() {
        let h = start_worker(16);
        let old_run = h.worker.run_id();

        let new_run = h.worker.begin_new_run().unwrap();
        assert_ne!(old_run, new_run);
        assert_eq!(h.worker.run_id(), new_run);

        h.worker.submit(tool_call("os:read"));
        h.worker.close();
        h.handle.await.unwrap();

        let events = h.repo.all_events(&new_run).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, event_type::GENESIS);

        let result = verify_chain(h.repo.as_ref(), &new_run).unwrap();
        assert!(result.valid);
        let result = verify_chain(h.repo.as_ref(), &old_run).unwrap();
        assert!(result.valid);
    }
}
