//! Engine glue: the single owning object for the worker, the policy engine,
//! and the per-task causality maps.
//!
//! No process-wide singletons; everything hangs off one `Arc<Engine>` that
//! the proxy and admin surfaces share. The task maps are updated after every
//! submit so the request hook can resolve `parent_id` for the next event in
//! the same task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use vouch_core::event::{task_state, Event};
use vouch_core::policy::PolicyEngine;

use crate::metrics::DaemonMetrics;
use crate::pool::EventPool;
use crate::worker::LedgerWorker;

/// Snapshot returned by `/admin/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    /// Event pool counters.
    pub pool: PoolStats,
    /// Ledger worker counters.
    pub ledger: LedgerStats,
    /// Number of currently active causal tasks.
    pub active_tasks: usize,
}

/// Pool counter snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Reuse hits.
    pub event_hits: u64,
    /// Fresh allocations.
    pub event_misses: u64,
}

/// Worker counter snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerStats {
    /// Events written to the ledger.
    pub events_processed: u64,
    /// Events dropped under backpressure.
    pub events_dropped: u64,
    /// False once any persist has failed.
    pub healthy: bool,
}

/// Central state manager.
pub struct Engine {
    worker: Arc<LedgerWorker>,
    policy: PolicyEngine,
    pool: Arc<EventPool>,
    metrics: Arc<DaemonMetrics>,
    active_tasks: Mutex<HashMap<String, String>>,
    last_event_by_task: Mutex<HashMap<String, String>>,
}

impl Engine {
    /// Wires the engine over an already-started worker.
    #[must_use]
    pub fn new(
        worker: Arc<LedgerWorker>,
        policy: PolicyEngine,
        pool: Arc<EventPool>,
        metrics: Arc<DaemonMetrics>,
    ) -> Self {
        Self {
            worker,
            policy,
            pool,
            metrics,
            active_tasks: Mutex::new(HashMap::new()),
            last_event_by_task: Mutex::new(HashMap::new()),
        }
    }

    /// The ledger worker.
    #[must_use]
    pub fn worker(&self) -> &Arc<LedgerWorker> {
        &self.worker
    }

    /// The loaded policy.
    #[must_use]
    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// The event pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<EventPool> {
        &self.pool
    }

    /// The metrics registry.
    #[must_use]
    pub fn metrics(&self) -> &Arc<DaemonMetrics> {
        &self.metrics
    }

    /// Id of the last event recorded for a task, for `parent_id` linkage.
    #[must_use]
    pub fn last_event_for_task(&self, task_id: &str) -> Option<String> {
        self.last_event_by_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(task_id)
            .cloned()
    }

    /// Number of tasks currently tracked as active.
    #[must_use]
    pub fn active_task_count(&self) -> usize {
        self.active_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Updates the task maps for an outgoing event, then hands it to the
    /// worker. Terminal states retire the task from both maps.
    pub fn submit(&self, event: Box<Event>) {
        if !event.task_id.is_empty() {
            {
                let mut last = self
                    .last_event_by_task
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                let mut active = self.active_tasks.lock().unwrap_or_else(|e| e.into_inner());

                if task_state::is_terminal(&event.task_state) {
                    last.remove(&event.task_id);
                    active.remove(&event.task_id);
                } else {
                    last.insert(event.task_id.clone(), event.id.clone());
                    if !event.task_state.is_empty() {
                        active.insert(event.task_id.clone(), event.task_state.clone());
                    }
                }
                self.metrics.set_active_tasks(active.len() as i64);
            }
        }

        self.worker.submit(event);
    }

    /// Counter snapshot for the admin surface.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let (processed, dropped) = self.worker.stats();
        EngineStats {
            pool: PoolStats {
                event_hits: self.metrics.pool_hits(),
                event_misses: self.metrics.pool_misses(),
            },
            ledger: LedgerStats {
                events_processed: processed,
                events_dropped: dropped,
                healthy: self.worker.is_healthy(),
            },
            active_tasks: self.active_task_count(),
        }
    }
}
