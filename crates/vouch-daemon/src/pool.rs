//! Recycled event allocations.
//!
//! Every intercepted exchange allocates an [`Event`] on the hot path; the
//! pool hands finished events back to the proxy instead of hitting the
//! allocator each time. Hits and misses feed the `vouch_pool_*` metrics.

use std::sync::{Arc, Mutex};

use vouch_core::event::Event;

use crate::metrics::DaemonMetrics;

/// Default number of events kept for reuse.
pub const DEFAULT_POOL_CAPACITY: usize = 256;

/// Bounded free-list of event boxes.
pub struct EventPool {
    free: Mutex<Vec<Box<Event>>>,
    capacity: usize,
    metrics: Arc<DaemonMetrics>,
}

impl EventPool {
    /// Creates a pool retaining at most `capacity` idle events.
    #[must_use]
    pub fn new(capacity: usize, metrics: Arc<DaemonMetrics>) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            metrics,
        }
    }

    /// Takes an event from the pool, or allocates when empty.
    ///
    /// The returned event is always in its default (reset) state.
    #[must_use]
    pub fn acquire(&self) -> Box<Event> {
        let recycled = self
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop();

        match recycled {
            Some(event) => {
                self.metrics.pool_hit();
                event
            },
            None => {
                self.metrics.pool_miss();
                Box::new(Event::default())
            },
        }
    }

    /// Returns a finished event for reuse. Excess events beyond the pool
    /// capacity fall to the allocator.
    pub fn release(&self, mut event: Box<Event>) {
        event.reset();
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        if free.len() < self.capacity {
            free.push(event);
        }
    }

    /// Number of idle events currently held.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
