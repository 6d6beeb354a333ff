//! Bounded, thread-safe FIFO between the proxy handlers and the ledger
//! worker.
//!
//! The buffer allocates its storage once at construction and never grows.
//! Multiple producers push from request handlers; a single consumer (the
//! worker's drain loop) pops. `push` on a full buffer is an error, not a
//! wait: backpressure policy belongs to the caller.

use std::sync::Mutex;

use thiserror::Error;

/// Errors from ring buffer operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// The buffer is at capacity; the item was not enqueued.
    #[error("ring buffer is full")]
    Full,

    /// The buffer has no items to pop.
    #[error("ring buffer is empty")]
    Empty,

    /// Construction was attempted with a zero capacity.
    #[error("ring buffer capacity must be positive")]
    InvalidCapacity,
}

struct Inner<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    count: usize,
}

/// Fixed-capacity MPSC ring buffer.
pub struct RingBuffer<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Creates a buffer holding at most `capacity` items.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::InvalidCapacity`] when `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, RingError> {
        if capacity == 0 {
            return Err(RingError::InvalidCapacity);
        }

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Ok(Self {
            inner: Mutex::new(Inner {
                slots,
                head: 0,
                tail: 0,
                count: 0,
            }),
            capacity,
        })
    }

    /// Enqueues an item.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Full`] when no slot is free; the item is
    /// consumed either way, so callers that need it afterwards must keep
    /// what they need before pushing.
    pub fn push(&self, item: T) -> Result<(), RingError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if inner.count == self.capacity {
            return Err(RingError::Full);
        }

        let tail = inner.tail;
        inner.slots[tail] = Some(item);
        inner.tail = (tail + 1) % self.capacity;
        inner.count += 1;
        Ok(())
    }

    /// Dequeues the oldest item.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Empty`] when nothing is queued.
    pub fn pop(&self) -> Result<T, RingError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if inner.count == 0 {
            return Err(RingError::Empty);
        }

        let head = inner.head;
        let item = inner.slots[head].take().ok_or(RingError::Empty)?;
        inner.head = (head + 1) % self.capacity;
        inner.count -= 1;
        Ok(item)
    }

    /// Returns `true` when every slot is occupied.
    pub fn is_full(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.count == self.capacity
    }

    /// Returns `true` when no slot is occupied.
    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.count == 0
    }

    /// Returns the number of queued items.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.count
    }

    /// Returns the fixed capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
