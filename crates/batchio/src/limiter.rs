//! Concurrency limiter: a queue of pending work gated by a fixed number of slots.
//!
//! Taking an item requires holding one of `size` slots. The slot travels with
//! the item inside a [`Lease`] and goes back to the limiter when the lease is
//! released or dropped, so a slot can never be returned twice.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::EngineConfig;
use crate::sync::SyncList;

/// Bounded-concurrency work queue.
pub struct Limiter<T> {
    size: usize,
    slots: Arc<Semaphore>,
    queue: SyncList<T>,
}

impl<T> Limiter<T> {
    /// # Panics
    /// If `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "Limiter size must be at least 1");
        Self {
            size,
            slots: Arc::new(Semaphore::new(size)),
            queue: SyncList::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.limiter_size)
    }

    /// Enqueue payloads. Safe to call while other tasks are in [`Limiter::get`].
    pub fn load<I: IntoIterator<Item = T>>(&self, items: I) {
        self.queue.extend(items);
    }

    /// Wait for a free slot, then take the head of the queue.
    ///
    /// Returns `None` if the queue is empty once a slot is held; the slot is
    /// given back immediately in that case.
    pub async fn get(&self) -> Option<Lease<T>> {
        // The semaphore is never closed, so acquisition only fails if that changes.
        let permit = Arc::clone(&self.slots).acquire_owned().await.ok()?;
        self.lease(permit)
    }

    /// Non-blocking [`Limiter::get`]: `None` when at capacity or when the queue is empty.
    pub fn try_get(&self) -> Option<Lease<T>> {
        let permit = Arc::clone(&self.slots).try_acquire_owned().ok()?;
        self.lease(permit)
    }

    fn lease(&self, permit: OwnedSemaphorePermit) -> Option<Lease<T>> {
        match self.queue.pop_front() {
            Some(item) => Some(Lease {
                item,
                _slot: permit,
            }),
            None => {
                tracing::trace!("Limiter queue empty, returning slot");
                None
            }
        }
    }

    /// Maximum number of concurrently held leases.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Queued payloads not yet handed out.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// An item taken from a [`Limiter`] together with the slot it occupies.
///
/// The slot is returned on drop.
#[must_use = "dropping a Lease immediately releases its slot"]
pub struct Lease<T> {
    item: T,
    _slot: OwnedSemaphorePermit,
}

impl<T> Lease<T> {
    /// Give the slot back and keep the item.
    pub fn release(self) -> T {
        self.item
    }
}

impl<T> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.item
    }
}

impl<T> DerefMut for Lease<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.item
    }
}
