//! Per-message exclusion within one process.
//!
//! A message may be queued twice (a scheduler re-claims it after its
//! visibility timeout while the first pass is still running). The registry
//! guarantees at most one pass per message is in flight at a time.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use hookline_core::models::MessageId;

/// Set of messages with a delivery pass in flight.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    inner: Arc<Mutex<HashSet<MessageId>>>,
}

impl InFlightRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lease for `id`, or returns `None` if it is already held.
    pub fn try_acquire(&self, id: MessageId) -> Option<MessageLease> {
        let inserted = self.inner.lock().unwrap_or_else(PoisonError::into_inner).insert(id);

        inserted.then(|| MessageLease { id, registry: self.inner.clone() })
    }

    /// Returns true if a lease for `id` is currently held.
    pub fn contains(&self, id: MessageId) -> bool {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).contains(&id)
    }

    /// Number of leases currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if no lease is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusion token for one message. Released on drop.
#[derive(Debug)]
pub struct MessageLease {
    id: MessageId,
    registry: Arc<Mutex<HashSet<MessageId>>>,
}

impl MessageLease {
    /// Message this lease covers.
    pub fn message_id(&self) -> MessageId {
        self.id
    }
}

impl Drop for MessageLease {
    fn drop(&mut self) {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.id);
    }
}
