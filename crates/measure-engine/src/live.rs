//! Live subscriptions to committed snapshots.
//!
//! # Design Principles
//!
//! - Subscribers are notified after the mutation is committed
//! - A new subscriber immediately receives the current snapshot
//! - Subscribers are notified in registration order
//! - Recovery does not trigger notifications

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use measure_database::{SessionId, StorageError};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::snapshot::{Emission, Snapshot};

/// A stream of emissions for one observer.
///
/// Dropping the subscription removes it from the hub.
pub struct Subscription {
    id: u64,
    filter: Option<SessionId>,
    receiver: UnboundedReceiver<Emission>,
    hub: Weak<SnapshotHub>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The session this subscription is restricted to, if any.
    pub fn filter(&self) -> Option<&SessionId> {
        self.filter.as_ref()
    }

    /// Waits for the next emission.
    ///
    /// Returns `None` once the hub has been closed and every queued
    /// emission has been received.
    pub async fn recv(&mut self) -> Option<Emission> {
        self.receiver.recv().await
    }

    /// Returns the next emission if one is already queued.
    pub fn try_recv(&mut self) -> Option<Emission> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .finish()
    }
}

struct Subscriber {
    id: u64,
    filter: Option<SessionId>,
    sender: UnboundedSender<Emission>,
}

/// Fans committed snapshots out to subscriptions.
#[derive(Default)]
pub struct SnapshotHub {
    /// Registration order is delivery order.
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl SnapshotHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a subscriber and sends it `current` right away.
    ///
    /// On a closed hub the returned subscription yields nothing.
    pub fn subscribe(
        self: &Arc<Self>,
        filter: Option<SessionId>,
        current: &Snapshot,
    ) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers.lock();
        if !self.closed.load(Ordering::Acquire) {
            // The receiver is alive, so this send cannot fail.
            let _ = sender.send(Ok(current.filtered(filter.as_ref())));
            subscribers.push(Subscriber {
                id,
                filter: filter.clone(),
                sender,
            });
            debug!(subscription = id, filtered = filter.is_some(), "Subscribed");
        }
        drop(subscribers);

        Subscription {
            id,
            filter,
            receiver,
            hub: Arc::downgrade(self),
        }
    }

    /// Sends a committed snapshot to every subscriber.
    pub fn publish(&self, snapshot: &Snapshot) {
        self.fan_out(|filter| Ok(snapshot.filtered(filter)));
    }

    /// Sends a storage failure to every subscriber.
    pub fn publish_error(&self, error: &StorageError) {
        self.fan_out(|_| Err(error.clone()));
    }

    fn fan_out(&self, emission: impl Fn(Option<&SessionId>) -> Emission) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| {
            match subscriber.sender.send(emission(subscriber.filter.as_ref())) {
                Ok(()) => true,
                Err(_) => {
                    debug!(
                        subscription = subscriber.id,
                        error = %StorageError::Cancelled,
                        "Dropping departed subscriber"
                    );
                    false
                }
            }
        });
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
    }

    /// Ends every subscription. Later subscriptions end immediately.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let removed = std::mem::take(&mut *self.subscribers.lock());
        debug!(subscribers = removed.len(), "Snapshot hub closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
