//! Per-session progress publisher.
//!
//! Every observer gets its own bounded queue. Publishing never waits: the
//! observer set is copied under the lock, then each queue is offered the
//! event with `try_send`. A full queue loses that event, a closed one is
//! pruned. One slot of every queue is held back for the terminal event, so
//! even a lagging observer sees `isFinal` before its stream ends. After the
//! terminal event all queues are closed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::types::ProgressEvent;

/// Default per-observer queue depth.
pub const DEFAULT_CAPACITY: usize = 256;

/// Identifies one subscription for `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving side of a subscription.
///
/// Page events may be skipped when the receiver falls behind; the terminal
/// event is always delivered, and is always the last one.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub receiver: mpsc::Receiver<ProgressEvent>,
}

struct Observer {
    id: SubscriptionId,
    tx: mpsc::Sender<ProgressEvent>,
}

/// Fan-out of progress events to the current observers of one session.
pub struct ProgressPublisher {
    observers: Mutex<Vec<Observer>>,
    capacity: usize,
    next_id: AtomicU64,
    finished: AtomicBool,
}

impl Default for ProgressPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ProgressPublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            finished: AtomicBool::new(false),
        }
    }

    fn observers(&self) -> MutexGuard<'_, Vec<Observer>> {
        self.observers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe to all events published from now on.
    ///
    /// Subscribing after the terminal event yields an already-ended stream.
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, receiver) = mpsc::channel(self.capacity + 1);

        let mut observers = self.observers();
        if !self.finished.load(Ordering::Acquire) {
            observers.push(Observer { id, tx });
        }
        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.observers().retain(|o| o.id != id);
    }

    pub fn observer_count(&self) -> usize {
        self.observers().len()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Offer an event to every current observer. Returns how many took it.
    pub fn publish(&self, event: ProgressEvent) -> usize {
        if self.is_finished() {
            tracing::warn!(
                "Dropping event for page {} of finished session {}",
                event.page_index,
                event.session_id
            );
            return 0;
        }

        let snapshot: Vec<(SubscriptionId, mpsc::Sender<ProgressEvent>)> = self
            .observers()
            .iter()
            .map(|o| (o.id, o.tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut gone = Vec::new();
        for (id, tx) in snapshot {
            // The last free slot belongs to the terminal event.
            if !event.is_final && !tx.is_closed() && tx.capacity() <= 1 {
                tracing::debug!("Observer {id:?} is lagging, dropped page {}", event.page_index);
                continue;
            }
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!("Observer {id:?} is lagging, dropped page {}", event.page_index);
                }
                Err(TrySendError::Closed(_)) => gone.push(id),
            }
        }

        let mut observers = self.observers();
        if !gone.is_empty() {
            observers.retain(|o| !gone.contains(&o.id));
        }
        if event.is_final {
            self.finished.store(true, Ordering::Release);
            observers.clear();
        }
        delivered
    }
}
