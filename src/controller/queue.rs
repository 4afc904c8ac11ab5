//! # Work Queue
//!
//! FIFO queue feeding watch events to the worker loops.
//!
//! Duplicate suppression is keyed on (event, namespace, name): a key stays
//! pending from enqueue until the worker calls [`WorkQueue::done`], so
//! deliveries arriving while an identical item is queued or in flight
//! coalesce into it. Items are marked done whether the handler succeeded or
//! not; a failed attempt is only retried if the watch stream re-delivers
//! the resource.

use crate::crd::Database;
use crate::observability::metrics;
use kube::ResourceExt;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

/// Watch event kind carried by a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Add,
    Delete,
}

/// A watch event paired with the resource snapshot it arrived with
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub event: Event,
    pub resource: Database,
}

/// Duplicate-suppression key for a queue item
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub event: Event,
    pub namespace: String,
    pub name: String,
}

impl QueueItem {
    pub fn new(event: Event, resource: Database) -> Self {
        Self { event, resource }
    }

    pub fn key(&self) -> ItemKey {
        ItemKey {
            event: self.event,
            namespace: self.resource.namespace().unwrap_or_default(),
            name: self.resource.name_any(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    items: VecDeque<QueueItem>,
    pending: HashSet<ItemKey>,
}

/// Thread-safe FIFO queue with duplicate suppression
#[derive(Debug, Default)]
pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    closed: AtomicBool,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an item; returns false when it coalesced into an already
    /// pending item or the queue is closed
    pub fn push(&self, item: QueueItem) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let key = item.key();
        let depth;
        {
            let mut inner = self.inner.lock().expect("work queue poisoned");
            if !inner.pending.insert(key) {
                return false;
            }
            inner.items.push_back(item);
            depth = inner.items.len();
        }
        metrics::set_queue_depth(depth);
        self.notify.notify_one();
        true
    }

    /// Dequeue the next item, waiting for one to arrive
    ///
    /// Returns `None` once the queue is closed; remaining items are
    /// abandoned so workers exit after their current item.
    pub async fn recv(&self) -> Option<QueueItem> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            {
                let mut inner = self.inner.lock().expect("work queue poisoned");
                if let Some(item) = inner.items.pop_front() {
                    metrics::set_queue_depth(inner.items.len());
                    return Some(item);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Clear an item's pending marker once its handler has returned,
    /// regardless of the handler's outcome
    pub fn done(&self, key: &ItemKey) {
        let mut inner = self.inner.lock().expect("work queue poisoned");
        inner.pending.remove(key);
    }

    /// Stop accepting work and wake all waiting workers
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DatabaseSpec;
    use std::sync::Arc;
    use std::time::Duration;

    fn resource(namespace: &str, name: &str) -> Database {
        let mut db = Database::new(name, DatabaseSpec::default());
        db.metadata.namespace = Some(namespace.to_string());
        db
    }

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let queue = WorkQueue::new();
        assert!(queue.push(QueueItem::new(Event::Add, resource("ns", "first"))));
        assert!(queue.push(QueueItem::new(Event::Add, resource("ns", "second"))));

        assert_eq!(queue.recv().await.unwrap().resource.name_any(), "first");
        assert_eq!(queue.recv().await.unwrap().resource.name_any(), "second");
    }

    #[tokio::test]
    async fn coalesces_duplicate_pending_items() {
        let queue = WorkQueue::new();
        assert!(queue.push(QueueItem::new(Event::Add, resource("ns", "db"))));
        assert!(!queue.push(QueueItem::new(Event::Add, resource("ns", "db"))));
        // a delete for the same resource is distinct work
        assert!(queue.push(QueueItem::new(Event::Delete, resource("ns", "db"))));
    }

    #[tokio::test]
    async fn key_stays_pending_until_done() {
        let queue = WorkQueue::new();
        let item = QueueItem::new(Event::Add, resource("ns", "db"));
        let key = item.key();
        assert!(queue.push(item.clone()));

        let dequeued = queue.recv().await.unwrap();
        // still in flight: a re-delivery coalesces
        assert!(!queue.push(item.clone()));

        queue.done(&dequeued.key());
        assert_eq!(dequeued.key(), key);
        // after done, the same key may be enqueued again
        assert!(queue.push(item));
    }

    #[tokio::test]
    async fn close_wakes_waiting_receivers() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        let received = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("receiver did not wake")
            .unwrap();
        assert!(received.is_none());
        assert!(!queue.push(QueueItem::new(Event::Add, resource("ns", "db"))));
    }
}
