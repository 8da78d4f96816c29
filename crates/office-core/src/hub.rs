use crate::events::{OfficeEvent, Snapshot};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receiving half handed to a subscriber.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    receiver: mpsc::Receiver<OfficeEvent>,
}

impl Subscription {
    /// Next event, or `None` once unsubscribed or the hub shut down.
    pub async fn recv(&mut self) -> Option<OfficeEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<OfficeEvent> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug)]
struct HubInner {
    next_id: u64,
    buffer: usize,
    subscribers: BTreeMap<SubscriberId, mpsc::Sender<OfficeEvent>>,
    last_init: Option<Snapshot>,
    closed: bool,
}

/// In-process fan-out point for office events.
///
/// Delivery never blocks the publisher: each subscriber has a bounded
/// queue and an event that does not fit is dropped for that subscriber
/// only. The latest `init` snapshot is kept so late subscribers start from
/// a complete picture.
#[derive(Debug, Clone)]
pub struct EventHub {
    inner: Arc<Mutex<HubInner>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl EventHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                next_id: 0,
                buffer: buffer.max(1),
                subscribers: BTreeMap::new(),
                last_init: None,
                closed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber. The cached snapshot, if any, is queued first.
    pub fn subscribe(&self) -> Subscription {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = SubscriberId(inner.next_id);
        let (tx, receiver) = mpsc::channel(inner.buffer);
        if inner.closed {
            return Subscription { id, receiver };
        }
        if let Some(snapshot) = inner.last_init.clone() {
            let _ = tx.try_send(OfficeEvent::Init(snapshot));
        }
        inner.subscribers.insert(id, tx);
        debug!(event = "hub_subscribe", subscriber = %id, subscribers = inner.subscribers.len());
        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut inner = self.lock();
        if inner.subscribers.remove(&id).is_some() {
            debug!(event = "hub_unsubscribe", subscriber = %id, subscribers = inner.subscribers.len());
        }
    }

    /// Deliver `event` to every subscriber in registration order.
    pub fn publish(&self, event: OfficeEvent) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        if let OfficeEvent::Init(snapshot) = &event {
            inner.last_init = Some(snapshot.clone());
        }

        let mut gone = Vec::new();
        for (id, tx) in &inner.subscribers {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(event = "hub_subscriber_lagging", subscriber = %id, dropped = event.kind());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*id),
            }
        }
        for id in gone {
            inner.subscribers.remove(&id);
            debug!(event = "hub_subscriber_closed", subscriber = %id);
        }
    }

    /// Refresh the cached snapshot without broadcasting it.
    pub fn cache_snapshot(&self, snapshot: Snapshot) {
        let mut inner = self.lock();
        if !inner.closed {
            inner.last_init = Some(snapshot);
        }
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.lock().last_init.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// End every subscription; later publishes are ignored.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.subscribers.clear();
        debug!(event = "hub_shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AgentState;

    fn snapshot_with(n: usize) -> Snapshot {
        let tasks = (0..n)
            .map(|i| crate::model::TaskRecord {
                id: format!("a-task-{i}"),
                description: String::new(),
                assigned_agent_id: "a".to_string(),
                status: Default::default(),
            })
            .collect();
        Snapshot {
            agents: Vec::new(),
            tasks,
        }
    }

    #[test]
    fn events_reach_every_subscriber_in_order() {
        let hub = EventHub::default();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        hub.publish(OfficeEvent::removed("a"));
        hub.publish(OfficeEvent::removed("b"));

        for sub in [&mut first, &mut second] {
            assert_eq!(sub.try_recv(), Some(OfficeEvent::removed("a")));
            assert_eq!(sub.try_recv(), Some(OfficeEvent::removed("b")));
            assert_eq!(sub.try_recv(), None);
        }
    }

    #[test]
    fn late_subscriber_gets_cached_init_first() {
        let hub = EventHub::default();
        hub.publish(OfficeEvent::Init(snapshot_with(1)));
        hub.publish(OfficeEvent::state_changed("a", AgentState::Typing));
        hub.cache_snapshot(snapshot_with(2));

        let mut late = hub.subscribe();
        hub.publish(OfficeEvent::removed("a"));
        assert_eq!(late.try_recv(), Some(OfficeEvent::Init(snapshot_with(2))));
        assert_eq!(late.try_recv(), Some(OfficeEvent::removed("a")));
    }

    #[test]
    fn full_queue_drops_without_blocking_others() {
        let hub = EventHub::new(1);
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();
        hub.publish(OfficeEvent::removed("a"));
        assert_eq!(fast.try_recv(), Some(OfficeEvent::removed("a")));
        hub.publish(OfficeEvent::removed("b"));
        assert_eq!(fast.try_recv(), Some(OfficeEvent::removed("b")));

        assert_eq!(slow.try_recv(), Some(OfficeEvent::removed("a")));
        assert_eq!(slow.try_recv(), None);
        assert_eq!(hub.subscriber_count(), 2);
    }

    #[test]
    fn dropped_and_unsubscribed_receivers_are_pruned() {
        let hub = EventHub::default();
        let dropped = hub.subscribe();
        let kept = hub.subscribe();
        drop(dropped);
        hub.publish(OfficeEvent::removed("a"));
        assert_eq!(hub.subscriber_count(), 1);
        hub.unsubscribe(kept.id);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_ends_streams() {
        let hub = EventHub::default();
        let mut sub = hub.subscribe();
        hub.shutdown();
        assert_eq!(sub.recv().await, None);
        hub.publish(OfficeEvent::Init(Snapshot::default()));
        assert!(hub.snapshot().is_none());
        assert!(hub.is_closed());
        let mut after = hub.subscribe();
        assert_eq!(after.recv().await, None);
    }
}
