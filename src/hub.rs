// ===============================
// src/hub.rs
// ===============================
//
// Bounded fan-out of pipeline events to any number of stream consumers.
//
// - Every subscriber owns a FIFO of at most `capacity` events; when full the
//   oldest event is dropped, so a slow consumer only loses its own history.
// - publish never awaits and never blocks on a consumer.
// - All queues live behind one lock: publish / subscribe / unsubscribe / pop
//   are mutually exclusive.
// - A consumer whose sink broke calls `mark_failed`; the next publish drops it.
//

use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::domain::Event;
use crate::metrics::{EVENTS_DROPPED, EVENTS_PUBLISHED, SUBSCRIBERS, SUBSCRIBERS_EVICTED};

pub const DEFAULT_QUEUE: usize = 100;

struct Slot {
    queue: VecDeque<Event>,
    notify: Arc<Notify>,
    alive: bool,
}

struct Inner {
    slots: HashMap<u64, Slot>,
    closed: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    capacity: usize,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct Hub {
    shared: Arc<Shared>,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner { slots: HashMap::new(), closed: false }),
                capacity: capacity.max(1),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a consumer. Its queue starts with a `connected` acknowledgement.
    pub fn subscribe(&self) -> Subscriber {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let notify = Arc::new(Notify::new());
        let mut queue = VecDeque::with_capacity(self.shared.capacity.min(128));
        queue.push_back(Event::connected());

        let mut inner = self.shared.inner.lock();
        inner.slots.insert(id, Slot { queue, notify: notify.clone(), alive: true });
        SUBSCRIBERS.set(inner.slots.len() as i64);
        drop(inner);

        info!(id, "hub: subscriber added");
        Subscriber { id, shared: self.shared.clone(), notify }
    }

    pub fn publish(&self, event: Event) {
        let cap = self.shared.capacity;
        let mut inner = self.shared.inner.lock();
        if inner.closed {
            return;
        }

        let before = inner.slots.len();
        inner.slots.retain(|_, s| s.alive);
        let evicted = before - inner.slots.len();
        if evicted > 0 {
            SUBSCRIBERS_EVICTED.inc_by(evicted as u64);
            SUBSCRIBERS.set(inner.slots.len() as i64);
            debug!(evicted, "hub: dropped failed subscribers");
        }

        let mut dropped = 0u64;
        for slot in inner.slots.values_mut() {
            if slot.queue.len() >= cap {
                slot.queue.pop_front();
                dropped += 1;
            }
            slot.queue.push_back(event.clone());
            slot.notify.notify_one();
        }
        drop(inner);

        if dropped > 0 {
            EVENTS_DROPPED.inc_by(dropped);
        }
        EVENTS_PUBLISHED.with_label_values(&[event.kind()]).inc();
    }

    pub fn unsubscribe(&self, id: u64) {
        remove(&self.shared, id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.inner.lock().slots.values().filter(|s| s.alive).count()
    }

    /// Stop accepting events and wake every consumer; queues still drain.
    pub fn close(&self) {
        let mut inner = self.shared.inner.lock();
        inner.closed = true;
        for slot in inner.slots.values() {
            slot.notify.notify_one();
        }
    }
}

fn remove(shared: &Shared, id: u64) {
    let mut inner = shared.inner.lock();
    if let Some(slot) = inner.slots.remove(&id) {
        slot.notify.notify_one();
        SUBSCRIBERS.set(inner.slots.len() as i64);
        drop(inner);
        info!(id, "hub: subscriber removed");
    }
}

/// Consumer handle. Dropping it unsubscribes.
pub struct Subscriber {
    id: u64,
    shared: Arc<Shared>,
    notify: Arc<Notify>,
}

impl Subscriber {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn try_recv(&self) -> Option<Event> {
        let mut inner = self.shared.inner.lock();
        inner.slots.get_mut(&self.id).and_then(|s| s.queue.pop_front())
    }

    pub fn pending(&self) -> usize {
        let inner = self.shared.inner.lock();
        inner.slots.get(&self.id).map(|s| s.queue.len()).unwrap_or(0)
    }

    pub fn drain(&self) -> Vec<Event> {
        let mut inner = self.shared.inner.lock();
        inner
            .slots
            .get_mut(&self.id)
            .map(|s| s.queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// Next event in publish order. Yields a heartbeat after `heartbeat` of
    /// silence; `None` once removed, failed, or the hub closed and drained.
    pub async fn recv(&self, heartbeat: Duration) -> Option<Event> {
        loop {
            {
                let mut inner = self.shared.inner.lock();
                let closed = inner.closed;
                match inner.slots.get_mut(&self.id) {
                    Some(slot) if slot.alive => {
                        if let Some(ev) = slot.queue.pop_front() {
                            return Some(ev);
                        }
                        if closed {
                            return None;
                        }
                    }
                    _ => return None,
                }
            }
            if timeout(heartbeat, self.notify.notified()).await.is_err() {
                return Some(Event::heartbeat());
            }
        }
    }

    /// The sink behind this subscriber is gone; evicted on the next publish.
    pub fn mark_failed(&self) {
        let mut inner = self.shared.inner.lock();
        if let Some(slot) = inner.slots.get_mut(&self.id) {
            slot.alive = false;
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        remove(&self.shared, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(i: i64) -> Event {
        Event::Heartbeat { ts_ms: i }
    }

    #[test]
    fn subscriber_starts_with_ack() {
        let hub = Hub::new(10);
        let sub = hub.subscribe();
        assert!(matches!(sub.try_recv(), Some(Event::Connected { .. })));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn full_queue_keeps_latest_events() {
        let hub = Hub::new(100);
        let sub = hub.subscribe();
        for i in 0..150 {
            hub.publish(numbered(i));
        }
        let got: Vec<i64> = sub
            .drain()
            .into_iter()
            .map(|e| match e {
                Event::Heartbeat { ts_ms } => ts_ms,
                other => panic!("unexpected {}", other.kind()),
            })
            .collect();
        assert_eq!(got.len(), 100);
        assert_eq!(got, (50..150).collect::<Vec<_>>());
    }

    #[test]
    fn slow_consumer_does_not_affect_others() {
        let hub = Hub::new(3);
        let slow = hub.subscribe();
        let fast = hub.subscribe();
        for i in 0..5 {
            hub.publish(numbered(i));
            while fast.try_recv().is_some() {}
        }
        assert_eq!(slow.pending(), 3);
        assert_eq!(fast.pending(), 0);
    }

    #[test]
    fn failed_subscriber_is_evicted_on_publish() {
        let hub = Hub::new(10);
        let a = hub.subscribe();
        let _b = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);
        a.mark_failed();
        assert_eq!(hub.subscriber_count(), 1);
        hub.publish(numbered(1));
        assert_eq!(a.pending(), 0);
        assert!(a.try_recv().is_none());
    }

    #[test]
    fn drop_unsubscribes() {
        let hub = Hub::new(10);
        {
            let _s = hub.subscribe();
            assert_eq!(hub.subscriber_count(), 1);
        }
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribed_consumer_stops_receiving() {
        let hub = Hub::new(10);
        let a = hub.subscribe();
        let b = hub.subscribe();
        hub.unsubscribe(a.id());
        hub.unsubscribe(a.id());
        assert_eq!(hub.subscriber_count(), 1);

        hub.publish(numbered(1));
        assert!(a.recv(Duration::from_secs(5)).await.is_none());
        assert_eq!(b.pending(), 2);
    }

    #[tokio::test]
    async fn recv_wakes_on_publish() {
        let hub = Hub::new(10);
        let sub = hub.subscribe();
        assert!(matches!(sub.recv(Duration::from_secs(5)).await, Some(Event::Connected { .. })));

        let producer = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.publish(numbered(7));
        });
        match sub.recv(Duration::from_secs(5)).await {
            Some(Event::Heartbeat { ts_ms }) => assert_eq!(ts_ms, 7),
            other => panic!("unexpected {:?}", other.map(|e| e.kind())),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_subscriber_gets_heartbeat() {
        let hub = Hub::new(10);
        let sub = hub.subscribe();
        let _ = sub.try_recv();
        let ev = sub.recv(Duration::from_secs(30)).await;
        assert!(matches!(ev, Some(Event::Heartbeat { .. })));
    }

    #[tokio::test]
    async fn closed_hub_drains_then_ends() {
        let hub = Hub::new(10);
        let sub = hub.subscribe();
        hub.publish(numbered(1));
        hub.close();
        hub.publish(numbered(2));
        assert!(matches!(sub.recv(Duration::from_secs(1)).await, Some(Event::Connected { .. })));
        assert!(matches!(sub.recv(Duration::from_secs(1)).await, Some(Event::Heartbeat { ts_ms: 1 })));
        assert!(sub.recv(Duration::from_secs(1)).await.is_none());
    }
}
