//! Process-local fan-out of "something changed" hints to connected clients.
//!
//! The bus is created once at server start and closed at shutdown. Events are
//! delivered at most once, without ordering guarantees against persistence,
//! and nothing is replayed: consumers refetch authoritative state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_SUBSCRIBERS: usize = 256;
/// Events buffered per subscriber before new ones are dropped for it.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    Ping,
    NewEmail { data: NewEmailNotice },
    ThreadUpdated { data: ThreadUpdatedNotice },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEmailNotice {
    pub thread_id: String,
    pub email_id: String,
    pub mailbox_id: String,
    pub from_address: String,
    pub subject: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadUpdatedNotice {
    pub thread_id: String,
    pub change: String,
}

impl BusEvent {
    pub fn thread_updated(thread_id: &str, change: impl Into<String>) -> Self {
        BusEvent::ThreadUpdated {
            data: ThreadUpdatedNotice {
                thread_id: thread_id.to_string(),
                change: change.into(),
            },
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"ping"}"#.to_string())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BusError {
    #[error("subscriber limit reached ({0})")]
    Full(usize),
    #[error("notification bus is closed")]
    Closed,
    #[error("notification bus lock poisoned")]
    LockPoisoned,
}

pub type SubscriberId = u64;

#[derive(Default)]
struct Registry {
    next_id: SubscriberId,
    subscribers: HashMap<SubscriberId, mpsc::Sender<BusEvent>>,
    closed: bool,
}

pub struct NotificationBus {
    registry: Mutex<Registry>,
    max_subscribers: usize,
    ping_interval: Duration,
}

impl NotificationBus {
    pub fn new(max_subscribers: usize, ping_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Registry::default()),
            max_subscribers: max_subscribers.max(1),
            ping_interval,
        })
    }

    fn registry(&self) -> Result<MutexGuard<'_, Registry>, BusError> {
        self.registry.lock().map_err(|_| BusError::LockPoisoned)
    }

    pub fn subscribe(self: &Arc<Self>) -> Result<Subscription, BusError> {
        let mut registry = self.registry()?;
        if registry.closed {
            return Err(BusError::Closed);
        }
        if registry.subscribers.len() >= self.max_subscribers {
            return Err(BusError::Full(self.max_subscribers));
        }
        let id = registry.next_id;
        registry.next_id += 1;
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        registry.subscribers.insert(id, sender);
        info!(
            "notification subscriber {} joined ({} active)",
            id,
            registry.subscribers.len()
        );
        drop(registry);

        let start = Instant::now() + self.ping_interval;
        let mut ping = interval_at(start, self.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ok(Subscription {
            id,
            receiver,
            ping,
            bus: Arc::clone(self),
        })
    }

    /// Best-effort delivery to every current subscriber. Returns the number
    /// of subscribers that accepted the event.
    pub fn publish(&self, event: &BusEvent) -> usize {
        let mut registry = match self.registry() {
            Ok(registry) => registry,
            Err(err) => {
                warn!("notification publish skipped: {}", err);
                return 0;
            }
        };
        let mut delivered = 0;
        let mut gone = Vec::new();
        for (id, sender) in registry.subscribers.iter() {
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("notification subscriber {} is lagging; event dropped", id);
                }
                Err(TrySendError::Closed(_)) => gone.push(*id),
            }
        }
        for id in gone {
            registry.subscribers.remove(&id);
            debug!("notification subscriber {} pruned after disconnect", id);
        }
        delivered
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        match self.registry() {
            Ok(mut registry) => {
                let removed = registry.subscribers.remove(&id).is_some();
                if removed {
                    info!(
                        "notification subscriber {} left ({} active)",
                        id,
                        registry.subscribers.len()
                    );
                }
                removed
            }
            Err(_) => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry()
            .map(|registry| registry.subscribers.len())
            .unwrap_or(0)
    }

    /// Drops every subscriber (their streams end) and refuses new ones.
    pub fn close(&self) {
        if let Ok(mut registry) = self.registry() {
            registry.closed = true;
            let dropped = registry.subscribers.len();
            registry.subscribers.clear();
            info!("notification bus closed ({} subscribers dropped)", dropped);
        }
    }

    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }
}

/// One connected client. Dropping it unsubscribes and stops its keep-alive
/// timer.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<BusEvent>,
    ping: Interval,
    bus: Arc<NotificationBus>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next published event, or a ping when the keep-alive interval elapses
    /// first. `None` once the bus dropped this subscriber.
    pub async fn next_event(&mut self) -> Option<BusEvent> {
        tokio::select! {
            event = self.receiver.recv() => {
                if event.is_some() {
                    self.ping.reset();
                }
                event
            }
            _ = self.ping.tick() => Some(BusEvent::Ping),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> BusEvent {
        BusEvent::NewEmail {
            data: NewEmailNotice {
                thread_id: "t1".to_string(),
                email_id: "e1".to_string(),
                mailbox_id: "m1".to_string(),
                from_address: "alice@example.com".to_string(),
                subject: "hi".to_string(),
            },
        }
    }

    #[test]
    fn events_serialize_with_type_tag() {
        assert_eq!(BusEvent::Ping.to_json(), r#"{"type":"ping"}"#);
        let value: serde_json::Value =
            serde_json::from_str(&BusEvent::thread_updated("t9", "archived").to_json()).unwrap();
        assert_eq!(value["type"], "thread_updated");
        assert_eq!(value["data"]["threadId"], "t9");
        assert_eq!(value["data"]["change"], "archived");
        let value: serde_json::Value = serde_json::from_str(&sample_event().to_json()).unwrap();
        assert_eq!(value["type"], "new_email");
        assert_eq!(value["data"]["emailId"], "e1");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let bus = NotificationBus::new(4, DEFAULT_PING_INTERVAL);
        assert_eq!(bus.publish(&sample_event()), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn every_subscriber_receives_published_events() {
        let bus = NotificationBus::new(4, DEFAULT_PING_INTERVAL);
        let mut first = bus.subscribe().unwrap();
        let mut second = bus.subscribe().unwrap();

        assert_eq!(bus.publish(&sample_event()), 2);
        assert_eq!(first.next_event().await, Some(sample_event()));
        assert_eq!(second.next_event().await, Some(sample_event()));
    }

    #[tokio::test]
    async fn dropped_subscription_is_removed() {
        let bus = NotificationBus::new(4, DEFAULT_PING_INTERVAL);
        let kept = bus.subscribe().unwrap();
        let gone = bus.subscribe().unwrap();
        let gone_id = gone.id();
        drop(gone);

        assert_eq!(bus.subscriber_count(), 1);
        assert!(!bus.unsubscribe(gone_id));
        assert_eq!(bus.publish(&sample_event()), 1);
        drop(kept);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscriber_limit_is_enforced() {
        let bus = NotificationBus::new(1, DEFAULT_PING_INTERVAL);
        let _held = bus.subscribe().unwrap();
        assert!(matches!(bus.subscribe(), Err(BusError::Full(1))));
    }

    #[tokio::test]
    async fn lagging_subscriber_does_not_block_others() {
        let bus = NotificationBus::new(4, DEFAULT_PING_INTERVAL);
        let _lagging = bus.subscribe().unwrap();
        for _ in 0..SUBSCRIBER_QUEUE_CAPACITY {
            bus.publish(&sample_event());
        }
        let mut fresh = bus.subscribe().unwrap();
        assert_eq!(bus.publish(&sample_event()), 1);
        assert_eq!(fresh.next_event().await, Some(sample_event()));
    }

    #[tokio::test]
    async fn close_ends_streams_and_refuses_new_subscribers() {
        let bus = NotificationBus::new(4, DEFAULT_PING_INTERVAL);
        let mut sub = bus.subscribe().unwrap();
        bus.close();
        assert_eq!(sub.next_event().await, None);
        assert!(matches!(bus.subscribe(), Err(BusError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_subscription_emits_pings() {
        let bus = NotificationBus::new(4, Duration::from_secs(30));
        let mut sub = bus.subscribe().unwrap();
        assert_eq!(sub.next_event().await, Some(BusEvent::Ping));
    }
}
