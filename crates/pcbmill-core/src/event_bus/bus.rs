//! Per-session event bus.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::{EventCategory, SessionEvent};

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.0.simple().to_string();
        write!(f, "sub-{}", &simple[..8])
    }
}

/// Which events a handler sees
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EventFilter {
    /// Everything.
    #[default]
    All,
    /// Only events in one of these categories.
    Categories(Vec<EventCategory>),
}

impl EventFilter {
    /// Check whether `event` passes
    pub fn matches(&self, event: &SessionEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Categories(wanted) => wanted.contains(&event.category()),
        }
    }
}

/// Bus settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBusConfig {
    /// Events buffered per async receiver before it lags.
    pub channel_capacity: usize,
    /// Log every published event at `trace` level.
    pub trace_events: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            trace_events: true,
        }
    }
}

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    filter: EventFilter,
    handler: Handler,
}

/// Fan-out of [`SessionEvent`]s
///
/// Synchronous handlers run on the publishing task in subscription order,
/// outside the subscription lock, so a handler may subscribe or unsubscribe.
/// Async consumers take a broadcast [`receiver`](Self::receiver) and only
/// see events published after they subscribed.
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
    subscriptions: RwLock<Vec<Subscription>>,
    config: EventBusConfig,
}

impl EventBus {
    /// Bus with default settings
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Bus with `config`
    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            subscriptions: RwLock::new(Vec::new()),
            config,
        }
    }

    /// Deliver `event` to matching handlers, then to async receivers
    ///
    /// Returns how many handlers and receivers got it; zero is not an error.
    pub fn publish(&self, event: SessionEvent) -> usize {
        if self.config.trace_events {
            tracing::trace!("{}", event.description());
        }

        let handlers: Vec<Handler> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.filter.matches(&event))
            .map(|s| s.handler.clone())
            .collect();

        for handler in &handlers {
            handler(&event);
        }

        handlers.len() + self.sender.send(event).unwrap_or(0)
    }

    /// Register a handler; it must not block
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        self.subscriptions.write().push(Subscription {
            id,
            filter,
            handler: Arc::new(handler),
        });
        tracing::debug!("Added {}", id);
        id
    }

    /// Remove a handler; false when `id` is unknown
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        let removed = subscriptions.len() != before;
        if removed {
            tracing::debug!("Removed {}", id);
        }
        removed
    }

    /// Receiver for async consumers
    pub fn receiver(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Registered handlers
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Bus settings
    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ActiveState, SenderStatus};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn idle() -> SessionEvent {
        SessionEvent::StateChanged {
            state: ActiveState::Idle,
            preliminary: false,
        }
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let bus = EventBus::new();
        let id = bus.subscribe(EventFilter::All, |_| {});
        assert_eq!(bus.subscriber_count(), 1);
        assert!(id.to_string().starts_with("sub-"));

        assert!(bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(), 0);
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn test_publish_without_listeners() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(idle()), 0);
    }

    #[test]
    fn test_category_filter() {
        let bus = EventBus::new();
        let machine = Arc::new(AtomicUsize::new(0));
        let sender = Arc::new(AtomicUsize::new(0));

        let m = machine.clone();
        bus.subscribe(EventFilter::Categories(vec![EventCategory::Machine]), move |_| {
            m.fetch_add(1, Ordering::SeqCst);
        });
        let s = sender.clone();
        bus.subscribe(EventFilter::Categories(vec![EventCategory::Sender]), move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.publish(idle()), 1);
        bus.publish(SessionEvent::SenderStatusChanged(SenderStatus::Loaded));
        bus.publish(SessionEvent::SenderStatusChanged(SenderStatus::Running));

        assert_eq!(machine.load(Ordering::SeqCst), 1);
        assert_eq!(sender.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let order = order.clone();
            bus.subscribe(EventFilter::All, move |_| order.lock().push(tag));
        }
        bus.publish(idle());
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_handler_may_change_subscriptions() {
        let bus = Arc::new(EventBus::new());
        let own_id = Arc::new(Mutex::new(None));

        let inner_bus = Arc::downgrade(&bus);
        let inner_id = own_id.clone();
        let id = bus.subscribe(EventFilter::All, move |_| {
            if let Some(bus) = inner_bus.upgrade() {
                bus.subscribe(EventFilter::All, |_| {});
                if let Some(id) = inner_id.lock().take() {
                    bus.unsubscribe(id);
                }
            }
        });
        *own_id.lock() = Some(id);

        assert_eq!(bus.publish(idle()), 1);
        // Removed itself and left the handler it added
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.publish(idle()), 1);
    }

    #[tokio::test]
    async fn test_async_receiver_sees_later_events() {
        let bus = EventBus::new();
        bus.publish(SessionEvent::Message("early".to_string()));
        let mut receiver = bus.receiver();
        bus.publish(SessionEvent::Message("Pgm End".to_string()));

        match receiver.try_recv() {
            Ok(SessionEvent::Message(msg)) => assert_eq!(msg, "Pgm End"),
            other => panic!("Wrong event received: {:?}", other),
        }
        assert!(receiver.try_recv().is_err());
    }
}
