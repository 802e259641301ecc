//! Event bus for fanning notifications out to collaborators
//!
//! Backed by a bounded `broadcast` channel: publishing never waits, a
//! subscriber that falls behind loses the oldest events and is told how
//! many it missed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::types::{Event, EventMessage};
use crate::domain::{StationId, TenantId};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventMessage>,
    subscriber_count: Arc<AtomicUsize>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            subscriber_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn publish(&self, event: Event) {
        let message = EventMessage::new(event);
        let event_type = message.event.event_type();
        let station_id = message.event.station_id().to_string();

        match self.sender.send(message) {
            Ok(count) => {
                debug!(event_type, station_id, subscribers = count, "Event published");
            }
            Err(_) => {
                debug!(event_type, station_id, "Event published (no subscribers)");
            }
        }
        metrics::counter!("chargegrid_events_published_total", "type" => event_type)
            .increment(1);
    }

    pub fn subscribe(&self) -> EventSubscriber {
        self.subscribe_filtered(EventFilter::default())
    }

    /// Subscriber that only sees events matching `filter`.
    pub fn subscribe_filtered(&self, filter: EventFilter) -> EventSubscriber {
        let receiver = self.sender.subscribe();
        let count = self.subscriber_count.fetch_add(1, Ordering::SeqCst) + 1;
        info!(total = count, ?filter, "New event subscriber");

        EventSubscriber {
            receiver,
            filter,
            subscriber_count: self.subscriber_count.clone(),
            missed: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Narrows a subscription to one tenant and/or one station.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub tenant_id: Option<TenantId>,
    pub station_id: Option<StationId>,
}

impl EventFilter {
    pub fn tenant(tenant_id: impl Into<TenantId>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            station_id: None,
        }
    }

    pub fn station(station_id: impl Into<StationId>) -> Self {
        Self {
            tenant_id: None,
            station_id: Some(station_id.into()),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.tenant_id.as_ref().map_or(true, |t| event.tenant_id() == t)
            && self.station_id.as_ref().map_or(true, |s| event.station_id() == s)
    }
}

pub struct EventSubscriber {
    receiver: broadcast::Receiver<EventMessage>,
    filter: EventFilter,
    subscriber_count: Arc<AtomicUsize>,
    missed: u64,
}

impl EventSubscriber {
    /// Next event, skipping over anything dropped while lagging.
    /// `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<EventMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) if self.filter.matches(&msg.event) => return Some(msg),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(missed = count, "Subscriber lagged");
                    self.missed += count;
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<EventMessage> {
        loop {
            match self.receiver.try_recv() {
                Ok(msg) if self.filter.matches(&msg.event) => return Some(msg),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    self.missed += count;
                    continue;
                }
                Err(_) => return None,
            }
        }
    }

    /// Events dropped because this subscriber fell behind.
    pub fn missed(&self) -> u64 {
        self.missed
    }
}

impl Drop for EventSubscriber {
    fn drop(&mut self) {
        let prev = self.subscriber_count.fetch_sub(1, Ordering::SeqCst);
        info!(remaining = prev.saturating_sub(1), "Event subscriber disconnected");
    }
}

pub type SharedEventBus = Arc<EventBus>;

pub fn create_event_bus(capacity: usize) -> SharedEventBus {
    Arc::new(EventBus::with_capacity(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::types::{StationStatusChangedEvent, Event};
    use crate::domain::DeviceStatus;
    use chrono::Utc;

    fn status_event(n: usize) -> Event {
        Event::StationStatusChanged(StationStatusChangedEvent {
            station_id: format!("ST-{n}").into(),
            tenant_id: "T1".into(),
            status: DeviceStatus::Available,
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(status_event(1));
        assert_eq!(a.recv().await.unwrap().event.station_id().as_str(), "ST-1");
        assert_eq!(b.recv().await.unwrap().event.station_id().as_str(), "ST-1");

        drop(b);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(status_event(1));
    }

    #[tokio::test]
    async fn filtered_subscriber_sees_its_station_only() {
        let bus = EventBus::new();
        let mut st2 = bus.subscribe_filtered(EventFilter::station("ST-2"));
        let mut other_tenant = bus.subscribe_filtered(EventFilter::tenant("T9"));

        for n in 1..=3 {
            bus.publish(status_event(n));
        }
        assert_eq!(st2.try_recv().unwrap().event.station_id().as_str(), "ST-2");
        assert!(st2.try_recv().is_none());
        assert!(other_tenant.try_recv().is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::with_capacity(4);
        let mut slow = bus.subscribe();

        for n in 0..10 {
            bus.publish(status_event(n));
        }

        let first = slow.recv().await.unwrap();
        assert_eq!(first.event.station_id().as_str(), "ST-6");
        assert_eq!(slow.missed(), 6);
    }
}
