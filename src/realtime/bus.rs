use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::booking::BookingStatus;
use crate::models::courier::{GeoPoint, VehicleClass};
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Channel {
    User(Uuid),
    Courier(Uuid),
    Booking(Uuid),
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::User(id) => write!(f, "user:{id}"),
            Channel::Courier(id) => write!(f, "courier:{id}"),
            Channel::Booking(id) => write!(f, "booking:{id}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    NewBooking {
        booking_id: Uuid,
        pickup: GeoPoint,
        dropoff: GeoPoint,
        vehicle_class: VehicleClass,
        estimated_price: f64,
    },
    BookingCancelled {
        booking_id: Uuid,
    },
    LocationUpdate {
        courier_id: Uuid,
        booking_id: Uuid,
        lat: f64,
        lng: f64,
        speed: Option<f64>,
        heading: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    BookingStatus {
        booking_id: Uuid,
        status: BookingStatus,
        courier_id: Option<Uuid>,
        updated_at: DateTime<Utc>,
    },
}

#[derive(Debug)]
pub struct Envelope {
    pub channel: Channel,
    pub event: ServerEvent,
}

/// Best-effort notification fan-out. Nothing is persisted or replayed; subscribers that lag
/// behind a channel's buffer lose the oldest events.
#[derive(Clone)]
pub struct EventBus {
    queue_tx: mpsc::Sender<Envelope>,
    channels: Arc<DashMap<Channel, broadcast::Sender<ServerEvent>>>,
    channel_capacity: usize,
    metrics: Metrics,
}

impl EventBus {
    pub fn new(
        queue_size: usize,
        channel_capacity: usize,
        metrics: Metrics,
    ) -> (Self, mpsc::Receiver<Envelope>) {
        let (queue_tx, queue_rx) = mpsc::channel(queue_size.max(1));

        (
            Self {
                queue_tx,
                channels: Arc::new(DashMap::new()),
                channel_capacity: channel_capacity.max(1),
                metrics,
            },
            queue_rx,
        )
    }

    /// Hands the event to the fan-out worker without waiting. Returns `false` when the event
    /// was dropped because the queue is full or the worker is gone.
    pub fn publish(&self, channel: Channel, event: ServerEvent) -> bool {
        match self.queue_tx.try_send(Envelope { channel, event }) {
            Ok(()) => {
                self.metrics.event_queue_depth.inc();
                self.metrics.events_published_total.inc();
                true
            }
            Err(err) => {
                self.metrics.events_dropped_total.inc();
                warn!(%channel, error = %err, "event dropped before fan-out");
                false
            }
        }
    }

    pub fn subscribe(&self, channel: Channel) -> broadcast::Receiver<ServerEvent> {
        self.channels
            .entry(channel)
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .subscribe()
    }

    /// Forgets the channel once its last receiver has been dropped.
    pub fn release(&self, channel: &Channel) -> bool {
        self.channels
            .remove_if(channel, |_, sender| sender.receiver_count() == 0)
            .is_some()
    }

    pub fn subscriber_count(&self, channel: &Channel) -> usize {
        self.channels
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn deliver(&self, envelope: Envelope) -> usize {
        let Some(sender) = self.channels.get(&envelope.channel) else {
            return 0;
        };
        sender.send(envelope.event).unwrap_or(0)
    }
}

pub async fn run_event_fanout(bus: EventBus, mut queue_rx: mpsc::Receiver<Envelope>) {
    info!("event fan-out started");

    while let Some(envelope) = queue_rx.recv().await {
        bus.metrics.event_queue_depth.dec();

        let channel = envelope.channel;
        let delivered = bus.deliver(envelope);
        debug!(%channel, delivered, "event fanned out");
    }

    warn!("event fan-out stopped: queue channel closed");
}
