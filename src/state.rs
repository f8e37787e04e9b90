use std::sync::Arc;

use chrono::{Duration, FixedOffset, Offset, Utc};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::Config;
use crate::engine::pricing::SurgePricing;
use crate::observability::metrics::Metrics;
use crate::realtime::bus::{Envelope, EventBus};
use crate::realtime::location::LocationCache;
use crate::store::Store;

pub struct AppState {
    pub config: Config,
    pub store: Arc<Store>,
    pub locations: LocationCache,
    pub pricing: SurgePricing,
    pub bus: EventBus,
    pub metrics: Metrics,
}

impl AppState {
    /// Wires the store, caches and event bus together. The returned receiver feeds
    /// [`run_event_fanout`](crate::realtime::bus::run_event_fanout).
    pub fn new(config: Config) -> (Self, mpsc::Receiver<Envelope>) {
        let metrics = Metrics::new();
        let store = Arc::new(Store::new());
        let (bus, queue_rx) = EventBus::new(
            config.event_queue_size,
            config.event_buffer_size,
            metrics.clone(),
        );

        let locations = LocationCache::new(
            store.clone(),
            bus.clone(),
            Duration::seconds(config.location_cache_ttl_secs),
        );

        let offset = FixedOffset::east_opt(config.surge_utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix());
        let pricing = SurgePricing::new(
            Duration::seconds(config.surge_cache_ttl_secs),
            config.surge_jitter_max,
            offset,
        );

        (
            Self {
                config,
                store,
                locations,
                pricing,
                bus,
                metrics,
            },
            queue_rx,
        )
    }

    /// Flushes the caches on shutdown.
    pub fn close(&self) {
        self.locations.clear();
        self.pricing.clear();
        info!("caches flushed");
    }
}
