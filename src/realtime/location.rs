use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::location::{LocationFix, LocationPing, LocationSource};
use crate::realtime::bus::{Channel, EventBus, ServerEvent};
use crate::store::Store;

#[derive(Debug, Clone)]
struct CachedLocation {
    ping: LocationPing,
    expires_at: DateTime<Utc>,
}

/// Freshness-bounded view of where each courier was last seen, backed by the durable ping log.
pub struct LocationCache {
    entries: DashMap<Uuid, CachedLocation>,
    store: Arc<Store>,
    bus: EventBus,
    ttl: Duration,
}

impl LocationCache {
    pub fn new(store: Arc<Store>, bus: EventBus, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            store,
            bus,
            ttl,
        }
    }

    /// Records the ping durably, refreshes the cache and the courier's stored position, and
    /// republishes it on the booking channel when tagged with a booking.
    ///
    /// A ping older than what is already cached never replaces it.
    pub fn update(&self, ping: LocationPing, now: DateTime<Utc>) -> Result<(), AppError> {
        self.store.move_courier(ping.courier_id, ping.point, ping.timestamp)?;
        self.store.record_location(ping.clone());

        {
            let mut entry = self
                .entries
                .entry(ping.courier_id)
                .or_insert_with(|| CachedLocation {
                    ping: ping.clone(),
                    expires_at: now + self.ttl,
                });
            if entry.ping.timestamp <= ping.timestamp {
                *entry = CachedLocation {
                    ping: ping.clone(),
                    expires_at: now + self.ttl,
                };
            } else {
                debug!(courier_id = %ping.courier_id, "stale ping kept out of cache");
            }
        }

        if let Some(booking_id) = ping.booking_id {
            self.bus.publish(
                Channel::Booking(booking_id),
                ServerEvent::LocationUpdate {
                    courier_id: ping.courier_id,
                    booking_id,
                    lat: ping.point.lat,
                    lng: ping.point.lng,
                    speed: ping.speed,
                    heading: ping.heading,
                    timestamp: ping.timestamp,
                },
            );
        }

        Ok(())
    }

    pub fn get(
        &self,
        courier_id: Uuid,
        now: DateTime<Utc>,
    ) -> Option<(LocationFix, LocationSource)> {
        if let Some(cached) = self.entries.get(&courier_id) {
            if cached.expires_at > now {
                return Some((LocationFix::from(&cached.ping), LocationSource::Cache));
            }
        }

        self.store
            .latest_location(courier_id)
            .map(|ping| (LocationFix::from(&ping), LocationSource::Durable))
    }

    pub fn history_for_booking(&self, booking_id: Uuid) -> Vec<LocationPing> {
        self.store.locations_for_booking(booking_id)
    }

    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, cached| cached.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use chrono::{DateTime, Duration, Utc};
    use tokio::time::timeout;
    use uuid::Uuid;

    use super::LocationCache;
    use crate::error::AppError;
    use crate::models::courier::{GeoPoint, VehicleClass};
    use crate::models::location::{LocationPing, LocationSource};
    use crate::observability::metrics::Metrics;
    use crate::realtime::bus::{run_event_fanout, Channel, EventBus, ServerEvent};
    use crate::store::tests::courier;
    use crate::store::Store;

    fn ping(
        courier_id: Uuid,
        lat: f64,
        booking_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> LocationPing {
        LocationPing {
            courier_id,
            point: GeoPoint { lat, lng: 13.4 },
            booking_id,
            speed: Some(8.0),
            heading: Some(90.0),
            accuracy: Some(5.0),
            timestamp: at,
        }
    }

    fn setup() -> (LocationCache, Arc<Store>, EventBus, Uuid) {
        let store = Arc::new(Store::new());
        let courier = courier(1, 52.0, 13.4, VehicleClass::Bike);
        let courier_id = courier.id;
        store.insert_courier(courier).unwrap();
        let (bus, queue_rx) = EventBus::new(16, 16, Metrics::new());
        tokio::spawn(run_event_fanout(bus.clone(), queue_rx));
        let cache = LocationCache::new(store.clone(), bus.clone(), Duration::seconds(60));
        (cache, store, bus, courier_id)
    }

    #[tokio::test]
    async fn fresh_entry_is_served_from_cache_then_falls_back_to_durable() {
        let (cache, _store, _bus, courier_id) = setup();
        let now = Utc::now();

        cache.update(ping(courier_id, 52.1, None, now), now).unwrap();
        let (fix, source) = cache.get(courier_id, now + Duration::seconds(30)).unwrap();
        assert_eq!(source, LocationSource::Cache);
        assert_eq!(fix.lat, 52.1);

        let (fix, source) = cache.get(courier_id, now + Duration::seconds(61)).unwrap();
        assert_eq!(source, LocationSource::Durable);
        assert_eq!(fix.lat, 52.1);
    }

    #[tokio::test]
    async fn older_ping_is_logged_but_not_cached() {
        let (cache, store, _bus, courier_id) = setup();
        let now = Utc::now();

        cache.update(ping(courier_id, 52.2, None, now), now).unwrap();
        cache
            .update(ping(courier_id, 52.0, None, now - Duration::seconds(10)), now)
            .unwrap();

        let (fix, _) = cache.get(courier_id, now).unwrap();
        assert_eq!(fix.lat, 52.2);
        assert_eq!(store.courier(courier_id).unwrap().location.unwrap().lat, 52.2);
        assert_eq!(store.location_count(), 2);
    }

    #[tokio::test]
    async fn tagged_ping_is_republished_on_the_booking_channel() {
        let (cache, _store, bus, courier_id) = setup();
        let booking_id = Uuid::new_v4();
        let mut rx = bus.subscribe(Channel::Booking(booking_id));
        let now = Utc::now();

        cache
            .update(ping(courier_id, 52.3, Some(booking_id), now), now)
            .unwrap();

        let event = timeout(StdDuration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ServerEvent::LocationUpdate {
                courier_id: from,
                lat,
                ..
            } => {
                assert_eq!(from, courier_id);
                assert_eq!(lat, 52.3);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_courier_is_rejected_without_side_effects() {
        let (cache, store, _bus, _courier_id) = setup();
        let stranger = Uuid::new_v4();
        let now = Utc::now();

        let result = cache.update(ping(stranger, 1.0, None, now), now);
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(cache.get(stranger, now).is_none());
        assert_eq!(store.location_count(), 0);
    }

    #[tokio::test]
    async fn evicts_only_expired_entries() {
        let (cache, _store, _bus, courier_id) = setup();
        let now = Utc::now();
        cache.update(ping(courier_id, 52.1, None, now), now).unwrap();

        assert_eq!(cache.evict_expired(now + Duration::seconds(10)), 0);
        assert_eq!(cache.evict_expired(now + Duration::seconds(60)), 1);
        assert!(cache.is_empty());
    }
}
