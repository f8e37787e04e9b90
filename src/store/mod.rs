//! In-process document store.
//!
//! Stands in for the external document database: point-radius nearest queries over couriers,
//! conditional updates that touch a courier and a booking together, and paged scans for the
//! scheduled sweeps. Every operation that writes both a courier and a booking locks the courier
//! entry first and the booking entry second.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::haversine_m;
use crate::models::booking::{Booking, BookingStatus};
use crate::models::courier::{Courier, GeoPoint, VehicleClass};
use crate::models::location::LocationPing;

#[derive(Default)]
pub struct Store {
    bookings: DashMap<Uuid, Booking>,
    couriers: DashMap<Uuid, Courier>,
    // Per courier, ordered by ping timestamp.
    locations: DashMap<Uuid, Vec<LocationPing>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    pub fn courier_count(&self) -> usize {
        self.couriers.len()
    }

    pub fn location_count(&self) -> usize {
        self.locations.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn insert_courier(&self, courier: Courier) -> Result<Courier, AppError> {
        match self.couriers.entry(courier.id) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "courier {} already registered",
                courier.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(courier.clone());
                Ok(courier)
            }
        }
    }

    pub fn courier(&self, id: Uuid) -> Option<Courier> {
        self.couriers.get(&id).map(|entry| entry.value().clone())
    }

    pub fn couriers(&self) -> Vec<Courier> {
        let mut couriers: Vec<Courier> = self
            .couriers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        couriers.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        couriers
    }

    /// Stable page of courier ids for sweeps that walk the whole fleet.
    pub fn courier_ids_page(&self, offset: usize, limit: usize) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.couriers.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids.into_iter().skip(offset).take(limit).collect()
    }

    /// Couriers of `class` that are available and within `radius_m` of `point`, nearest first.
    pub fn find_available_couriers(
        &self,
        class: VehicleClass,
        point: &GeoPoint,
        radius_m: f64,
        limit: usize,
    ) -> Vec<Courier> {
        let mut nearby: Vec<(f64, Courier)> = self
            .couriers
            .iter()
            .filter_map(|entry| {
                let courier = entry.value();
                if !courier.is_available || courier.vehicle_class != class {
                    return None;
                }
                let location = courier.location?;
                let distance = haversine_m(&location, point);
                (distance <= radius_m).then(|| (distance, courier.clone()))
            })
            .collect();

        nearby.sort_by(|a, b| a.0.total_cmp(&b.0));
        nearby
            .into_iter()
            .take(limit)
            .map(|(_, courier)| courier)
            .collect()
    }

    pub fn set_courier_availability(
        &self,
        id: Uuid,
        available: bool,
        now: DateTime<Utc>,
    ) -> Result<Courier, AppError> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;

        if available {
            let bound = self.bookings.iter().find(|entry| {
                let booking = entry.value();
                booking.courier_id == Some(id) && !booking.status.is_terminal()
            });
            if let Some(entry) = bound {
                return Err(AppError::Conflict(format!(
                    "courier {id} is bound to booking {}",
                    entry.key()
                )));
            }
        }

        courier.is_available = available;
        courier.updated_at = now;
        Ok(courier.clone())
    }

    /// Moves the courier's stored position unless a newer fix is already recorded.
    pub fn move_courier(
        &self,
        id: Uuid,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;

        if courier.location_updated_at.is_some_and(|seen| seen > at) {
            return Ok(false);
        }

        courier.location = Some(point);
        courier.location_updated_at = Some(at);
        Ok(true)
    }

    pub fn update_courier_stats(
        &self,
        id: Uuid,
        rating: Option<f64>,
        total_trips: u32,
        cancelled_trips: u32,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut courier = self
            .couriers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;

        if let Some(rating) = rating {
            courier.rating = rating;
        }
        courier.total_trips = total_trips;
        courier.cancelled_trips = cancelled_trips;
        courier.updated_at = now;
        Ok(())
    }

    pub fn insert_booking(&self, booking: Booking) {
        self.bookings.insert(booking.id, booking);
    }

    pub fn booking(&self, id: Uuid) -> Option<Booking> {
        self.bookings.get(&id).map(|entry| entry.value().clone())
    }

    /// Newest-first page (1-based) of bookings matching `filter`, with the total match count.
    pub fn bookings_page<F>(&self, filter: F, page: usize, limit: usize) -> (Vec<Booking>, usize)
    where
        F: Fn(&Booking) -> bool,
    {
        let mut matching: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let total = matching.len();
        let skip = page.saturating_sub(1).saturating_mul(limit);
        let page = matching.into_iter().skip(skip).take(limit).collect();
        (page, total)
    }

    pub fn bookings_for_courier(&self, courier_id: Uuid) -> Vec<Booking> {
        self.bookings
            .iter()
            .filter(|entry| entry.value().courier_id == Some(courier_id))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn stale_pending_ids(&self, created_before: DateTime<Utc>, limit: usize) -> Vec<Uuid> {
        self.bookings
            .iter()
            .filter(|entry| {
                let booking = entry.value();
                booking.status == BookingStatus::Pending && booking.created_at < created_before
            })
            .take(limit)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Binds `courier_id` to `booking_id` only if the courier is still available and the
    /// booking is still pending. Both records change under their entry locks or neither does.
    pub fn assign_courier(
        &self,
        booking_id: Uuid,
        courier_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Booking, AppError> {
        let mut courier = self
            .couriers
            .get_mut(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;
        if !courier.is_available {
            return Err(AppError::NoAvailableCouriers);
        }

        let mut booking = self
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| AppError::NotFound(format!("booking {booking_id} not found")))?;
        if booking.status != BookingStatus::Pending {
            return Err(AppError::Conflict(format!(
                "booking {booking_id} is {}, not pending",
                booking.status.as_str()
            )));
        }

        courier.is_available = false;
        courier.updated_at = now;

        booking.status = BookingStatus::Accepted;
        booking.courier_id = Some(courier_id);
        booking.updated_at = now;

        Ok(booking.clone())
    }

    /// Applies `apply` to the booking and its bound courier (if any) as one unit.
    ///
    /// `apply` works on copies; nothing is written back when it returns an error.
    pub fn update_booking<F>(&self, booking_id: Uuid, apply: F) -> Result<Booking, AppError>
    where
        F: FnOnce(&mut Booking, Option<&mut Courier>) -> Result<(), AppError>,
    {
        let not_found = || AppError::NotFound(format!("booking {booking_id} not found"));

        let (mut courier, mut booking) = loop {
            let bound = self
                .bookings
                .get(&booking_id)
                .map(|entry| entry.courier_id)
                .ok_or_else(not_found)?;
            let courier = bound.and_then(|id| self.couriers.get_mut(&id));
            let booking = self.bookings.get_mut(&booking_id).ok_or_else(not_found)?;

            // An assignment may land between the peek and the locks.
            if booking.courier_id == bound {
                break (courier, booking);
            }
        };

        let mut next_booking = booking.value().clone();
        let mut next_courier = courier.as_ref().map(|entry| entry.value().clone());
        apply(&mut next_booking, next_courier.as_mut())?;

        *booking.value_mut() = next_booking.clone();
        if let (Some(entry), Some(updated)) = (courier.as_mut(), next_courier) {
            *entry.value_mut() = updated;
        }

        Ok(next_booking)
    }

    pub fn record_location(&self, ping: LocationPing) {
        let mut history = self.locations.entry(ping.courier_id).or_default();
        let at = history.partition_point(|seen| seen.timestamp <= ping.timestamp);
        history.insert(at, ping);
    }

    pub fn latest_location(&self, courier_id: Uuid) -> Option<LocationPing> {
        self.locations
            .get(&courier_id)
            .and_then(|history| history.last().cloned())
    }

    pub fn locations_for_booking(&self, booking_id: Uuid) -> Vec<LocationPing> {
        let mut pings: Vec<LocationPing> = self
            .locations
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|ping| ping.booking_id == Some(booking_id))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        pings.sort_by_key(|ping| ping.timestamp);
        pings
    }

    pub fn location_courier_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.locations.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    /// Drops pings recorded before `cutoff` for the given couriers; returns how many went.
    pub fn purge_locations_before(&self, courier_ids: &[Uuid], cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for id in courier_ids {
            if let Some(mut history) = self.locations.get_mut(id) {
                let before = history.len();
                history.retain(|ping| ping.timestamp >= cutoff);
                removed += before - history.len();
            }
            self.locations.remove_if(id, |_, history| history.is_empty());
        }
        removed
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::Store;
    use crate::error::AppError;
    use crate::models::booking::{Booking, BookingStatus};
    use crate::models::courier::{Courier, GeoPoint, VehicleClass};
    use crate::models::location::LocationPing;

    pub(crate) fn courier(id_seed: u128, lat: f64, lng: f64, class: VehicleClass) -> Courier {
        Courier {
            id: Uuid::from_u128(id_seed),
            name: format!("courier-{id_seed}"),
            vehicle_class: class,
            location: Some(GeoPoint { lat, lng }),
            location_updated_at: Some(Utc::now()),
            is_available: true,
            rating: 4.0,
            total_trips: 0,
            cancelled_trips: 0,
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn booking(requester: Uuid, class: VehicleClass) -> Booking {
        let now = Utc::now();
        Booking {
            id: Uuid::new_v4(),
            requester_id: requester,
            courier_id: None,
            pickup: GeoPoint {
                lat: 52.52,
                lng: 13.405,
            },
            dropoff: GeoPoint {
                lat: 52.53,
                lng: 13.42,
            },
            vehicle_class: class,
            status: BookingStatus::Pending,
            quoted_price: 9.5,
            final_price: None,
            distance_m: 1_400.0,
            scheduled_time: None,
            goods_description: None,
            goods_weight: None,
            picked_up_at: None,
            delivered_at: None,
            rating: None,
            review: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn nearest_query_filters_and_orders() {
        let store = Store::new();
        let pickup = GeoPoint {
            lat: 52.52,
            lng: 13.405,
        };

        store
            .insert_courier(courier(1, 52.53, 13.405, VehicleClass::Car))
            .unwrap();
        store
            .insert_courier(courier(2, 52.521, 13.405, VehicleClass::Car))
            .unwrap();
        store
            .insert_courier(courier(3, 52.5201, 13.405, VehicleClass::Van))
            .unwrap();
        store
            .insert_courier(courier(4, 53.52, 13.405, VehicleClass::Car))
            .unwrap();
        let mut offline = courier(5, 52.5202, 13.405, VehicleClass::Car);
        offline.is_available = false;
        store.insert_courier(offline).unwrap();

        let found = store.find_available_couriers(VehicleClass::Car, &pickup, 10_000.0, 10);
        let ids: Vec<u128> = found.iter().map(|c| c.id.as_u128()).collect();
        assert_eq!(ids, vec![2, 1]);

        let capped = store.find_available_couriers(VehicleClass::Car, &pickup, 10_000.0, 1);
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn duplicate_courier_registration_conflicts() {
        let store = Store::new();
        store
            .insert_courier(courier(1, 0.0, 0.0, VehicleClass::Bike))
            .unwrap();
        let again = store.insert_courier(courier(1, 0.0, 0.0, VehicleClass::Bike));
        assert!(matches!(again, Err(AppError::Conflict(_))));
    }

    #[test]
    fn only_one_racing_assignment_wins() {
        let store = Arc::new(Store::new());
        let courier = courier(7, 52.52, 13.405, VehicleClass::Car);
        let courier_id = courier.id;
        store.insert_courier(courier).unwrap();

        let bookings: Vec<Uuid> = (0..8)
            .map(|_| {
                let b = booking(Uuid::new_v4(), VehicleClass::Car);
                let id = b.id;
                store.insert_booking(b);
                id
            })
            .collect();

        let barrier = Arc::new(Barrier::new(bookings.len()));
        let handles: Vec<_> = bookings
            .iter()
            .map(|&booking_id| {
                let store = store.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    store.assign_courier(booking_id, courier_id, Utc::now()).is_ok()
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);

        let accepted: Vec<Booking> = bookings
            .iter()
            .filter_map(|id| store.booking(*id))
            .filter(|b| b.status == BookingStatus::Accepted)
            .collect();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].courier_id, Some(courier_id));
        assert!(!store.courier(courier_id).unwrap().is_available);
    }

    #[test]
    fn failed_update_leaves_both_records_untouched() {
        let store = Store::new();
        let courier = courier(1, 52.52, 13.405, VehicleClass::Car);
        let courier_id = courier.id;
        store.insert_courier(courier).unwrap();
        let b = booking(Uuid::new_v4(), VehicleClass::Car);
        let booking_id = b.id;
        store.insert_booking(b);
        store
            .assign_courier(booking_id, courier_id, Utc::now())
            .unwrap();

        let result = store.update_booking(booking_id, |booking, courier| {
            booking.status = BookingStatus::Cancelled;
            if let Some(courier) = courier {
                courier.is_available = true;
            }
            Err(AppError::Conflict("rejected".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(
            store.booking(booking_id).unwrap().status,
            BookingStatus::Accepted
        );
        assert!(!store.courier(courier_id).unwrap().is_available);
    }

    #[test]
    fn availability_cannot_be_restored_while_bound() {
        let store = Store::new();
        let courier = courier(1, 52.52, 13.405, VehicleClass::Car);
        let courier_id = courier.id;
        store.insert_courier(courier).unwrap();
        let b = booking(Uuid::new_v4(), VehicleClass::Car);
        let booking_id = b.id;
        store.insert_booking(b);
        store
            .assign_courier(booking_id, courier_id, Utc::now())
            .unwrap();

        let result = store.set_courier_availability(courier_id, true, Utc::now());
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let offline = store
            .set_courier_availability(courier_id, false, Utc::now())
            .unwrap();
        assert!(!offline.is_available);
    }

    #[test]
    fn older_position_does_not_overwrite_newer() {
        let store = Store::new();
        let courier = courier(1, 52.52, 13.405, VehicleClass::Car);
        let id = courier.id;
        let seen = courier.location_updated_at.unwrap();
        store.insert_courier(courier).unwrap();

        let stale = store
            .move_courier(id, GeoPoint { lat: 1.0, lng: 1.0 }, seen - Duration::seconds(5))
            .unwrap();
        assert!(!stale);
        assert_eq!(store.courier(id).unwrap().location.unwrap().lat, 52.52);

        let fresh = store
            .move_courier(id, GeoPoint { lat: 2.0, lng: 2.0 }, seen + Duration::seconds(5))
            .unwrap();
        assert!(fresh);
        assert_eq!(store.courier(id).unwrap().location.unwrap().lat, 2.0);
    }

    #[test]
    fn location_history_is_time_ordered_and_purgeable() {
        let store = Store::new();
        let courier_id = Uuid::new_v4();
        let booking_id = Uuid::new_v4();
        let now = Utc::now();

        for minutes_ago in [1, 40 * 24 * 60, 5] {
            store.record_location(LocationPing {
                courier_id,
                point: GeoPoint {
                    lat: 0.0,
                    lng: minutes_ago as f64 / 1_000_000.0,
                },
                booking_id: Some(booking_id),
                speed: None,
                heading: None,
                accuracy: None,
                timestamp: now - Duration::minutes(minutes_ago),
            });
        }

        let history = store.locations_for_booking(booking_id);
        assert_eq!(history.len(), 3);
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(
            store.latest_location(courier_id).unwrap().timestamp,
            now - Duration::minutes(1)
        );

        let removed =
            store.purge_locations_before(&store.location_courier_ids(), now - Duration::days(30));
        assert_eq!(removed, 1);
        assert_eq!(store.location_count(), 2);
    }

    #[test]
    fn bookings_page_is_newest_first() {
        let store = Store::new();
        let requester = Uuid::new_v4();
        let now = Utc::now();
        for age in 0..5 {
            let mut b = booking(requester, VehicleClass::Bike);
            b.created_at = now - Duration::minutes(age);
            store.insert_booking(b);
        }
        store.insert_booking(booking(Uuid::new_v4(), VehicleClass::Bike));

        let (first, total) = store.bookings_page(|b| b.requester_id == requester, 1, 2);
        assert_eq!(total, 5);
        assert_eq!(first.len(), 2);
        assert!(first[0].created_at > first[1].created_at);

        let (last, _) = store.bookings_page(|b| b.requester_id == requester, 3, 2);
        assert_eq!(last.len(), 1);
    }
}
