//! Periodic maintenance: booking expiry, location retention and courier rating recompute.
//!
//! Each task is a plain function of the state and the current time; [`spawn_scheduler`] runs
//! them on independent timers so one failing task never stalls the others.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::engine::booking::publish_status;
use crate::error::AppError;
use crate::models::booking::BookingStatus;
use crate::state::AppState;

pub const EXPIRE_BOOKINGS: &str = "expire_bookings";
pub const PURGE_LOCATIONS: &str = "purge_locations";
pub const RECOMPUTE_RATINGS: &str = "recompute_ratings";

type Task = fn(&AppState, DateTime<Utc>) -> Result<usize, AppError>;

/// Expires bookings that stayed pending past the booking timeout. Returns how many expired.
pub fn expire_stale_bookings(state: &AppState, now: DateTime<Utc>) -> Result<usize, AppError> {
    let cutoff = now - Duration::seconds(state.config.booking_timeout_secs);
    let mut expired = 0;

    loop {
        let ids = state
            .store
            .stale_pending_ids(cutoff, state.config.sweep_page_size);
        if ids.is_empty() {
            break;
        }

        let mut progressed = false;
        for id in ids {
            let result = state.store.update_booking(id, |booking, _| {
                if booking.status != BookingStatus::Pending || booking.created_at >= cutoff {
                    return Err(AppError::Conflict(format!(
                        "booking is {}",
                        booking.status.as_str()
                    )));
                }
                booking.status = BookingStatus::Expired;
                booking.updated_at = now;
                Ok(())
            });

            match result {
                Ok(booking) => {
                    progressed = true;
                    expired += 1;
                    state.metrics.bookings_expired_total.inc();
                    info!(booking_id = %booking.id, "pending booking expired");
                    publish_status(state, &booking);
                }
                Err(AppError::Conflict(reason)) => {
                    progressed = true;
                    debug!(booking_id = %id, %reason, "booking left pending before expiry");
                }
                Err(err) => return Err(err),
            }
        }

        if !progressed {
            break;
        }
    }

    Ok(expired)
}

/// Drops location pings older than the retention window and evicts expired cache entries.
pub fn purge_stale_locations(state: &AppState, now: DateTime<Utc>) -> Result<usize, AppError> {
    let cutoff = now - Duration::days(state.config.location_retention_days);
    let courier_ids = state.store.location_courier_ids();

    let removed: usize = courier_ids
        .chunks(state.config.sweep_page_size)
        .map(|page| state.store.purge_locations_before(page, cutoff))
        .sum();

    let evicted_locations = state.locations.evict_expired(now);
    let evicted_surges = state.pricing.evict_expired(now);
    debug!(evicted_locations, evicted_surges, "caches swept");

    Ok(removed)
}

/// Recomputes each courier's rating as the mean of the ratings on bookings delivered within the
/// rating window, rounded to one decimal, along with the trip counters (delivered plus cancelled
/// for the total). Couriers without a rated
/// delivery in the window keep their rating. Returns how many ratings were rewritten.
pub fn recompute_courier_ratings(
    state: &AppState,
    now: DateTime<Utc>,
) -> Result<usize, AppError> {
    let window_start = now - Duration::days(state.config.rating_window_days);
    let page_size = state.config.sweep_page_size;
    let mut offset = 0;
    let mut rerated = 0;

    loop {
        let ids = state.store.courier_ids_page(offset, page_size);
        if ids.is_empty() {
            break;
        }
        offset += ids.len();

        for courier_id in ids {
            let bookings = state.store.bookings_for_courier(courier_id);

            let delivered = bookings
                .iter()
                .filter(|booking| booking.status == BookingStatus::Delivered)
                .count();
            let cancelled = bookings
                .iter()
                .filter(|booking| booking.status == BookingStatus::Cancelled)
                .count();

            let recent: Vec<f64> = bookings
                .iter()
                .filter(|booking| booking.status == BookingStatus::Delivered)
                .filter(|booking| {
                    booking.delivered_at.unwrap_or(booking.updated_at) >= window_start
                })
                .filter_map(|booking| booking.rating.map(f64::from))
                .collect();
            let rating = (!recent.is_empty())
                .then(|| round_one_decimal(recent.iter().sum::<f64>() / recent.len() as f64));

            // Cancelled trips count towards the total so the completion rate stays in [0, 1].
            state.store.update_courier_stats(
                courier_id,
                rating,
                u32::try_from(delivered + cancelled).unwrap_or(u32::MAX),
                u32::try_from(cancelled).unwrap_or(u32::MAX),
                now,
            )?;

            if let Some(rating) = rating {
                rerated += 1;
                debug!(courier_id = %courier_id, rating, trips = recent.len(), "courier rerated");
            }
        }
    }

    Ok(rerated)
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn spawn_scheduler(state: Arc<AppState>) -> Vec<JoinHandle<()>> {
    let config = &state.config;
    let tasks: [(&'static str, u64, Task); 3] = [
        (
            EXPIRE_BOOKINGS,
            config.expiry_sweep_interval_secs,
            expire_stale_bookings,
        ),
        (
            PURGE_LOCATIONS,
            config.location_purge_interval_secs,
            purge_stale_locations,
        ),
        (
            RECOMPUTE_RATINGS,
            config.rating_recompute_interval_secs,
            recompute_courier_ratings,
        ),
    ];

    tasks
        .into_iter()
        .map(|(name, every_secs, task)| {
            spawn_task(state.clone(), name, StdDuration::from_secs(every_secs), task)
        })
        .collect()
}

fn spawn_task(
    state: Arc<AppState>,
    name: &'static str,
    period: StdDuration,
    task: Task,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(task = name, period_secs = period.as_secs(), "scheduled task started");

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; runs start one period after boot.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match task(state.as_ref(), Utc::now()) {
                Ok(affected) => {
                    state
                        .metrics
                        .scheduler_runs_total
                        .with_label_values(&[name, "success"])
                        .inc();
                    info!(task = name, affected, "scheduled task finished");
                }
                Err(err) => {
                    state
                        .metrics
                        .scheduler_runs_total
                        .with_label_values(&[name, "error"])
                        .inc();
                    error!(task = name, error = %err, "scheduled task failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{expire_stale_bookings, purge_stale_locations, recompute_courier_ratings};
    use crate::config::Config;
    use crate::models::booking::BookingStatus;
    use crate::models::courier::{GeoPoint, VehicleClass};
    use crate::models::location::LocationPing;
    use crate::state::AppState;
    use crate::store::tests::{booking, courier};

    fn state() -> AppState {
        let config = Config {
            sweep_page_size: 2,
            ..Config::default()
        };
        AppState::new(config).0
    }

    #[test]
    fn expires_only_pending_bookings_past_the_timeout() {
        let state = state();
        let now = Utc::now();
        let mut stale_ids = Vec::new();

        for _ in 0..5 {
            let mut stale = booking(Uuid::new_v4(), VehicleClass::Car);
            stale.created_at = now - Duration::minutes(11);
            stale_ids.push(stale.id);
            state.store.insert_booking(stale);
        }
        let mut young = booking(Uuid::new_v4(), VehicleClass::Car);
        young.created_at = now - Duration::minutes(9);
        let young_id = young.id;
        state.store.insert_booking(young);

        let mut accepted = booking(Uuid::new_v4(), VehicleClass::Car);
        accepted.created_at = now - Duration::minutes(30);
        accepted.status = BookingStatus::Accepted;
        let accepted_id = accepted.id;
        state.store.insert_booking(accepted);

        assert_eq!(expire_stale_bookings(&state, now).unwrap(), 5);
        for id in &stale_ids {
            assert_eq!(state.store.booking(*id).unwrap().status, BookingStatus::Expired);
        }
        assert_eq!(
            state.store.booking(young_id).unwrap().status,
            BookingStatus::Pending
        );
        assert_eq!(
            state.store.booking(accepted_id).unwrap().status,
            BookingStatus::Accepted
        );
        assert_eq!(state.metrics.bookings_expired_total.get(), 5);

        // Expired stays expired on the next sweep.
        assert_eq!(expire_stale_bookings(&state, now + Duration::seconds(30)).unwrap(), 0);
        assert_eq!(
            state.store.booking(stale_ids[0]).unwrap().status,
            BookingStatus::Expired
        );
    }

    #[test]
    fn purges_pings_past_retention_across_pages() {
        let state = state();
        let now = Utc::now();

        for seed in 0..3u128 {
            let courier_id = Uuid::from_u128(seed + 1);
            for days_ago in [1, 31] {
                state.store.record_location(LocationPing {
                    courier_id,
                    point: GeoPoint { lat: 1.0, lng: 1.0 },
                    booking_id: None,
                    speed: None,
                    heading: None,
                    accuracy: None,
                    timestamp: now - Duration::days(days_ago),
                });
            }
        }

        assert_eq!(purge_stale_locations(&state, now).unwrap(), 3);
        assert_eq!(state.store.location_count(), 3);
    }

    #[test]
    fn rating_is_the_rounded_mean_of_recent_rated_deliveries() {
        let state = state();
        let now = Utc::now();
        let rated = courier(1, 0.0, 0.0, VehicleClass::Van);
        let untouched = courier(2, 0.0, 0.0, VehicleClass::Van);
        let (rated_id, untouched_id) = (rated.id, untouched.id);
        state.store.insert_courier(rated).unwrap();
        state.store.insert_courier(untouched).unwrap();

        let deliver = |courier_id: Uuid, rating: Option<u8>, days_ago: i64| {
            let mut done = booking(Uuid::new_v4(), VehicleClass::Van);
            done.courier_id = Some(courier_id);
            done.status = BookingStatus::Delivered;
            done.rating = rating;
            done.delivered_at = Some(now - Duration::days(days_ago));
            state.store.insert_booking(done);
        };
        deliver(rated_id, Some(5), 1);
        deliver(rated_id, Some(4), 2);
        deliver(rated_id, Some(4), 3);
        deliver(rated_id, None, 3);
        deliver(rated_id, Some(1), 45);

        let mut cancelled = booking(Uuid::new_v4(), VehicleClass::Van);
        cancelled.courier_id = Some(rated_id);
        cancelled.status = BookingStatus::Cancelled;
        state.store.insert_booking(cancelled);

        assert_eq!(recompute_courier_ratings(&state, now).unwrap(), 1);

        let rated = state.store.courier(rated_id).unwrap();
        assert_eq!(rated.rating, 4.3);
        assert_eq!(rated.total_trips, 6);
        assert_eq!(rated.cancelled_trips, 1);

        let untouched = state.store.courier(untouched_id).unwrap();
        assert_eq!(untouched.rating, 4.0);
        assert_eq!(untouched.total_trips, 0);
    }

    #[test]
    fn cancelled_trips_count_towards_the_completion_rate() {
        let state = state();
        let now = Utc::now();
        let rider = courier(1, 0.0, 0.0, VehicleClass::Bike);
        let rider_id = rider.id;
        state.store.insert_courier(rider).unwrap();

        let mut delivered = booking(Uuid::new_v4(), VehicleClass::Bike);
        delivered.courier_id = Some(rider_id);
        delivered.status = BookingStatus::Delivered;
        delivered.rating = Some(5);
        delivered.delivered_at = Some(now - Duration::hours(1));
        state.store.insert_booking(delivered);

        let mut cancelled = booking(Uuid::new_v4(), VehicleClass::Bike);
        cancelled.courier_id = Some(rider_id);
        cancelled.status = BookingStatus::Cancelled;
        state.store.insert_booking(cancelled);

        recompute_courier_ratings(&state, now).unwrap();

        let rider = state.store.courier(rider_id).unwrap();
        assert_eq!(rider.total_trips, 2);
        assert_eq!(rider.cancelled_trips, 1);
        assert_eq!(rider.completion_rate(), 0.5);
    }

    #[test]
    fn expiry_requires_strictly_more_than_the_timeout() {
        let state = state();
        let now = Utc::now();
        let timeout = Duration::seconds(state.config.booking_timeout_secs);

        let mut at_limit = booking(Uuid::new_v4(), VehicleClass::Car);
        at_limit.created_at = now - timeout;
        let at_limit_id = at_limit.id;
        state.store.insert_booking(at_limit);

        assert_eq!(expire_stale_bookings(&state, now).unwrap(), 0);
        assert_eq!(
            state.store.booking(at_limit_id).unwrap().status,
            BookingStatus::Pending
        );

        assert_eq!(
            expire_stale_bookings(&state, now + Duration::milliseconds(1)).unwrap(),
            1
        );
        assert_eq!(
            state.store.booking(at_limit_id).unwrap().status,
            BookingStatus::Expired
        );
    }
}
