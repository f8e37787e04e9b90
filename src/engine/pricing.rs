//! Fare quotes with a time-of-day surge multiplier cached per coarse grid cell.

use chrono::{DateTime, Datelike, Duration, FixedOffset, TimeZone, Timelike, Utc, Weekday};
use dashmap::DashMap;
use serde::Serialize;

use crate::error::AppError;
use crate::geo::Cell;
use crate::models::courier::{GeoPoint, VehicleClass};

pub const CURRENCY: &str = "USD";

/// Flat surcharge standing in for tolls and waiting time.
pub const ADDITIONAL_CHARGES: f64 = 1.5;

pub const MIN_SURGE: f64 = 1.0;
pub const MAX_SURGE: f64 = 3.0;

const RUSH_HOUR_SURGE: f64 = 1.5;
const WEEKEND_NIGHT_SURGE: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassRates {
    pub per_km: f64,
    pub minimum_fare: f64,
}

pub fn class_rates(class: VehicleClass) -> ClassRates {
    match class {
        VehicleClass::Bike => ClassRates {
            per_km: 0.5,
            minimum_fare: 3.0,
        },
        VehicleClass::Car => ClassRates {
            per_km: 1.0,
            minimum_fare: 5.0,
        },
        VehicleClass::Van => ClassRates {
            per_km: 1.8,
            minimum_fare: 8.0,
        },
        VehicleClass::Truck => ClassRates {
            per_km: 2.5,
            minimum_fare: 12.0,
        },
    }
}

/// `max(km * rate * surge, minimum) + surcharge`, rounded to cents.
pub fn fare(distance_m: f64, class: VehicleClass, surge: f64) -> f64 {
    let rates = class_rates(class);
    let metered = (distance_m / 1_000.0) * rates.per_km * surge;
    round_cents(metered.max(rates.minimum_fare) + ADDITIONAL_CHARGES)
}

/// Demand proxy from the local clock.
///
/// Weekend nights are the evenings of Friday and Saturday from 22:00 and the early hours of
/// Saturday and Sunday up to 02:59. Rush hours are 07:00-09:59 and 16:00-19:59 on any day.
/// Weekend nights take precedence.
pub fn time_of_day_multiplier<Tz: TimeZone>(local: &DateTime<Tz>) -> f64 {
    let hour = local.hour();
    let weekday = local.weekday();

    let weekend_evening = matches!(weekday, Weekday::Fri | Weekday::Sat) && hour >= 22;
    let weekend_small_hours = matches!(weekday, Weekday::Sat | Weekday::Sun) && hour <= 2;
    if weekend_evening || weekend_small_hours {
        return WEEKEND_NIGHT_SURGE;
    }

    if (7..=9).contains(&hour) || (16..=19).contains(&hour) {
        return RUSH_HOUR_SURGE;
    }

    MIN_SURGE
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct Quote {
    pub price: f64,
    pub currency: &'static str,
    pub surge_multiplier: f64,
    pub distance_m: f64,
}

#[derive(Debug, Clone, Copy)]
struct CachedSurge {
    multiplier: f64,
    expires_at: DateTime<Utc>,
}

pub struct SurgePricing {
    cache: DashMap<Cell, CachedSurge>,
    ttl: Duration,
    jitter_max: f64,
    offset: FixedOffset,
}

impl SurgePricing {
    pub fn new(ttl: Duration, jitter_max: f64, offset: FixedOffset) -> Self {
        Self {
            cache: DashMap::new(),
            ttl,
            jitter_max: jitter_max.max(0.0),
            offset,
        }
    }

    /// Multiplier for the cell around `point`; reused until its cache entry expires.
    pub fn surge_multiplier(&self, point: &GeoPoint, now: DateTime<Utc>) -> f64 {
        let mut entry = self
            .cache
            .entry(Cell::containing(point))
            .or_insert_with(|| self.fresh_surge(now));

        if entry.expires_at <= now {
            *entry = self.fresh_surge(now);
        }

        entry.multiplier
    }

    pub fn quote(
        &self,
        distance_m: f64,
        class: VehicleClass,
        pickup: &GeoPoint,
        now: DateTime<Utc>,
    ) -> Result<Quote, AppError> {
        if !distance_m.is_finite() || distance_m < 0.0 {
            return Err(AppError::BadRequest(
                "distance must be a finite, non-negative number of meters".to_string(),
            ));
        }

        let surge_multiplier = self.surge_multiplier(pickup, now);
        let price = fare(distance_m, class, surge_multiplier);
        if !price.is_finite() {
            return Err(AppError::Dependency(format!(
                "pricing produced a non-finite fare for {distance_m} m"
            )));
        }

        Ok(Quote {
            price,
            currency: CURRENCY,
            surge_multiplier,
            distance_m,
        })
    }

    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, cached| cached.expires_at > now);
        before.saturating_sub(self.cache.len())
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    fn fresh_surge(&self, now: DateTime<Utc>) -> CachedSurge {
        let base = time_of_day_multiplier(&now.with_timezone(&self.offset));
        let jitter = rand::random::<f64>() * self.jitter_max;

        CachedSurge {
            multiplier: (base + jitter).clamp(MIN_SURGE, MAX_SURGE),
            expires_at: now + self.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, FixedOffset, TimeZone, Utc};

    use super::{fare, time_of_day_multiplier, SurgePricing, MAX_SURGE, MIN_SURGE};
    use crate::error::AppError;
    use crate::models::courier::{GeoPoint, VehicleClass};

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn eleven_km_car_trip_without_surge() {
        let price = fare(11_119.49, VehicleClass::Car, 1.0);
        assert_eq!(price, 12.62);
    }

    #[test]
    fn short_trips_pay_the_class_minimum() {
        assert_eq!(fare(100.0, VehicleClass::Truck, 1.0), 13.5);
        assert_eq!(fare(0.0, VehicleClass::Bike, 3.0), 4.5);
    }

    #[test]
    fn surge_applies_before_the_floor() {
        assert_eq!(fare(10_000.0, VehicleClass::Bike, 2.0), 11.5);
        assert_eq!(fare(4_000.0, VehicleClass::Bike, 1.2), 4.5);
    }

    #[test]
    fn rush_hour_and_weekend_night_windows() {
        // 2024-01-03 is a Wednesday.
        let at = |day: u32, hour: u32, minute: u32| {
            Utc.with_ymd_and_hms(2024, 1, day, hour, minute, 0).unwrap()
        };

        assert_eq!(time_of_day_multiplier(&at(3, 8, 30)), 1.5);
        assert_eq!(time_of_day_multiplier(&at(3, 12, 0)), 1.0);
        assert_eq!(time_of_day_multiplier(&at(3, 19, 59)), 1.5);
        assert_eq!(time_of_day_multiplier(&at(3, 20, 0)), 1.0);
        assert_eq!(time_of_day_multiplier(&at(5, 21, 59)), 1.0);
        assert_eq!(time_of_day_multiplier(&at(5, 22, 0)), 2.0);
        assert_eq!(time_of_day_multiplier(&at(6, 1, 30)), 2.0);
        assert_eq!(time_of_day_multiplier(&at(6, 17, 0)), 1.5);
        assert_eq!(time_of_day_multiplier(&at(7, 2, 59)), 2.0);
        assert_eq!(time_of_day_multiplier(&at(7, 3, 0)), 1.0);
        // Weekday small hours are not a weekend night.
        assert_eq!(time_of_day_multiplier(&at(8, 1, 0)), 1.0);
        assert_eq!(time_of_day_multiplier(&at(3, 0, 30)), 1.0);
    }

    #[test]
    fn local_offset_shifts_the_windows() {
        let pricing = SurgePricing::new(
            Duration::minutes(5),
            0.0,
            FixedOffset::east_opt(2 * 3_600).unwrap(),
        );
        let wednesday_0630_utc = Utc.with_ymd_and_hms(2024, 1, 3, 6, 30, 0).unwrap();
        let point = GeoPoint { lat: 0.0, lng: 0.0 };
        assert_eq!(pricing.surge_multiplier(&point, wednesday_0630_utc), 1.5);
    }

    #[test]
    fn multiplier_is_stable_within_a_cell_until_expiry() {
        let pricing = SurgePricing::new(Duration::minutes(5), 0.3, utc());
        let now = Utc::now();
        let a = GeoPoint {
            lat: 52.5201,
            lng: 13.4049,
        };
        let b = GeoPoint {
            lat: 52.5199,
            lng: 13.4045,
        };

        let first = pricing.surge_multiplier(&a, now);
        let second = pricing.surge_multiplier(&b, now + Duration::minutes(4));
        assert_eq!(first, second);
        assert!((MIN_SURGE..=MAX_SURGE).contains(&first));

        assert_eq!(pricing.evict_expired(now + Duration::minutes(5)), 1);
    }

    #[test]
    fn quote_rejects_bad_distance() {
        let pricing = SurgePricing::new(Duration::minutes(5), 0.0, utc());
        let point = GeoPoint { lat: 0.0, lng: 0.0 };

        let negative = pricing.quote(-1.0, VehicleClass::Car, &point, Utc::now());
        assert!(matches!(negative, Err(AppError::BadRequest(_))));

        let nan = pricing.quote(f64::NAN, VehicleClass::Car, &point, Utc::now());
        assert!(matches!(nan, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn quote_carries_currency_and_multiplier() {
        let pricing = SurgePricing::new(Duration::minutes(5), 0.0, utc());
        let point = GeoPoint { lat: 0.0, lng: 0.0 };
        let wednesday_noon = Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap();

        let quote = pricing
            .quote(11_119.49, VehicleClass::Car, &point, wednesday_noon)
            .unwrap();
        assert_eq!(quote.currency, "USD");
        assert_eq!(quote.surge_multiplier, 1.0);
        assert_eq!(quote.price, 12.62);
    }
}
