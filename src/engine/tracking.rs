use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::auth::{Actor, Role};
use crate::engine::booking::ensure_party;
use crate::error::AppError;
use crate::geo::validate_point;
use crate::models::booking::Booking;
use crate::models::courier::GeoPoint;
use crate::models::location::{LocationFix, LocationPing, LocationSource};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct LocationUpdateRequest {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, alias = "bookingId")]
    pub booking_id: Option<Uuid>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub accuracy: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourierLocation {
    pub courier_id: Uuid,
    pub location: LocationFix,
    pub source: LocationSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingTracking {
    pub booking: Booking,
    pub locations: Vec<LocationFix>,
}

/// Accepts a position report from the calling courier.
///
/// Client clocks are not trusted past `now`, so a ping can never pin the cache with a future
/// timestamp.
pub fn push_location(
    state: &AppState,
    actor: &Actor,
    request: LocationUpdateRequest,
    now: DateTime<Utc>,
) -> Result<LocationFix, AppError> {
    actor.require_role(Role::Courier)?;

    let point = GeoPoint {
        lat: request.lat,
        lng: request.lng,
    };
    validate_point(&point, "location")?;
    for (field, value) in [
        ("speed", request.speed),
        ("heading", request.heading),
        ("accuracy", request.accuracy),
    ] {
        if value.is_some_and(|value| !value.is_finite() || value < 0.0) {
            return Err(AppError::BadRequest(format!(
                "{field} must be a non-negative number"
            )));
        }
    }

    if let Some(booking_id) = request.booking_id {
        let booking = state
            .store
            .booking(booking_id)
            .ok_or_else(|| AppError::NotFound(format!("booking {booking_id} not found")))?;
        if booking.courier_id != Some(actor.id) {
            return Err(AppError::Forbidden(format!(
                "courier is not assigned to booking {booking_id}"
            )));
        }
        if booking.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "booking {booking_id} is already {}",
                booking.status.as_str()
            )));
        }
    }

    let ping = LocationPing {
        courier_id: actor.id,
        point,
        booking_id: request.booking_id,
        speed: request.speed,
        heading: request.heading,
        accuracy: request.accuracy,
        timestamp: request.timestamp.map_or(now, |at| at.min(now)),
    };
    let fix = LocationFix::from(&ping);

    state.locations.update(ping, now)?;
    state.metrics.location_updates_total.inc();
    debug!(courier_id = %actor.id, booking_id = ?request.booking_id, "location accepted");

    Ok(fix)
}

pub fn courier_location(
    state: &AppState,
    courier_id: Uuid,
    now: DateTime<Utc>,
) -> Result<CourierLocation, AppError> {
    let (location, source) = state
        .locations
        .get(courier_id, now)
        .ok_or_else(|| AppError::NotFound(format!("no location for courier {courier_id}")))?;

    Ok(CourierLocation {
        courier_id,
        location,
        source,
    })
}

pub fn booking_tracking(
    state: &AppState,
    actor: &Actor,
    booking_id: Uuid,
) -> Result<BookingTracking, AppError> {
    let booking = state
        .store
        .booking(booking_id)
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id} not found")))?;
    ensure_party(actor, &booking)?;

    let locations = state
        .locations
        .history_for_booking(booking_id)
        .iter()
        .map(LocationFix::from)
        .collect();

    Ok(BookingTracking { booking, locations })
}
