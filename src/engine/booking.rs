//! Booking lifecycle: creation with pricing and matching, listing, cancellation, courier-driven
//! status progression and the final rating.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{Actor, Role};
use crate::engine::matching::select_courier;
use crate::error::AppError;
use crate::geo::{haversine_m, validate_point};
use crate::models::booking::{Booking, BookingStatus};
use crate::models::courier::{GeoPoint, VehicleClass};
use crate::realtime::bus::{Channel, ServerEvent};
use crate::state::AppState;

pub const DEFAULT_PAGE_LIMIT: usize = 10;
pub const MAX_PAGE_LIMIT: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingRequest {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub vehicle_class: String,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub goods_description: Option<String>,
    pub goods_weight: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentOutcome {
    Assigned,
    Searching,
}

impl AssignmentOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            AssignmentOutcome::Assigned => "assigned",
            AssignmentOutcome::Searching => "searching",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingOutcome {
    pub booking: Booking,
    pub outcome: AssignmentOutcome,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub current_page: usize,
    pub total_pages: usize,
    pub total_bookings: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingPage {
    pub bookings: Vec<Booking>,
    pub pagination: Pagination,
}

/// Prices the trip, stores a pending booking and tries to bind the best nearby courier.
///
/// Losing the courier to a concurrent booking is not an error: the booking stays pending and the
/// outcome is [`AssignmentOutcome::Searching`].
pub fn create_booking(
    state: &AppState,
    actor: &Actor,
    request: CreateBookingRequest,
    now: DateTime<Utc>,
) -> Result<BookingOutcome, AppError> {
    actor.require_role(Role::User)?;
    validate_point(&request.pickup, "pickup")?;
    validate_point(&request.dropoff, "dropoff")?;
    let vehicle_class: VehicleClass = request
        .vehicle_class
        .parse()
        .map_err(AppError::BadRequest)?;
    if let Some(weight) = request.goods_weight {
        if !weight.is_finite() || weight < 0.0 {
            return Err(AppError::BadRequest(
                "goods_weight must be a non-negative number".to_string(),
            ));
        }
    }

    let distance_m = haversine_m(&request.pickup, &request.dropoff);
    let quote = state
        .pricing
        .quote(distance_m, vehicle_class, &request.pickup, now)?;

    let booking = Booking {
        id: Uuid::new_v4(),
        requester_id: actor.id,
        courier_id: None,
        pickup: request.pickup,
        dropoff: request.dropoff,
        vehicle_class,
        status: BookingStatus::Pending,
        quoted_price: quote.price,
        final_price: None,
        distance_m,
        scheduled_time: request.scheduled_time,
        goods_description: request.goods_description,
        goods_weight: request.goods_weight,
        picked_up_at: None,
        delivered_at: None,
        rating: None,
        review: None,
        created_at: now,
        updated_at: now,
    };
    state.store.insert_booking(booking.clone());
    info!(
        booking_id = %booking.id,
        requester_id = %booking.requester_id,
        vehicle_class = %vehicle_class,
        price = quote.price,
        "booking created"
    );

    let start = Instant::now();
    let (booking, outcome, message) = match assign_nearest(state, &booking, now)? {
        Some(assigned) => (
            assigned,
            AssignmentOutcome::Assigned,
            "courier assigned".to_string(),
        ),
        None => (
            booking,
            AssignmentOutcome::Searching,
            "searching for a courier".to_string(),
        ),
    };

    state
        .metrics
        .assignment_latency_seconds
        .with_label_values(&[outcome.as_str()])
        .observe(start.elapsed().as_secs_f64());
    state
        .metrics
        .bookings_total
        .with_label_values(&[outcome.as_str()])
        .inc();

    Ok(BookingOutcome {
        booking,
        outcome,
        message,
    })
}

fn assign_nearest(
    state: &AppState,
    booking: &Booking,
    now: DateTime<Utc>,
) -> Result<Option<Booking>, AppError> {
    let radius_m = state.config.match_radius_m;
    let candidates = state.store.find_available_couriers(
        booking.vehicle_class,
        &booking.pickup,
        radius_m,
        state.config.match_candidate_limit,
    );

    let Some((courier, scored)) = select_courier(&candidates, &booking.pickup, radius_m) else {
        info!(booking_id = %booking.id, "no courier within range");
        return Ok(None);
    };

    match state.store.assign_courier(booking.id, courier.id, now) {
        Ok(assigned) => {
            info!(
                booking_id = %assigned.id,
                courier_id = %courier.id,
                score = scored.score,
                distance_m = scored.distance_m,
                "booking assigned"
            );
            state.bus.publish(
                Channel::Courier(courier.id),
                ServerEvent::NewBooking {
                    booking_id: assigned.id,
                    pickup: assigned.pickup,
                    dropoff: assigned.dropoff,
                    vehicle_class: assigned.vehicle_class,
                    estimated_price: assigned.quoted_price,
                },
            );
            publish_status(state, &assigned);
            Ok(Some(assigned))
        }
        Err(err @ (AppError::NoAvailableCouriers | AppError::Conflict(_))) => {
            state.metrics.assignment_conflicts_total.inc();
            warn!(
                booking_id = %booking.id,
                courier_id = %courier.id,
                error = %err,
                "assignment lost to a concurrent booking"
            );
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Newest-first page of the bookings the actor may see: their own as requester, their assigned
/// ones as courier, everything as admin.
pub fn list_bookings(state: &AppState, actor: &Actor, query: PageQuery) -> BookingPage {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);

    let (bookings, total) = match actor.role {
        Role::User => state
            .store
            .bookings_page(|booking| booking.requester_id == actor.id, page, limit),
        Role::Courier => state
            .store
            .bookings_page(|booking| booking.courier_id == Some(actor.id), page, limit),
        Role::Admin => state.store.bookings_page(|_| true, page, limit),
    };

    BookingPage {
        bookings,
        pagination: Pagination {
            current_page: page,
            total_pages: total.div_ceil(limit),
            total_bookings: total,
        },
    }
}

pub fn get_booking(state: &AppState, actor: &Actor, id: Uuid) -> Result<Booking, AppError> {
    let booking = state
        .store
        .booking(id)
        .ok_or_else(|| AppError::NotFound(format!("booking {id} not found")))?;
    ensure_party(actor, &booking)?;
    Ok(booking)
}

pub(crate) fn ensure_party(actor: &Actor, booking: &Booking) -> Result<(), AppError> {
    if actor.is_admin() || booking.involves(actor.id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "not a party to booking {}",
            booking.id
        )))
    }
}

/// Requester-initiated cancellation. Releases the bound courier, if any; the courier id stays on
/// the booking for audit.
pub fn cancel_booking(
    state: &AppState,
    actor: &Actor,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<Booking, AppError> {
    let cancelled = state.store.update_booking(id, |booking, courier| {
        if booking.requester_id != actor.id {
            return Err(AppError::Forbidden(
                "only the requester can cancel a booking".to_string(),
            ));
        }
        if booking.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "booking is already {}",
                booking.status.as_str()
            )));
        }
        if !booking.status.is_cancellable() {
            return Err(AppError::Conflict(format!(
                "cannot cancel a booking that is {}",
                booking.status.as_str()
            )));
        }

        booking.status = BookingStatus::Cancelled;
        booking.updated_at = now;
        if let Some(courier) = courier {
            courier.is_available = true;
            courier.updated_at = now;
        }
        Ok(())
    })?;

    info!(booking_id = %cancelled.id, courier_id = ?cancelled.courier_id, "booking cancelled");
    if let Some(courier_id) = cancelled.courier_id {
        state.bus.publish(
            Channel::Courier(courier_id),
            ServerEvent::BookingCancelled {
                booking_id: cancelled.id,
            },
        );
    }
    publish_status(state, &cancelled);

    Ok(cancelled)
}

/// Moves the booking one step along the delivery sequence. Only the assigned courier (or an
/// admin) may do so, and only to the immediate next status.
pub fn advance_booking(
    state: &AppState,
    actor: &Actor,
    id: Uuid,
    target: BookingStatus,
    now: DateTime<Utc>,
) -> Result<Booking, AppError> {
    let advanced = state.store.update_booking(id, |booking, courier| {
        let assigned = actor.role == Role::Courier && booking.courier_id == Some(actor.id);
        if !(assigned || actor.is_admin()) {
            return Err(AppError::Forbidden(
                "only the assigned courier can update this booking".to_string(),
            ));
        }
        if booking.status.next_in_sequence() != Some(target) {
            return Err(AppError::Conflict(format!(
                "cannot move booking from {} to {}",
                booking.status.as_str(),
                target.as_str()
            )));
        }

        booking.status = target;
        booking.updated_at = now;
        match target {
            BookingStatus::PickedUp => booking.picked_up_at = Some(now),
            BookingStatus::Delivered => {
                booking.delivered_at = Some(now);
                booking.final_price = Some(booking.quoted_price);
                if let Some(courier) = courier {
                    courier.is_available = true;
                    courier.updated_at = now;
                }
            }
            _ => {}
        }
        Ok(())
    })?;

    info!(
        booking_id = %advanced.id,
        status = advanced.status.as_str(),
        "booking status advanced"
    );
    publish_status(state, &advanced);

    Ok(advanced)
}

#[derive(Debug, Clone, Deserialize)]
pub struct RatingRequest {
    pub rating: u8,
    pub review: Option<String>,
}

pub fn rate_booking(
    state: &AppState,
    actor: &Actor,
    id: Uuid,
    request: RatingRequest,
    now: DateTime<Utc>,
) -> Result<Booking, AppError> {
    if !(1..=5).contains(&request.rating) {
        return Err(AppError::BadRequest(
            "rating must be between 1 and 5".to_string(),
        ));
    }

    let rated = state.store.update_booking(id, |booking, _| {
        if booking.requester_id != actor.id {
            return Err(AppError::Forbidden(
                "only the requester can rate a booking".to_string(),
            ));
        }
        if booking.status != BookingStatus::Delivered {
            return Err(AppError::Conflict(
                "only delivered bookings can be rated".to_string(),
            ));
        }
        if booking.rating.is_some() {
            return Err(AppError::Conflict("booking already rated".to_string()));
        }

        booking.rating = Some(request.rating);
        booking.review = request.review;
        booking.updated_at = now;
        Ok(())
    })?;

    info!(booking_id = %rated.id, rating = request.rating, "booking rated");
    Ok(rated)
}

pub(crate) fn publish_status(state: &AppState, booking: &Booking) {
    let event = ServerEvent::BookingStatus {
        booking_id: booking.id,
        status: booking.status,
        courier_id: booking.courier_id,
        updated_at: booking.updated_at,
    };
    state
        .bus
        .publish(Channel::User(booking.requester_id), event.clone());
    state.bus.publish(Channel::Booking(booking.id), event);
}
