use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post, put};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::Actor;
use crate::engine::booking::{
    self, BookingOutcome, BookingPage, CreateBookingRequest, PageQuery, RatingRequest,
};
use crate::error::AppError;
use crate::models::booking::{Booking, BookingStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking).get(list_bookings))
        .route("/bookings/:id", get(get_booking))
        .route("/bookings/:id/cancel", put(cancel_booking))
        .route("/bookings/:id/status", patch(advance_booking))
        .route("/bookings/:id/rating", post(rate_booking))
}

#[derive(Deserialize)]
pub struct AdvanceStatusRequest {
    pub status: BookingStatus,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingOutcome>), AppError> {
    let outcome = booking::create_booking(&state, &actor, payload, Utc::now())?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn list_bookings(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<PageQuery>,
) -> Json<BookingPage> {
    Json(booking::list_bookings(&state, &actor, query))
}

async fn get_booking(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    booking::get_booking(&state, &actor, id).map(Json)
}

async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    booking::cancel_booking(&state, &actor, id, Utc::now()).map(Json)
}

async fn advance_booking(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdvanceStatusRequest>,
) -> Result<Json<Booking>, AppError> {
    booking::advance_booking(&state, &actor, id, payload.status, Utc::now()).map(Json)
}

async fn rate_booking(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<RatingRequest>,
) -> Result<Json<Booking>, AppError> {
    booking::rate_booking(&state, &actor, id, payload, Utc::now()).map(Json)
}
