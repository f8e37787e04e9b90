use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use uuid::Uuid;

use crate::auth::Actor;
use crate::engine::tracking::{self, BookingTracking, CourierLocation, LocationUpdateRequest};
use crate::error::AppError;
use crate::models::location::LocationFix;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tracking/location", post(push_location))
        .route("/tracking/location/:courier_id", get(courier_location))
        .route("/tracking/booking/:booking_id", get(booking_tracking))
}

async fn push_location(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<LocationUpdateRequest>,
) -> Result<Json<LocationFix>, AppError> {
    tracking::push_location(&state, &actor, payload, Utc::now()).map(Json)
}

async fn courier_location(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path(courier_id): Path<Uuid>,
) -> Result<Json<CourierLocation>, AppError> {
    tracking::courier_location(&state, courier_id, Utc::now()).map(Json)
}

async fn booking_tracking(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<BookingTracking>, AppError> {
    tracking::booking_tracking(&state, &actor, booking_id).map(Json)
}
