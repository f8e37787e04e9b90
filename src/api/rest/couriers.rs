use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::{Actor, Role};
use crate::error::AppError;
use crate::geo::validate_point;
use crate::models::courier::{Courier, GeoPoint, VehicleClass};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(register_courier).get(list_couriers))
        .route("/couriers/:id/availability", patch(update_availability))
}

#[derive(Deserialize)]
pub struct RegisterCourierRequest {
    /// Identity issued by the auth system; generated when absent.
    pub id: Option<Uuid>,
    pub name: String,
    pub vehicle_class: String,
    pub location: Option<GeoPoint>,
    pub rating: Option<f64>,
}

#[derive(Deserialize)]
pub struct AvailabilityRequest {
    pub is_available: bool,
}

async fn register_courier(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<RegisterCourierRequest>,
) -> Result<(StatusCode, Json<Courier>), AppError> {
    actor.require_admin()?;

    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    let vehicle_class: VehicleClass = payload
        .vehicle_class
        .parse()
        .map_err(AppError::BadRequest)?;
    if let Some(location) = &payload.location {
        validate_point(location, "location")?;
    }

    let now = Utc::now();
    let courier = state.store.insert_courier(Courier {
        id: payload.id.unwrap_or_else(Uuid::new_v4),
        name: payload.name.trim().to_string(),
        vehicle_class,
        location: payload.location,
        location_updated_at: payload.location.map(|_| now),
        is_available: false,
        rating: payload.rating.unwrap_or(5.0).clamp(0.0, 5.0),
        total_trips: 0,
        cancelled_trips: 0,
        updated_at: now,
    })?;

    info!(courier_id = %courier.id, vehicle_class = %courier.vehicle_class, "courier registered");
    Ok((StatusCode::CREATED, Json(courier)))
}

async fn list_couriers(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<Vec<Courier>>, AppError> {
    actor.require_admin()?;
    Ok(Json(state.store.couriers()))
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<AvailabilityRequest>,
) -> Result<Json<Courier>, AppError> {
    let is_self = actor.role == Role::Courier && actor.id == id;
    if !(is_self || actor.is_admin()) {
        return Err(AppError::Forbidden(
            "couriers can only change their own availability".to_string(),
        ));
    }

    let courier = state
        .store
        .set_courier_availability(id, payload.is_available, Utc::now())?;
    info!(courier_id = %id, is_available = courier.is_available, "courier availability changed");

    Ok(Json(courier))
}
