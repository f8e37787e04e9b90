use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::Actor;
use crate::error::AppError;
use crate::geo::{format_distance_km, validate_point};
use crate::models::courier::{GeoPoint, VehicleClass};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/pricing/estimate", post(estimate))
        .route("/pricing/surge-multiplier", get(surge_multiplier))
}

#[derive(Deserialize)]
pub struct EstimateRequest {
    /// Meters.
    pub distance: f64,
    pub vehicle_class: String,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
}

#[derive(Serialize)]
pub struct EstimateResponse {
    pub estimated_price: f64,
    pub currency: &'static str,
    pub distance: String,
    pub surge_multiplier: f64,
}

#[derive(Deserialize)]
pub struct SurgeQuery {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Serialize)]
pub struct SurgeResponse {
    pub surge_multiplier: f64,
}

async fn estimate(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Json(payload): Json<EstimateRequest>,
) -> Result<Json<EstimateResponse>, AppError> {
    validate_point(&payload.pickup, "pickup")?;
    validate_point(&payload.dropoff, "dropoff")?;
    let class: VehicleClass = payload
        .vehicle_class
        .parse()
        .map_err(AppError::BadRequest)?;

    let quote = state
        .pricing
        .quote(payload.distance, class, &payload.pickup, Utc::now())?;

    Ok(Json(EstimateResponse {
        estimated_price: quote.price,
        currency: quote.currency,
        distance: format_distance_km(quote.distance_m),
        surge_multiplier: quote.surge_multiplier,
    }))
}

async fn surge_multiplier(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SurgeQuery>,
) -> Result<Json<SurgeResponse>, AppError> {
    let point = GeoPoint {
        lat: query.lat,
        lng: query.lng,
    };
    validate_point(&point, "location")?;

    Ok(Json(SurgeResponse {
        surge_multiplier: state.pricing.surge_multiplier(&point, Utc::now()),
    }))
}
