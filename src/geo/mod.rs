use crate::error::AppError;
use crate::models::courier::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Coordinates are bucketed to two decimals, roughly 1.1 km at the equator.
const CELL_SCALE: f64 = 100.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * central_angle
}

pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    haversine_km(a, b) * 1_000.0
}

pub fn validate_point(point: &GeoPoint, field: &str) -> Result<(), AppError> {
    if !point.lat.is_finite() || !point.lng.is_finite() {
        return Err(AppError::BadRequest(format!(
            "{field} coordinates must be finite numbers"
        )));
    }
    if !(-90.0..=90.0).contains(&point.lat) {
        return Err(AppError::BadRequest(format!(
            "{field} latitude {} is outside [-90, 90]",
            point.lat
        )));
    }
    if !(-180.0..=180.0).contains(&point.lng) {
        return Err(AppError::BadRequest(format!(
            "{field} longitude {} is outside [-180, 180]",
            point.lng
        )));
    }
    Ok(())
}

/// Coarse grid cell used to share surge state between nearby pickups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cell {
    pub lat: i32,
    pub lng: i32,
}

impl Cell {
    pub fn containing(point: &GeoPoint) -> Self {
        Self {
            lat: (point.lat * CELL_SCALE).round() as i32,
            lng: (point.lng * CELL_SCALE).round() as i32,
        }
    }
}

pub fn format_distance_km(distance_m: f64) -> String {
    format!("{:.2} km", distance_m / 1_000.0)
}
