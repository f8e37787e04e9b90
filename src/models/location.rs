use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationPing {
    pub courier_id: Uuid,
    pub point: GeoPoint,
    pub booking_id: Option<Uuid>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    Cache,
    Durable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationFix {
    pub lat: f64,
    pub lng: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl From<&LocationPing> for LocationFix {
    fn from(ping: &LocationPing) -> Self {
        Self {
            lat: ping.point.lat,
            lng: ping.point.lng,
            speed: ping.speed,
            heading: ping.heading,
            timestamp: ping.timestamp,
        }
    }
}
