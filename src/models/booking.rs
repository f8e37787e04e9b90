use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::{GeoPoint, VehicleClass};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Accepted,
    EnRoute,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
    Expired,
}

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Delivered | BookingStatus::Cancelled | BookingStatus::Expired
        )
    }

    /// The requester may still back out before the goods are collected.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Accepted | BookingStatus::EnRoute
        )
    }

    /// Next step of the courier-driven delivery sequence.
    pub fn next_in_sequence(&self) -> Option<BookingStatus> {
        match self {
            BookingStatus::Accepted => Some(BookingStatus::EnRoute),
            BookingStatus::EnRoute => Some(BookingStatus::PickedUp),
            BookingStatus::PickedUp => Some(BookingStatus::InTransit),
            BookingStatus::InTransit => Some(BookingStatus::Delivered),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Accepted => "accepted",
            BookingStatus::EnRoute => "en_route",
            BookingStatus::PickedUp => "picked_up",
            BookingStatus::InTransit => "in_transit",
            BookingStatus::Delivered => "delivered",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub courier_id: Option<Uuid>,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub vehicle_class: VehicleClass,
    pub status: BookingStatus,
    pub quoted_price: f64,
    pub final_price: Option<f64>,
    /// Great-circle pickup to dropoff distance in meters.
    pub distance_m: f64,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub goods_description: Option<String>,
    pub goods_weight: Option<f64>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub rating: Option<u8>,
    pub review: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn involves(&self, actor_id: Uuid) -> bool {
        self.requester_id == actor_id || self.courier_id == Some(actor_id)
    }
}
