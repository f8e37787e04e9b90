use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Bike,
    Car,
    Van,
    Truck,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 4] = [
        VehicleClass::Bike,
        VehicleClass::Car,
        VehicleClass::Van,
        VehicleClass::Truck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Bike => "bike",
            VehicleClass::Car => "car",
            VehicleClass::Van => "van",
            VehicleClass::Truck => "truck",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleClass {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        VehicleClass::ALL
            .into_iter()
            .find(|class| class.as_str().eq_ignore_ascii_case(raw.trim()))
            .ok_or_else(|| format!("unsupported vehicle class: {raw}, expected bike/car/van/truck"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub name: String,
    pub vehicle_class: VehicleClass,
    pub location: Option<GeoPoint>,
    pub location_updated_at: Option<DateTime<Utc>>,
    pub is_available: bool,
    pub rating: f64,
    pub total_trips: u32,
    pub cancelled_trips: u32,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    /// Share of bound trips that were not cancelled; 1.0 for a courier with no history.
    pub fn completion_rate(&self) -> f64 {
        if self.total_trips == 0 {
            return 1.0;
        }

        let completed = self.total_trips.saturating_sub(self.cancelled_trips) as f64;
        (completed / self.total_trips as f64).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::VehicleClass;

    #[test]
    fn vehicle_class_parses_case_insensitively() {
        assert_eq!("Car".parse::<VehicleClass>(), Ok(VehicleClass::Car));
        assert_eq!(" truck ".parse::<VehicleClass>(), Ok(VehicleClass::Truck));
        assert!("hovercraft".parse::<VehicleClass>().is_err());
    }
}
