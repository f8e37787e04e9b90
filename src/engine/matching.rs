use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::haversine_m;
use crate::models::courier::{Courier, GeoPoint};

const DISTANCE_WEIGHT: f64 = 0.60;
const RATING_WEIGHT: f64 = 0.30;
const COMPLETION_WEIGHT: f64 = 0.10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateScore {
    pub courier_id: Uuid,
    pub distance_m: f64,
    pub score: f64,
}

pub fn score_candidate(
    courier: &Courier,
    pickup: &GeoPoint,
    max_distance_m: f64,
) -> CandidateScore {
    let distance_m = courier
        .location
        .map(|location| haversine_m(&location, pickup))
        .unwrap_or(f64::INFINITY);

    let score = (distance_score(distance_m, max_distance_m) * DISTANCE_WEIGHT)
        + (rating_score(courier.rating) * RATING_WEIGHT)
        + (courier.completion_rate() * COMPLETION_WEIGHT);

    CandidateScore {
        courier_id: courier.id,
        distance_m,
        score,
    }
}

/// Picks the highest-scoring candidate. Equal scores keep the earlier candidate.
///
/// Pure: the caller is responsible for binding the winner atomically.
pub fn select_courier<'a>(
    candidates: &'a [Courier],
    pickup: &GeoPoint,
    max_distance_m: f64,
) -> Option<(&'a Courier, CandidateScore)> {
    candidates
        .iter()
        .map(|courier| (courier, score_candidate(courier, pickup, max_distance_m)))
        .fold(None::<(&Courier, CandidateScore)>, |best, (courier, scored)| {
            let keep = matches!(&best, Some((_, current)) if current.score >= scored.score);
            if keep { best } else { Some((courier, scored)) }
        })
}

fn distance_score(distance_m: f64, max_distance_m: f64) -> f64 {
    if max_distance_m <= 0.0 {
        return 0.0;
    }

    1.0 - (distance_m.max(0.0).min(max_distance_m) / max_distance_m)
}

fn rating_score(rating: f64) -> f64 {
    (rating / 5.0).clamp(0.0, 1.0)
}
