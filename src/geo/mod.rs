pub mod geocoder;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// How close a driver must be to the geocoded destination for a delivery
/// to count as arrived. Policy value, deliberately not configurable.
pub const ARRIVAL_RADIUS_M: f64 = 100.0;

pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_M * central_angle
}

fn keywords(address: &str) -> impl Iterator<Item = String> + '_ {
    address
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= 2)
        .map(|token| token.to_lowercase())
}

/// Approximate address comparison: do the two free-text addresses share at
/// least one meaningful keyword? Intentionally loose; the distance check
/// backs it up.
pub fn addresses_share_keyword(a: &str, b: &str) -> bool {
    let left: Vec<String> = keywords(a).collect();
    keywords(b).any(|token| left.contains(&token))
}
