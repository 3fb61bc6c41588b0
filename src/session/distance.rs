//! Pure distance math for the Session Manager's live-location stream.
//! Kept separate from state mutation so the formatting boundary (§4.3,
//! §11's `get_formatted_distance`) is independently testable.

use crate::geo::haversine_km;

/// Noise-suppression floor: updates within this many meters of the last
/// stored point are ignored (§4.3 step 1).
pub const MIN_MOVE_METERS: f64 = 50.0;

pub fn distance_m(seeker_lat: f64, seeker_lng: f64, provider_lat: f64, provider_lng: f64) -> f64 {
    haversine_km(seeker_lat, seeker_lng, provider_lat, provider_lng) * 1000.0
}

/// `"{n} meters away"` for <1000 m, `"{x.x} km away"` otherwise, matching the
/// original `get_formatted_distance` boundary exactly at 1000 m.
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{} meters away", meters.round() as i64)
    } else {
        format!("{:.1} km away", meters / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_distance_under_1000_uses_meters() {
        assert_eq!(format_distance(999.0), "999 meters away");
        assert_eq!(format_distance(0.0), "0 meters away");
    }

    #[test]
    fn format_distance_at_1000_switches_to_km() {
        assert_eq!(format_distance(1000.0), "1.0 km away");
    }

    #[test]
    fn format_distance_rounds_km_to_one_decimal() {
        assert_eq!(format_distance(2560.0), "2.6 km away");
    }

    #[test]
    fn distance_m_matches_km_times_thousand() {
        let km = haversine_km(11.259, 75.858, 11.304, 75.858);
        let m = distance_m(11.259, 75.858, 11.304, 75.858);
        assert!((m - km * 1000.0).abs() < 1e-9);
    }
}
