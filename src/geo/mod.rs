//! In-memory radius queries over active providers and searching seekers,
//! sharded by `(main_cat_code, sub_cat_code)`.
//!
//! Durable state lives in `presence`; this module is a pure spatial index
//! rebuilt from the database at startup and kept in sync on every toggle.
//! Single-writer-per-shard is enforced by taking the shard's write lock for
//! the duration of an upsert/remove; reads take a read lock and never block
//! each other.

use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two WGS-84 points, in kilometers.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let (lat1, lng1, lat2, lng2) = (
        lat1.to_radians(),
        lng1.to_radians(),
        lat2.to_radians(),
        lng2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlng = lng2 - lng1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Rounds to the two decimal places the API edge promises.
pub fn round_km(km: f64) -> f64 {
    (km * 100.0).round() / 100.0
}

pub fn valid_lat(lat: f64) -> bool {
    lat.is_finite() && (-90.0..=90.0).contains(&lat)
}

pub fn valid_lng(lng: f64) -> bool {
    lng.is_finite() && (-180.0..=180.0).contains(&lng)
}

type ShardKey = (String, String);

#[derive(Debug, Clone, Copy)]
struct ProviderPoint {
    user_id: Uuid,
    lat: f64,
    lng: f64,
}

/// A seeker's point in the index, as handed back to callers outside `geo`
/// (e.g. the presence store's online-edge fan-out).
#[derive(Debug, Clone, Copy)]
pub struct SeekerPoint {
    pub user_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub radius_km: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearbyProvider {
    pub user_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub distance_km: f64,
}

#[derive(Default)]
pub struct GeoIndex {
    providers: RwLock<HashMap<ShardKey, Vec<ProviderPoint>>>,
    provider_shard: RwLock<HashMap<Uuid, ShardKey>>,
    seekers: RwLock<HashMap<ShardKey, Vec<SeekerPoint>>>,
    seeker_shard: RwLock<HashMap<Uuid, ShardKey>>,
}

impl GeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(main: &str, sub: &str) -> ShardKey {
        (main.to_string(), sub.to_string())
    }

    /// Inserts or moves a provider into the shard for `(main, sub)`. Removes
    /// any prior placement first, so changing category is a delete+insert as
    /// required by §4.1's "logically deleted from old shards" edge case.
    pub fn upsert_provider(&self, user_id: Uuid, main: &str, sub: &str, lat: f64, lng: f64) {
        self.remove_provider(user_id);
        let key = Self::shard(main, sub);
        self.providers
            .write()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .push(ProviderPoint { user_id, lat, lng });
        self.provider_shard.write().unwrap().insert(user_id, key);
    }

    pub fn remove_provider(&self, user_id: Uuid) {
        if let Some(key) = self.provider_shard.write().unwrap().remove(&user_id) {
            if let Some(points) = self.providers.write().unwrap().get_mut(&key) {
                points.retain(|p| p.user_id != user_id);
            }
        }
    }

    pub fn upsert_seeker(
        &self,
        user_id: Uuid,
        main: &str,
        sub: &str,
        lat: f64,
        lng: f64,
        radius_km: f64,
    ) {
        self.remove_seeker(user_id);
        let key = Self::shard(main, sub);
        self.seekers
            .write()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .push(SeekerPoint {
                user_id,
                lat,
                lng,
                radius_km,
            });
        self.seeker_shard.write().unwrap().insert(user_id, key);
    }

    pub fn remove_seeker(&self, user_id: Uuid) {
        if let Some(key) = self.seeker_shard.write().unwrap().remove(&user_id) {
            if let Some(points) = self.seekers.write().unwrap().get_mut(&key) {
                points.retain(|p| p.user_id != user_id);
            }
        }
    }

    /// Providers within `radius_km` of `(lat, lng)` in the given category,
    /// ascending by distance, ties broken by ascending `user_id`.
    pub fn nearby_providers(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
        main: &str,
        sub: &str,
    ) -> Vec<NearbyProvider> {
        let key = Self::shard(main, sub);
        let guard = self.providers.read().unwrap();
        let Some(points) = guard.get(&key) else {
            return Vec::new();
        };
        let mut out: Vec<NearbyProvider> = points
            .iter()
            .filter_map(|p| {
                let distance_km = round_km(haversine_km(lat, lng, p.lat, p.lng));
                (distance_km <= radius_km).then_some(NearbyProvider {
                    user_id: p.user_id,
                    lat: p.lat,
                    lng: p.lng,
                    distance_km,
                })
            })
            .collect();
        out.sort_by(|a, b| {
            a.distance_km
                .partial_cmp(&b.distance_km)
                .unwrap()
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        out
    }

    /// Seekers currently searching whose category shard is `(main, sub)`.
    /// The caller is responsible for the final radius filter relative to the
    /// provider's point, since that point is not known to the index here.
    pub fn seekers_in_category(&self, main: &str, sub: &str) -> Vec<SeekerPoint> {
        let key = Self::shard(main, sub);
        self.seekers
            .read()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }
}

impl SeekerPoint {
    pub fn within(&self, lat: f64, lng: f64) -> bool {
        round_km(haversine_km(self.lat, self.lng, lat, lng)) <= self.radius_km
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_zero_distance_for_identical_points() {
        assert!((haversine_km(11.259, 75.858, 11.259, 75.858)).abs() < 1e-9);
    }

    #[test]
    fn round_km_rounds_to_two_places() {
        assert_eq!(round_km(0.04321), 0.04);
        assert_eq!(round_km(1.005), 1.0);
    }

    #[test]
    fn lat_lng_validation_boundaries() {
        assert!(valid_lat(90.0));
        assert!(valid_lat(-90.0));
        assert!(!valid_lat(90.0001));
        assert!(valid_lng(180.0));
        assert!(!valid_lng(180.0001));
        assert!(!valid_lat(f64::NAN));
    }

    /// Scenario 1 from the spec's testable properties: two providers active
    /// at (11.2590,75.8580) and (11.3000,75.9000), seeker searches from
    /// (11.2588,75.8577) at radius 5 km; expects exactly one hit at ~0.04 km.
    #[test]
    fn nearby_providers_returns_seeker_snapshot() {
        let index = GeoIndex::new();
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        index.upsert_provider(near, "MS0001", "SS0001", 11.2590, 75.8580);
        index.upsert_provider(far, "MS0001", "SS0001", 11.3000, 75.9000);

        let results = index.nearby_providers(11.2588, 75.8577, 5.0, "MS0001", "SS0001");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].user_id, near);
        assert!((results[0].distance_km - 0.04).abs() < 0.01);
    }

    #[test]
    fn exact_radius_boundary_is_inclusive() {
        let index = GeoIndex::new();
        let provider = Uuid::new_v4();
        // ~5.0 km north of the origin point.
        index.upsert_provider(provider, "MS0001", "SS0001", 11.3040, 75.8580);
        let distance = round_km(haversine_km(11.2590, 75.8580, 11.3040, 75.8580));
        let results = index.nearby_providers(11.2590, 75.8580, distance, "MS0001", "SS0001");
        assert_eq!(results.len(), 1, "point exactly at radius must be included");
    }

    #[test]
    fn changing_category_moves_provider_between_shards() {
        let index = GeoIndex::new();
        let provider = Uuid::new_v4();
        index.upsert_provider(provider, "MS0001", "SS0001", 11.259, 75.858);
        index.upsert_provider(provider, "MS0002", "SS0002", 11.259, 75.858);

        assert!(index
            .nearby_providers(11.259, 75.858, 1.0, "MS0001", "SS0001")
            .is_empty());
        assert_eq!(
            index
                .nearby_providers(11.259, 75.858, 1.0, "MS0002", "SS0002")
                .len(),
            1
        );
    }

    #[test]
    fn remove_provider_clears_shard_membership() {
        let index = GeoIndex::new();
        let provider = Uuid::new_v4();
        index.upsert_provider(provider, "MS0001", "SS0001", 11.259, 75.858);
        index.remove_provider(provider);
        assert!(index
            .nearby_providers(11.259, 75.858, 50.0, "MS0001", "SS0001")
            .is_empty());
    }

    #[test]
    fn ties_break_by_ascending_user_id() {
        let index = GeoIndex::new();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        // Same point, so distance ties exactly.
        index.upsert_provider(b, "MS0001", "SS0001", 11.259, 75.858);
        index.upsert_provider(a, "MS0001", "SS0001", 11.259, 75.858);

        let results = index.nearby_providers(11.259, 75.858, 1.0, "MS0001", "SS0001");
        assert_eq!(results[0].user_id, a);
        assert_eq!(results[1].user_id, b);
    }

    /// Scenario 2: a provider matching a searching seeker's category flips
    /// online; `seekers_in_category` plus the caller's radius filter must
    /// surface that seeker exactly once.
    #[test]
    fn seekers_in_category_feeds_online_edge_fan_out() {
        let index = GeoIndex::new();
        let seeker = Uuid::new_v4();
        index.upsert_seeker(seeker, "MS0001", "SS0001", 11.2588, 75.8577, 5.0);

        let seekers = index.seekers_in_category("MS0001", "SS0001");
        assert_eq!(seekers.len(), 1);
        assert!(seekers[0].within(11.2590, 75.8580));
    }
}
