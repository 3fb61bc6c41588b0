//! Presence Store (spec component B): durable provider/seeker presence rows
//! plus the authoritative write path into the in-memory [`GeoIndex`].
//!
//! `ProviderPresence` and `SeekerSearch` are exclusively owned by their user;
//! every mutation here is expected to already be gated by the caller's
//! [`crate::auth::AuthUser`] matching `user_id`.

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::geo::{self, GeoIndex, NearbyProvider};
use crate::models::{ProviderPresence, SeekerSearch, UserRole};
use crate::repo;

pub const MIN_RADIUS_KM: f64 = 1.0;
pub const MAX_RADIUS_KM: f64 = 50.0;

pub struct PresenceStore {
    pool: PgPool,
    geo: Arc<GeoIndex>,
}

/// Outcome of a presence toggle: the state prior to this call, so callers can
/// distinguish an "online edge" (false -> true) from a no-op repeat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToggleOutcome {
    pub was_active: bool,
}

impl PresenceStore {
    pub fn new(pool: PgPool, geo: Arc<GeoIndex>) -> Self {
        Self { pool, geo }
    }

    pub fn geo_index(&self) -> &GeoIndex {
        &self.geo
    }

    /// Loads every currently-active provider and searching seeker from
    /// Postgres into the in-memory index. Called once at startup since the
    /// index itself holds no durable state.
    pub async fn rebuild_index(&self) -> AppResult<()> {
        let providers = sqlx::query_as::<_, ProviderPresence>(
            "SELECT user_id, active, lat, lng, main_cat_code, sub_cat_code, last_active_at
             FROM provider_presence WHERE active = TRUE",
        )
        .fetch_all(&self.pool)
        .await?;

        for p in providers {
            if let (Some(lat), Some(lng), Some(main), Some(sub)) =
                (p.lat, p.lng, p.main_cat_code.as_deref(), p.sub_cat_code.as_deref())
            {
                self.geo.upsert_provider(p.user_id, main, sub, lat, lng);
            }
        }

        let seekers = sqlx::query_as::<_, SeekerSearch>(
            "SELECT user_id, searching, lat, lng, cat_code, sub_cat_code, radius_km, last_search_at
             FROM seeker_search WHERE searching = TRUE",
        )
        .fetch_all(&self.pool)
        .await?;

        for s in seekers {
            if let (Some(lat), Some(lng), Some(main), Some(sub), Some(radius_km)) = (
                s.lat,
                s.lng,
                s.cat_code.as_deref(),
                s.sub_cat_code.as_deref(),
                s.radius_km,
            ) {
                self.geo
                    .upsert_seeker(s.user_id, main, sub, lat, lng, radius_km);
            }
        }

        Ok(())
    }

    /// `SetProviderActive` (§4.1). Idempotent upsert; returns the prior
    /// active state.
    pub async fn set_provider_active(
        &self,
        user_id: Uuid,
        lat: f64,
        lng: f64,
        main_cat_code: &str,
        sub_cat_code: &str,
        active: bool,
    ) -> AppResult<ToggleOutcome> {
        repo::require_role(&self.pool, user_id, UserRole::Provider).await?;

        if active && (!geo::valid_lat(lat) || !geo::valid_lng(lng)) {
            return Err(AppError::Validation("lat/lng out of range".into()));
        }
        if active {
            repo::require_known_category(&self.pool, main_cat_code, sub_cat_code).await?;
        }

        let prior = sqlx::query_as::<_, ProviderPresence>(
            "SELECT user_id, active, lat, lng, main_cat_code, sub_cat_code, last_active_at
             FROM provider_presence WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let was_active = prior.as_ref().map(|p| p.active).unwrap_or(false);

        sqlx::query(
            "INSERT INTO provider_presence (user_id, active, lat, lng, main_cat_code, sub_cat_code, last_active_at)
             VALUES ($1, $2, $3, $4, $5, $6, now())
             ON CONFLICT (user_id) DO UPDATE SET
                active = EXCLUDED.active,
                lat = EXCLUDED.lat,
                lng = EXCLUDED.lng,
                main_cat_code = EXCLUDED.main_cat_code,
                sub_cat_code = EXCLUDED.sub_cat_code,
                last_active_at = now()",
        )
        .bind(user_id)
        .bind(active)
        .bind(if active { Some(lat) } else { None })
        .bind(if active { Some(lng) } else { None })
        .bind(main_cat_code)
        .bind(sub_cat_code)
        .execute(&self.pool)
        .await?;

        if active {
            self.geo
                .upsert_provider(user_id, main_cat_code, sub_cat_code, lat, lng);
        } else {
            self.geo.remove_provider(user_id);
        }

        Ok(ToggleOutcome { was_active })
    }

    /// `SetSeekerSearch` (§4.1).
    pub async fn set_seeker_search(
        &self,
        user_id: Uuid,
        lat: f64,
        lng: f64,
        main_cat_code: &str,
        sub_cat_code: &str,
        radius_km: f64,
        searching: bool,
    ) -> AppResult<ToggleOutcome> {
        repo::require_role(&self.pool, user_id, UserRole::Seeker).await?;

        if searching {
            if !geo::valid_lat(lat) || !geo::valid_lng(lng) {
                return Err(AppError::Validation("lat/lng out of range".into()));
            }
            if !(MIN_RADIUS_KM..=MAX_RADIUS_KM).contains(&radius_km) {
                return Err(AppError::Validation(format!(
                    "radius_km must be between {MIN_RADIUS_KM} and {MAX_RADIUS_KM}"
                )));
            }
            repo::require_known_category(&self.pool, main_cat_code, sub_cat_code).await?;
        }

        let prior = sqlx::query_as::<_, SeekerSearch>(
            "SELECT user_id, searching, lat, lng, cat_code, sub_cat_code, radius_km, last_search_at
             FROM seeker_search WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let was_active = prior.as_ref().map(|s| s.searching).unwrap_or(false);

        sqlx::query(
            "INSERT INTO seeker_search (user_id, searching, lat, lng, cat_code, sub_cat_code, radius_km, last_search_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, now())
             ON CONFLICT (user_id) DO UPDATE SET
                searching = EXCLUDED.searching,
                lat = EXCLUDED.lat,
                lng = EXCLUDED.lng,
                cat_code = EXCLUDED.cat_code,
                sub_cat_code = EXCLUDED.sub_cat_code,
                radius_km = EXCLUDED.radius_km,
                last_search_at = now()",
        )
        .bind(user_id)
        .bind(searching)
        .bind(if searching { Some(lat) } else { None })
        .bind(if searching { Some(lng) } else { None })
        .bind(main_cat_code)
        .bind(sub_cat_code)
        .bind(if searching { Some(radius_km) } else { None })
        .execute(&self.pool)
        .await?;

        if searching {
            self.geo
                .upsert_seeker(user_id, main_cat_code, sub_cat_code, lat, lng, radius_km);
        } else {
            self.geo.remove_seeker(user_id);
        }

        Ok(ToggleOutcome { was_active })
    }

    /// `UpdateDistanceRadius` (§4.1, gateway-only op): adjusts only the
    /// configured radius, leaving the seeker's point and category untouched.
    pub async fn update_search_radius(&self, user_id: Uuid, radius_km: f64) -> AppResult<()> {
        if !(MIN_RADIUS_KM..=MAX_RADIUS_KM).contains(&radius_km) {
            return Err(AppError::Validation(format!(
                "radius_km must be between {MIN_RADIUS_KM} and {MAX_RADIUS_KM}"
            )));
        }

        let row = sqlx::query_as::<_, SeekerSearch>(
            "SELECT user_id, searching, lat, lng, cat_code, sub_cat_code, radius_km, last_search_at
             FROM seeker_search WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("no search preference on file".into()))?;

        sqlx::query("UPDATE seeker_search SET radius_km = $1 WHERE user_id = $2")
            .bind(radius_km)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if row.searching {
            if let (Some(lat), Some(lng), Some(main), Some(sub)) =
                (row.lat, row.lng, row.cat_code.as_deref(), row.sub_cat_code.as_deref())
            {
                self.geo.upsert_seeker(user_id, main, sub, lat, lng, radius_km);
            }
        }
        Ok(())
    }

    /// Re-enables a seeker's search preference without touching coordinates,
    /// used on session cancellation (§4.3, §11).
    pub async fn reenable_seeker_search(&self, user_id: Uuid) -> AppResult<()> {
        let row = sqlx::query_as::<_, SeekerSearch>(
            "SELECT user_id, searching, lat, lng, cat_code, sub_cat_code, radius_km, last_search_at
             FROM seeker_search WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(()) };
        let (Some(lat), Some(lng), Some(main), Some(sub), Some(radius_km)) = (
            row.lat,
            row.lng,
            row.cat_code.clone(),
            row.sub_cat_code.clone(),
            row.radius_km,
        ) else {
            return Ok(());
        };

        sqlx::query("UPDATE seeker_search SET searching = TRUE, last_search_at = now() WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        self.geo.upsert_seeker(user_id, &main, &sub, lat, lng, radius_km);
        Ok(())
    }

    /// `NearbyProviders` (§4.1). A pure snapshot read of the in-memory index.
    pub fn nearby_providers(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
        main_cat_code: &str,
        sub_cat_code: &str,
    ) -> Vec<NearbyProvider> {
        self.geo
            .nearby_providers(lat, lng, radius_km, main_cat_code, sub_cat_code)
    }

    /// `SeekersSearchingForProvider` (§4.1). Filters the category shard down
    /// to seekers whose configured radius actually covers the provider's
    /// point, since the index only shards by category.
    pub fn seekers_searching_for_provider(
        &self,
        provider_lat: f64,
        provider_lng: f64,
        main_cat_code: &str,
        sub_cat_code: &str,
    ) -> Vec<Uuid> {
        self.geo
            .seekers_in_category(main_cat_code, sub_cat_code)
            .into_iter()
            .filter(|s| s.within(provider_lat, provider_lng))
            .map(|s| s.user_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_outcome_distinguishes_online_edge() {
        let off = ToggleOutcome { was_active: false };
        let on = ToggleOutcome { was_active: true };
        assert_ne!(off, on);
    }

    #[test]
    fn radius_bounds_match_spec() {
        assert_eq!(MIN_RADIUS_KM, 1.0);
        assert_eq!(MAX_RADIUS_KM, 50.0);
    }
}
