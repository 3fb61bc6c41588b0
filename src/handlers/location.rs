//! HTTP mirror of the presence-toggle contract (§4.1, §6). The primary
//! transport for these toggles is the `/ws/location/{role}` socket
//! (`gateway::location_ws`); these endpoints exist because §6 lists them
//! on the HTTP surface too (e.g. for clients toggling status before the
//! socket connects).

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ToggleProviderStatusRequest {
    pub active: bool,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub main_cat_code: Option<String>,
    pub sub_cat_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ToggleProviderStatusResponse {
    pub active: bool,
    pub was_active: bool,
}

/// `POST /location/provider/toggle-status` (§6).
pub async fn toggle_provider_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<ToggleProviderStatusRequest>,
) -> AppResult<Json<ToggleProviderStatusResponse>> {
    let (lat, lng, main, sub) = presence_fields(
        req.active,
        req.lat,
        req.lng,
        req.main_cat_code,
        req.sub_cat_code,
    )?;
    let outcome = state
        .presence
        .set_provider_active(auth.user_id(), lat, lng, &main, &sub, req.active)
        .await?;
    Ok(Json(ToggleProviderStatusResponse {
        active: req.active,
        was_active: outcome.was_active,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SeekerSearchToggleRequest {
    pub searching: bool,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub main_cat_code: Option<String>,
    pub sub_cat_code: Option<String>,
    pub radius_km: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SeekerSearchToggleResponse {
    pub searching: bool,
    pub nearby_providers: Vec<Value>,
}

/// `POST /location/seeker/search-toggle` (§6): returns a snapshot of nearby
/// providers alongside the toggle outcome, matching the HTTP table's
/// "returns snapshot of nearby providers" note.
pub async fn seeker_search_toggle(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<SeekerSearchToggleRequest>,
) -> AppResult<Json<SeekerSearchToggleResponse>> {
    let (lat, lng, main, sub) = presence_fields(
        req.searching,
        req.lat,
        req.lng,
        req.main_cat_code,
        req.sub_cat_code,
    )?;
    let radius_km = req
        .radius_km
        .unwrap_or(crate::presence::MIN_RADIUS_KM.max(10.0));

    state
        .presence
        .set_seeker_search(auth.user_id(), lat, lng, &main, &sub, radius_km, req.searching)
        .await?;

    let nearby_providers = if req.searching {
        state
            .presence
            .nearby_providers(lat, lng, radius_km, &main, &sub)
            .into_iter()
            .map(|p| {
                serde_json::json!({
                    "provider_id": p.user_id,
                    "lat": p.lat,
                    "lng": p.lng,
                    "distance_km": p.distance_km,
                })
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(Json(SeekerSearchToggleResponse {
        searching: req.searching,
        nearby_providers,
    }))
}

fn presence_fields(
    on: bool,
    lat: Option<f64>,
    lng: Option<f64>,
    main: Option<String>,
    sub: Option<String>,
) -> AppResult<(f64, f64, String, String)> {
    if !on {
        return Ok((0.0, 0.0, main.unwrap_or_default(), sub.unwrap_or_default()));
    }
    match (lat, lng, main, sub) {
        (Some(lat), Some(lng), Some(main), Some(sub)) => Ok((lat, lng, main, sub)),
        _ => Err(AppError::Validation(
            "lat, lng, main_cat_code and sub_cat_code are required when going active".into(),
        )),
    }
}
