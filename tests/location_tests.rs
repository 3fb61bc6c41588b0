mod common;

use axum::http::StatusCode;
use proximity_core::models::UserRole;
use serde_json::json;
use serial_test::serial;

use common::*;

const KNOWN_MAIN_CAT: &str = "MS0001";
const KNOWN_SUB_CAT: &str = "SS0001";

#[tokio::test]
#[serial]
async fn provider_toggle_requires_auth() {
    let pool = test_pool().await;
    let app = create_test_app(pool);

    let (status, _) = post_json(
        app,
        "/api/1/location/provider/toggle-status",
        json!({ "active": true, "lat": 11.25, "lng": 75.85, "main_cat_code": KNOWN_MAIN_CAT, "sub_cat_code": KNOWN_SUB_CAT }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[serial]
async fn provider_toggle_rejects_seeker_role() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());
    let (_, token) = seed_user(&pool, UserRole::Seeker).await;

    let (status, body) = post_json_authed(
        app,
        "/api/1/location/provider/toggle-status",
        &token,
        json!({ "active": true, "lat": 11.25, "lng": 75.85, "main_cat_code": KNOWN_MAIN_CAT, "sub_cat_code": KNOWN_SUB_CAT }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
#[serial]
async fn provider_toggle_rejects_unknown_category() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());
    let (_, token) = seed_user(&pool, UserRole::Provider).await;

    let (status, body) = post_json_authed(
        app,
        "/api/1/location/provider/toggle-status",
        &token,
        json!({ "active": true, "lat": 11.25, "lng": 75.85, "main_cat_code": "NOPE", "sub_cat_code": "NOPE" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
#[serial]
async fn provider_toggle_online_then_offline_round_trip() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());
    let (_, token) = seed_user(&pool, UserRole::Provider).await;

    let (status, body) = post_json_authed(
        app.clone(),
        "/api/1/location/provider/toggle-status",
        &token,
        json!({ "active": true, "lat": 11.25, "lng": 75.85, "main_cat_code": KNOWN_MAIN_CAT, "sub_cat_code": KNOWN_SUB_CAT }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["was_active"], false);

    let (status, body) = post_json_authed(
        app,
        "/api/1/location/provider/toggle-status",
        &token,
        json!({ "active": false }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["was_active"], true);
}

#[tokio::test]
#[serial]
async fn seeker_search_toggle_returns_nearby_snapshot() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());
    let (_, provider_token) = seed_user(&pool, UserRole::Provider).await;
    let (_, seeker_token) = seed_user(&pool, UserRole::Seeker).await;

    let (status, _) = post_json_authed(
        app.clone(),
        "/api/1/location/provider/toggle-status",
        &provider_token,
        json!({ "active": true, "lat": 11.2590, "lng": 75.8580, "main_cat_code": KNOWN_MAIN_CAT, "sub_cat_code": KNOWN_SUB_CAT }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_json_authed(
        app,
        "/api/1/location/seeker/search-toggle",
        &seeker_token,
        json!({
            "searching": true,
            "lat": 11.2588,
            "lng": 75.8577,
            "main_cat_code": KNOWN_MAIN_CAT,
            "sub_cat_code": KNOWN_SUB_CAT,
            "radius_km": 5.0
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let providers = body["nearby_providers"].as_array().expect("array");
    assert_eq!(providers.len(), 1);
}

#[tokio::test]
#[serial]
async fn seeker_search_toggle_rejects_radius_out_of_bounds() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());
    let (_, token) = seed_user(&pool, UserRole::Seeker).await;

    let (status, body) = post_json_authed(
        app,
        "/api/1/location/seeker/search-toggle",
        &token,
        json!({
            "searching": true,
            "lat": 11.25,
            "lng": 75.85,
            "main_cat_code": KNOWN_MAIN_CAT,
            "sub_cat_code": KNOWN_SUB_CAT,
            "radius_km": 500.0
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
#[serial]
async fn category_catalog_lists_seeded_rows() {
    let pool = test_pool().await;
    let app = create_test_app(pool);

    let (status, body) = get_no_auth(app, "/api/1/work-categories/").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let categories = body["categories"].as_array().expect("array");
    assert!(!categories.is_empty());
}
