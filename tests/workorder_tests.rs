mod common;

use axum::http::StatusCode;
use proximity_core::models::UserRole;
use serde_json::json;
use serial_test::serial;

use common::*;

const KNOWN_MAIN_CAT: &str = "MS0002";
const KNOWN_SUB_CAT: &str = "SS0002";

#[tokio::test]
#[serial]
async fn assign_work_requires_seeker_caller() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());
    let (_, provider_token) = seed_user(&pool, UserRole::Provider).await;
    let (other_provider_id, _) = seed_user(&pool, UserRole::Provider).await;

    let (status, body) = post_json_authed(
        app,
        "/api/1/profiles/assign-work",
        &provider_token,
        json!({
            "provider_id": other_provider_id,
            "service_type": "cleaning",
            "main_cat_code": KNOWN_MAIN_CAT,
            "sub_cat_code": KNOWN_SUB_CAT,
            "lat": 11.25,
            "lng": 75.85,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
#[serial]
async fn assign_work_succeeds_for_seeker_targeting_provider() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());
    let (_, seeker_token) = seed_user(&pool, UserRole::Seeker).await;
    let (provider_id, _) = seed_user(&pool, UserRole::Provider).await;

    let (status, body) = post_json_authed(
        app,
        "/api/1/profiles/assign-work",
        &seeker_token,
        json!({
            "provider_id": provider_id,
            "service_type": "cleaning",
            "main_cat_code": KNOWN_MAIN_CAT,
            "sub_cat_code": KNOWN_SUB_CAT,
            "message": "need this done today",
            "lat": 11.25,
            "lng": 75.85,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert!(body["order_id"].is_string());
}

#[tokio::test]
#[serial]
async fn assign_work_rejects_duplicate_pending_order() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());
    let (_, seeker_token) = seed_user(&pool, UserRole::Seeker).await;
    let (provider_id, _) = seed_user(&pool, UserRole::Provider).await;

    let payload = json!({
        "provider_id": provider_id,
        "service_type": "cleaning",
        "main_cat_code": KNOWN_MAIN_CAT,
        "sub_cat_code": KNOWN_SUB_CAT,
        "lat": 11.25,
        "lng": 75.85,
    });

    let (status, _) = post_json_authed(app.clone(), "/api/1/profiles/assign-work", &seeker_token, payload.clone()).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = post_json_authed(app, "/api/1/profiles/assign-work", &seeker_token, payload).await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
}

#[tokio::test]
#[serial]
async fn assign_work_rejects_unknown_category() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());
    let (_, seeker_token) = seed_user(&pool, UserRole::Seeker).await;
    let (provider_id, _) = seed_user(&pool, UserRole::Provider).await;

    let (status, body) = post_json_authed(
        app,
        "/api/1/profiles/assign-work",
        &seeker_token,
        json!({
            "provider_id": provider_id,
            "service_type": "cleaning",
            "main_cat_code": "GARBAGE",
            "sub_cat_code": "GARBAGE",
            "lat": 11.25,
            "lng": 75.85,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
#[serial]
async fn list_work_orders_is_scoped_to_the_caller() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());
    let (_, seeker_token) = seed_user(&pool, UserRole::Seeker).await;
    let (_, other_seeker_token) = seed_user(&pool, UserRole::Seeker).await;
    let (provider_id, _) = seed_user(&pool, UserRole::Provider).await;

    let (status, _) = post_json_authed(
        app.clone(),
        "/api/1/profiles/assign-work",
        &seeker_token,
        json!({
            "provider_id": provider_id,
            "service_type": "cleaning",
            "main_cat_code": KNOWN_MAIN_CAT,
            "sub_cat_code": KNOWN_SUB_CAT,
            "lat": 11.25,
            "lng": 75.85,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = get_authed(app, "/api/1/profiles/work-orders", &other_seeker_token).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["work_orders"].as_array().unwrap().len(), 0);
}

#[tokio::test]
#[serial]
async fn provider_dashboard_requires_auth() {
    let pool = test_pool().await;
    let app = create_test_app(pool);

    let (status, _) = get_no_auth(app, "/api/1/profiles/provider/dashboard").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
