mod common;

use axum::http::StatusCode;
use serde_json::json;
use serial_test::serial;

use common::*;

#[tokio::test]
#[serial]
async fn send_otp_rejects_malformed_mobile() {
    let pool = test_pool().await;
    let app = create_test_app(pool);

    let (status, body) = post_json(app, "/api/1/authentication/send-otp", json!({ "mobile": "not-a-number" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
#[serial]
async fn send_otp_accepts_valid_mobile() {
    let pool = test_pool().await;
    let app = create_test_app(pool);

    let mobile = unique_mobile();
    let (status, body) = post_json(app, "/api/1/authentication/send-otp", json!({ "mobile": mobile })).await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
#[serial]
async fn verify_otp_rejects_wrong_code() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());

    let mobile = unique_mobile();
    let (status, _) = post_json(app.clone(), "/api/1/authentication/send-otp", json!({ "mobile": mobile })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_json(
        app,
        "/api/1/authentication/verify-otp",
        json!({ "mobile": mobile, "code": "000000", "role": "seeker" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
#[serial]
async fn verify_otp_without_a_prior_send_is_rejected() {
    let pool = test_pool().await;
    let app = create_test_app(pool);

    let mobile = unique_mobile();
    let (status, body) = post_json(
        app,
        "/api/1/authentication/verify-otp",
        json!({ "mobile": mobile, "code": "123456", "role": "seeker" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
#[serial]
async fn fcm_token_registration_requires_auth() {
    let pool = test_pool().await;
    let app = create_test_app(pool);

    let (status, _) = post_json(app, "/api/1/profiles/fcm-token", json!({ "token": "abc" })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[serial]
async fn fcm_token_registration_succeeds_for_authenticated_user() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());
    let (_, token) = seed_user(&pool, proximity_core::models::UserRole::Seeker).await;

    let (status, body) =
        post_json_authed(app, "/api/1/profiles/fcm-token", &token, json!({ "token": "fcm-token-abc" })).await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
#[serial]
async fn fcm_token_registration_rejects_empty_token() {
    let pool = test_pool().await;
    let app = create_test_app(pool.clone());
    let (_, token) = seed_user(&pool, proximity_core::models::UserRole::Seeker).await;

    let (status, body) = post_json_authed(app, "/api/1/profiles/fcm-token", &token, json!({ "token": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}
