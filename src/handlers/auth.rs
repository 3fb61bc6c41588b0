//! Connection/authentication gate's HTTP half (§4.6, §6): OTP send/verify
//! and FCM token registration. OTP generation/delivery is an external SMS
//! collaborator's job (§1 Non-goals); this module only calls into
//! [`crate::otp::OtpGateway`] and mints a token once it has vouched for the
//! mobile number.

use axum::{extract::State, http::StatusCode, Json};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{create_access_token, AuthUser};
use crate::error::{AppError, AppResult};
use crate::models::{User, UserRole};
use crate::repo;
use crate::state::AppState;

static MOBILE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[1-9]\d{7,14}$").unwrap());

fn validate_mobile(mobile: &str) -> Result<(), validator::ValidationError> {
    if MOBILE_RE.is_match(mobile) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("invalid_mobile"))
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SendOtpRequest {
    #[validate(custom = "validate_mobile")]
    pub mobile: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyOtpRequest {
    #[validate(custom = "validate_mobile")]
    pub mobile: String,
    #[validate(length(equal = 6))]
    pub code: String,
    pub role: UserRole,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub user: UserSummary,
}

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub mobile: String,
    pub role: UserRole,
}

fn validation_error(e: validator::ValidationErrors) -> AppError {
    AppError::Validation(
        e.field_errors()
            .keys()
            .map(|f| format!("{f} is invalid"))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// `POST /authentication/send-otp` (§6).
pub async fn send_otp(
    State(state): State<AppState>,
    Json(req): Json<SendOtpRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    req.validate().map_err(validation_error)?;
    state.otp.send(&req.mobile).await?;
    Ok((StatusCode::OK, Json(json!({ "message": "OTP sent" }))))
}

/// `POST /authentication/verify-otp` (§6). Creates the user on first
/// success; enforces the role-switch invariant (§3) on subsequent logins
/// that request a different role than the one on file.
pub async fn verify_otp(
    State(state): State<AppState>,
    Json(req): Json<VerifyOtpRequest>,
) -> AppResult<Json<AuthResponse>> {
    req.validate().map_err(validation_error)?;
    state.otp.verify(&req.mobile, &req.code).await?;

    let existing = sqlx::query_as::<_, User>(
        "SELECT id, mobile, role, verified, fcm_token, created_at FROM users WHERE mobile = $1",
    )
    .bind(&req.mobile)
    .fetch_optional(&state.pool)
    .await?;

    let user = match existing {
        Some(user) => {
            repo::ensure_role_switchable(&state.pool, &user, req.role).await?;
            sqlx::query_as::<_, User>(
                "UPDATE users SET role = $1, verified = TRUE WHERE id = $2
                 RETURNING id, mobile, role, verified, fcm_token, created_at",
            )
            .bind(req.role)
            .bind(user.id)
            .fetch_one(&state.pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, User>(
                "INSERT INTO users (id, mobile, role, verified, created_at)
                 VALUES ($1, $2, $3, TRUE, now())
                 RETURNING id, mobile, role, verified, fcm_token, created_at",
            )
            .bind(Uuid::new_v4())
            .bind(&req.mobile)
            .bind(req.role)
            .fetch_one(&state.pool)
            .await?
        }
    };

    let access_token = create_access_token(user.id, user.role, &state.jwt_secret)?;
    Ok(Json(AuthResponse {
        access_token,
        user: UserSummary {
            id: user.id,
            mobile: user.mobile,
            role: user.role,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct FcmTokenRequest {
    pub token: String,
}

/// `POST /profiles/fcm-token` (§6): registers the caller's mobile-push
/// token, consulted by [`crate::push::PushDispatcher`].
pub async fn register_fcm_token(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<FcmTokenRequest>,
) -> AppResult<Json<Value>> {
    if req.token.trim().is_empty() {
        return Err(AppError::Validation("token must not be empty".into()));
    }
    sqlx::query("UPDATE users SET fcm_token = $1 WHERE id = $2")
        .bind(&req.token)
        .bind(auth.user_id())
        .execute(&state.pool)
        .await?;
    Ok(Json(json!({ "message": "token registered" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mobile_regex_accepts_e164_and_rejects_garbage() {
        assert!(MOBILE_RE.is_match("+911234567890"));
        assert!(MOBILE_RE.is_match("9876543210"));
        assert!(!MOBILE_RE.is_match("abc"));
        assert!(!MOBILE_RE.is_match("0123456789"));
    }
}
