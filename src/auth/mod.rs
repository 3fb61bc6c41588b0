//! Thin authentication contract (§1, out-of-scope login per Non-goals):
//! JWT issuance/validation and the `AuthUser` extractor. OTP generation,
//! SMS delivery, and the mobile-number verification flow are an external
//! collaborator; `handlers::auth` only mints a token once that collaborator
//! has vouched for the number.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json, RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::UserRole;
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: UserRole,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    fn new(user_id: Uuid, role: UserRole, expiration_minutes: i64) -> Self {
        let now = Utc::now();
        Claims {
            sub: user_id.to_string(),
            role,
            exp: (now + Duration::minutes(expiration_minutes)).timestamp(),
            iat: now.timestamp(),
        }
    }

    pub fn user_id(&self) -> AppResult<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::Auth("invalid user id in token".into()))
    }
}

/// Access tokens are short-lived; there is no refresh token in this
/// contract — a new OTP round-trip is required once one expires.
const ACCESS_TOKEN_MINUTES: i64 = 10080; // 7 days

pub fn create_access_token(user_id: Uuid, role: UserRole, secret: &str) -> AppResult<String> {
    let claims = Claims::new(user_id, role, ACCESS_TOKEN_MINUTES);
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).map_err(|e| {
        tracing::error!(error = ?e, "failed to sign access token");
        AppError::Auth("failed to create token".into())
    })
}

pub fn validate_token(token: &str, secret: &str) -> AppResult<Claims> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::warn!(error = ?e, "token validation failed");
            AppError::Auth("invalid or expired token".into())
        })
}

// ============================================================================
// AuthUser extractor
// ============================================================================

/// Authenticated user extracted from a valid bearer token.
///
/// Fields are private: the only valid constructor is the `FromRequestParts`
/// impl, so a handler cannot forge one via struct literal.
pub struct AuthUser {
    user_id: Uuid,
    role: UserRole,
}

impl AuthUser {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn role(&self) -> UserRole {
        self.role
    }
}

type AuthRejection = (StatusCode, Json<serde_json::Value>);

fn auth_error(message: &str) -> AuthRejection {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message })))
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| auth_error("missing or invalid Authorization header"))?;

        let claims = validate_token(bearer.token(), &state.jwt_secret)
            .map_err(|_| auth_error("invalid or expired token"))?;
        let user_id = claims.user_id().map_err(|_| auth_error("invalid token subject"))?;

        Ok(AuthUser { user_id, role: claims.role })
    }
}

/// Validates a bearer token carried as a WebSocket upgrade query parameter,
/// since the upgrade request cannot reliably set an Authorization header.
pub fn authenticate_ws(token: &str, secret: &str) -> AppResult<(Uuid, UserRole)> {
    let claims = validate_token(token, secret)?;
    let user_id = claims.user_id()?;
    Ok((user_id, claims.role))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &str = "test-secret-min-32-characters-long!!";

    #[test]
    fn access_token_roundtrip_happy_path() {
        let user_id = Uuid::new_v4();
        let token = create_access_token(user_id, UserRole::Seeker, TEST_SECRET)
            .expect("create_access_token should succeed");

        let claims = validate_token(&token, TEST_SECRET).expect("validate_token should succeed");
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.role, UserRole::Seeker);
    }

    #[test]
    fn validate_token_rejects_wrong_secret() {
        let user_id = Uuid::new_v4();
        let token = create_access_token(user_id, UserRole::Provider, TEST_SECRET)
            .expect("create_access_token should succeed");
        assert!(validate_token(&token, "a-completely-different-secret-value").is_err());
    }

    #[test]
    fn validate_token_rejects_malformed_string() {
        assert!(validate_token("not.a.jwt", TEST_SECRET).is_err());
    }

    #[test]
    fn claims_user_id_rejects_non_uuid_subject() {
        let claims = Claims {
            sub: "not-a-uuid".into(),
            role: UserRole::Seeker,
            exp: 9999999999,
            iat: 0,
        };
        assert!(claims.user_id().is_err());
    }

    #[test]
    fn authenticate_ws_round_trips_user_and_role() {
        let user_id = Uuid::new_v4();
        let token = create_access_token(user_id, UserRole::Provider, TEST_SECRET).unwrap();
        let (id, role) = authenticate_ws(&token, TEST_SECRET).unwrap();
        assert_eq!(id, user_id);
        assert_eq!(role, UserRole::Provider);
    }
}
