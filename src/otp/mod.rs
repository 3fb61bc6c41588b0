//! OTP issuance/verification: a thin stand-in for the out-of-core SMS
//! collaborator (§1's Non-goals list OTP-based login as an external
//! concern). `handlers::auth` only mints a bearer token once this module
//! has vouched for the mobile number — the actual SMS gateway integration
//! is left to the caller's deployment; here it is logged rather than sent.

use chrono::{Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};

const CODE_TTL_MINUTES: i64 = 5;
const MAX_ATTEMPTS: i32 = 5;

fn hash_code(mobile: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(mobile.as_bytes());
    hasher.update(b":");
    hasher.update(code.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    format!("{:06}", rng.gen_range(0..1_000_000))
}

pub struct OtpGateway {
    pool: PgPool,
}

impl OtpGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Issues a fresh code for `mobile`, overwriting any still-pending one.
    /// Delivery is simulated via a log line — a real deployment would hand
    /// this off to an SMS provider here.
    pub async fn send(&self, mobile: &str) -> AppResult<()> {
        let code = generate_code();
        let code_hash = hash_code(mobile, &code);
        let expires_at = Utc::now() + Duration::minutes(CODE_TTL_MINUTES);

        sqlx::query(
            "INSERT INTO otp_codes (mobile, code_hash, expires_at, attempts)
             VALUES ($1, $2, $3, 0)
             ON CONFLICT (mobile) DO UPDATE SET
                code_hash = EXCLUDED.code_hash,
                expires_at = EXCLUDED.expires_at,
                attempts = 0",
        )
        .bind(mobile)
        .bind(&code_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(mobile, "OTP issued (delivery simulated — no SMS provider configured)");
        Ok(())
    }

    /// Verifies `code` against the most recently issued OTP for `mobile`.
    /// Consumes the code on success; increments the attempt counter and
    /// fails closed on repeated wrong guesses or expiry.
    pub async fn verify(&self, mobile: &str, code: &str) -> AppResult<()> {
        let row = sqlx::query_as::<_, (String, chrono::DateTime<Utc>, i32)>(
            "SELECT code_hash, expires_at, attempts FROM otp_codes WHERE mobile = $1",
        )
        .bind(mobile)
        .fetch_optional(&self.pool)
        .await?;

        let Some((code_hash, expires_at, attempts)) = row else {
            return Err(AppError::Validation("no OTP was requested for this mobile number".into()));
        };

        if attempts >= MAX_ATTEMPTS {
            return Err(AppError::Validation("too many incorrect attempts, request a new OTP".into()));
        }
        if expires_at <= Utc::now() {
            return Err(AppError::Validation("OTP has expired".into()));
        }

        if hash_code(mobile, code) != code_hash {
            sqlx::query("UPDATE otp_codes SET attempts = attempts + 1 WHERE mobile = $1")
                .bind(mobile)
                .execute(&self.pool)
                .await?;
            return Err(AppError::Validation("incorrect OTP".into()));
        }

        sqlx::query("DELETE FROM otp_codes WHERE mobile = $1")
            .bind(mobile)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_code_is_always_six_digits() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn hash_is_deterministic_and_mobile_scoped() {
        assert_eq!(hash_code("+911234567890", "123456"), hash_code("+911234567890", "123456"));
        assert_ne!(hash_code("+911234567890", "123456"), hash_code("+919876543210", "123456"));
    }
}
