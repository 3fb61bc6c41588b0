//! Narrow repository helpers shared across the domain modules. Each function
//! owns one query and maps a missing row to [`AppError::NotFound`] so callers
//! never have to remember the mapping themselves.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{ProviderPresence, User, UserRole, WorkOrder, WorkOrderStatus, WorkSession};

pub async fn fetch_user(pool: &PgPool, user_id: Uuid) -> AppResult<User> {
    sqlx::query_as::<_, User>(
        "SELECT id, mobile, role, verified, fcm_token, created_at FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("user not found".into()))
}

pub async fn require_role(pool: &PgPool, user_id: Uuid, role: UserRole) -> AppResult<User> {
    let user = fetch_user(pool, user_id).await?;
    if user.role != role {
        return Err(AppError::Validation(format!(
            "user {user_id} is not a {role:?}"
        )));
    }
    Ok(user)
}

pub async fn fetch_work_order(pool: &PgPool, order_id: Uuid) -> AppResult<WorkOrder> {
    sqlx::query_as::<_, WorkOrder>(
        "SELECT id, seeker_id, provider_id, service_type, main_cat_code, sub_cat_code,
                message, schedule, seeker_lat, seeker_lng, provider_lat, provider_lng,
                calculated_distance_km, status, fcm_sent, websocket_sent, created_at,
                response_time, completion_time
         FROM work_orders WHERE id = $1",
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("work order not found".into()))
}

pub async fn fetch_session(pool: &PgPool, session_id: Uuid) -> AppResult<WorkSession> {
    sqlx::query_as::<_, WorkSession>(
        "SELECT id, work_order_id, seeker_id, provider_id, state,
                provider_lat, provider_lng, provider_loc_at,
                seeker_lat, seeker_lng, seeker_loc_at,
                current_distance_m, last_distance_at,
                seeker_mediums, provider_mediums, mediums_shared_at,
                chat_started_at, cancelled_by, cancelled_at, completed_at,
                rating, rating_text, created_at
         FROM work_sessions WHERE id = $1",
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("session not found".into()))
}

pub async fn fetch_session_by_work_order(
    pool: &PgPool,
    work_order_id: Uuid,
) -> AppResult<WorkSession> {
    sqlx::query_as::<_, WorkSession>(
        "SELECT id, work_order_id, seeker_id, provider_id, state,
                provider_lat, provider_lng, provider_loc_at,
                seeker_lat, seeker_lng, seeker_loc_at,
                current_distance_m, last_distance_at,
                seeker_mediums, provider_mediums, mediums_shared_at,
                chat_started_at, cancelled_by, cancelled_at, completed_at,
                rating, rating_text, created_at
         FROM work_sessions WHERE work_order_id = $1",
    )
    .bind(work_order_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("session not found".into()))
}

/// Verifies `user_id` is one of the session's two parties, returning their
/// role. Returns 404 rather than 403 so a non-party cannot probe for session
/// existence.
pub fn require_session_party(
    session: &WorkSession,
    user_id: Uuid,
) -> AppResult<crate::models::Role> {
    session
        .role_of(user_id)
        .ok_or_else(|| AppError::NotFound("session not found".into()))
}

/// Read contract onto the (out-of-core) category catalog: `UnknownCategory`
/// validation in §4.1's `SetProviderActive`/`SetSeekerSearch` contracts
/// resolves against this table rather than trusting caller-supplied codes.
pub async fn category_exists(pool: &PgPool, main_cat_code: &str, sub_cat_code: &str) -> AppResult<bool> {
    let row: Option<i32> = sqlx::query_scalar(
        "SELECT 1 FROM work_categories WHERE main_cat_code = $1 AND sub_cat_code = $2",
    )
    .bind(main_cat_code)
    .bind(sub_cat_code)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

pub async fn require_known_category(pool: &PgPool, main_cat_code: &str, sub_cat_code: &str) -> AppResult<()> {
    if category_exists(pool, main_cat_code, sub_cat_code).await? {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "unknown category code ({main_cat_code}, {sub_cat_code})"
        )))
    }
}

/// Role-switch guard (§3 User invariant): a role change is only permitted
/// when the user has no open (pending/accepted) `WorkOrder` and, if the
/// switch is away from `provider`, their presence is currently offline.
pub async fn ensure_role_switchable(pool: &PgPool, user: &User, new_role: UserRole) -> AppResult<()> {
    if user.role == new_role {
        return Ok(());
    }

    let open_order: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM work_orders
         WHERE (seeker_id = $1 OR provider_id = $1) AND status IN ('pending', 'accepted')
         LIMIT 1",
    )
    .bind(user.id)
    .fetch_optional(pool)
    .await?;
    if open_order.is_some() {
        return Err(AppError::InvalidState(
            "role cannot change while an open work order exists".into(),
        ));
    }

    if user.role == UserRole::Provider {
        let presence = sqlx::query_as::<_, ProviderPresence>(
            "SELECT user_id, active, lat, lng, main_cat_code, sub_cat_code, last_active_at
             FROM provider_presence WHERE user_id = $1",
        )
        .bind(user.id)
        .fetch_optional(pool)
        .await?;
        if presence.map(|p| p.active).unwrap_or(false) {
            return Err(AppError::InvalidState(
                "provider must go offline before switching role".into(),
            ));
        }
    }

    Ok(())
}

/// Count of the caller's in-flight work orders, used by the provider
/// dashboard read contract (§6, out-of-core aggregation kept minimal here).
pub async fn work_order_counts_for_user(pool: &PgPool, user_id: Uuid) -> AppResult<Vec<(WorkOrderStatus, i64)>> {
    let rows: Vec<(WorkOrderStatus, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM work_orders
         WHERE seeker_id = $1 OR provider_id = $1
         GROUP BY status",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
