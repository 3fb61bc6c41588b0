//! Work Order Service's HTTP surface (§4.2, §6). The provider's accept/
//! reject decision and everything session-scoped travels over
//! `/ws/work/{role}` instead (`gateway::work_ws`); only creation and
//! read-only listing are exposed here.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::models::WorkOrderStatus;
use crate::repo;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AssignWorkRequest {
    pub provider_id: Uuid,
    pub service_type: String,
    pub main_cat_code: String,
    pub sub_cat_code: String,
    pub message: Option<String>,
    pub schedule: Option<Value>,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Serialize)]
pub struct AssignWorkResponse {
    pub order_id: Uuid,
    pub fcm_sent: bool,
    pub ws_sent: bool,
}

/// `POST /profiles/assign-work` (§6, §4.2 `Assign`).
pub async fn assign_work(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<AssignWorkRequest>,
) -> AppResult<(StatusCode, Json<AssignWorkResponse>)> {
    let outcome = state
        .workorders
        .assign(
            auth.user_id(),
            req.provider_id,
            req.service_type,
            req.main_cat_code,
            req.sub_cat_code,
            req.message,
            req.schedule,
            req.lat,
            req.lng,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AssignWorkResponse {
            order_id: outcome.order_id,
            fcm_sent: outcome.fcm_sent,
            ws_sent: outcome.ws_sent,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListWorkOrdersQuery {
    pub status: Option<WorkOrderStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /profiles/work-orders` (§6, §4.2 `List`).
pub async fn list_work_orders(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListWorkOrdersQuery>,
) -> AppResult<Json<Value>> {
    let orders = state
        .workorders
        .list(auth.user_id(), query.status, query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(json!({ "work_orders": orders })))
}

/// `GET /profiles/provider/dashboard` (§6). Out-of-core per §1's scope
/// note ("profile/portfolio CRUD" is an external collaborator); this is a
/// minimal read-only aggregation over the core's own tables so the surface
/// is runnable without a separate profiles service.
pub async fn provider_dashboard(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Value>> {
    let counts = repo::work_order_counts_for_user(&state.pool, auth.user_id()).await?;
    let presence = sqlx::query_as::<_, crate::models::ProviderPresence>(
        "SELECT user_id, active, lat, lng, main_cat_code, sub_cat_code, last_active_at
         FROM provider_presence WHERE user_id = $1",
    )
    .bind(auth.user_id())
    .fetch_optional(&state.pool)
    .await?;

    let by_status: serde_json::Map<String, Value> = counts
        .into_iter()
        .map(|(status, count)| (format!("{status:?}").to_lowercase(), json!(count)))
        .collect();

    Ok(Json(json!({
        "active": presence.as_ref().map(|p| p.active).unwrap_or(false),
        "work_order_counts": by_status,
    })))
}
