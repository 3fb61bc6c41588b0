//! Work Order Service (spec component E): the pre-session lifecycle —
//! accept a seeker's request, validate it, notify the provider over both
//! transports, and accept the provider's single decision within the
//! pending window. The only producer of [`crate::models::WorkSession`]
//! rows is `Respond(accepted=true)`, via [`crate::session::SessionManager`].

use std::sync::Arc;

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::gateway::connections::{group_for_user, ConnectionManager, FrameClass};
use crate::gateway::frames::OutboundFrame;
use crate::models::{NotificationKind, Role, User, UserRole, WorkOrder, WorkOrderStatus};
use crate::push::PushDispatcher;
use crate::repo;
use crate::session::SessionManager;

pub struct AssignOutcome {
    pub order_id: Uuid,
    pub fcm_sent: bool,
    pub ws_sent: bool,
}

pub struct RespondOutcome {
    pub order: WorkOrder,
    pub session_id: Option<Uuid>,
}

pub struct WorkOrderService {
    pool: PgPool,
    connections: Arc<ConnectionManager>,
    push: Arc<PushDispatcher>,
    sessions: Arc<SessionManager>,
}

impl WorkOrderService {
    pub fn new(
        pool: PgPool,
        connections: Arc<ConnectionManager>,
        push: Arc<PushDispatcher>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            pool,
            connections,
            push,
            sessions,
        }
    }

    /// `Assign` (§4.2). Precondition: seeker has no `pending` order with
    /// this provider. Distance is computed against current ProviderPresence
    /// if available.
    #[allow(clippy::too_many_arguments)]
    pub async fn assign(
        &self,
        seeker_id: Uuid,
        provider_id: Uuid,
        service_type: String,
        main_cat_code: String,
        sub_cat_code: String,
        message: Option<String>,
        schedule: Option<Value>,
        seeker_lat: f64,
        seeker_lng: f64,
    ) -> AppResult<AssignOutcome> {
        repo::require_role(&self.pool, seeker_id, UserRole::Seeker).await?;
        repo::require_role(&self.pool, provider_id, UserRole::Provider).await?;
        repo::require_known_category(&self.pool, &main_cat_code, &sub_cat_code).await?;

        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM work_orders WHERE seeker_id = $1 AND provider_id = $2 AND status = 'pending'",
        )
        .bind(seeker_id)
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;
        if existing.is_some() {
            return Err(AppError::InvalidState(
                "a pending work order already exists with this provider".into(),
            ));
        }

        let presence = sqlx::query_as::<_, (Option<f64>, Option<f64>)>(
            "SELECT lat, lng FROM provider_presence WHERE user_id = $1 AND active = TRUE",
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?
        .flatten_pair();

        let distance_km = presence.map(|(plat, plng)| {
            crate::geo::round_km(crate::geo::haversine_km(seeker_lat, seeker_lng, plat, plng))
        });

        let order_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO work_orders
                (id, seeker_id, provider_id, service_type, main_cat_code, sub_cat_code,
                 message, schedule, seeker_lat, seeker_lng, provider_lat, provider_lng,
                 calculated_distance_km, status, fcm_sent, websocket_sent, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 'pending', FALSE, FALSE, now())",
        )
        .bind(order_id)
        .bind(seeker_id)
        .bind(provider_id)
        .bind(&service_type)
        .bind(&main_cat_code)
        .bind(&sub_cat_code)
        .bind(&message)
        .bind(&schedule)
        .bind(seeker_lat)
        .bind(seeker_lng)
        .bind(presence.map(|(lat, _)| lat))
        .bind(presence.map(|(_, lng)| lng))
        .bind(distance_km)
        .execute(&self.pool)
        .await?;

        let seeker = repo::fetch_user(&self.pool, seeker_id).await?;
        let ws_sent = self.notify_work_assigned(&seeker, order_id, provider_id, &service_type, message.as_deref(), distance_km);
        let fcm_outcome = self
            .push
            .dispatch(
                &self.pool,
                provider_id,
                Some(order_id),
                NotificationKind::WorkAssigned,
                serde_json::json!({
                    "order_id": order_id,
                    "seeker_id": seeker_id,
                    "service_type": service_type,
                    "distance_km": distance_km,
                }),
            )
            .await?;

        sqlx::query("UPDATE work_orders SET fcm_sent = $1, websocket_sent = $2 WHERE id = $3")
            .bind(fcm_outcome.sent)
            .bind(ws_sent)
            .bind(order_id)
            .execute(&self.pool)
            .await?;

        Ok(AssignOutcome {
            order_id,
            fcm_sent: fcm_outcome.sent,
            ws_sent,
        })
    }

    fn notify_work_assigned(
        &self,
        seeker: &User,
        order_id: Uuid,
        provider_id: Uuid,
        service_type: &str,
        message: Option<&str>,
        distance_km: Option<f64>,
    ) -> bool {
        let frame = OutboundFrame::WorkAssigned {
            order_id,
            seeker_id: seeker.id,
            service_type: service_type.to_string(),
            message: message.map(String::from),
            distance_km,
        };
        let group = group_for_user(provider_id, Role::Provider);
        let json = frame.to_json();
        let failed = self.connections.broadcast_to_group(&group, &json, FrameClass::Lossless);
        if !failed.is_empty() {
            for conn_id in failed {
                self.connections.close(conn_id, 4000);
            }
            return false;
        }
        self.connections.group_size(&group) > 0
    }

    /// `Respond` (§4.2). On `accepted`, atomically creates the session; on
    /// `rejected`, the order terminates. Fails with `InvalidState` and no
    /// mutation if the order is not pending.
    pub async fn respond(
        &self,
        provider_id: Uuid,
        order_id: Uuid,
        accepted: bool,
    ) -> AppResult<RespondOutcome> {
        let order = repo::fetch_work_order(&self.pool, order_id).await?;
        if order.provider_id != provider_id {
            return Err(AppError::NotFound("work order not found".into()));
        }
        if order.status != WorkOrderStatus::Pending {
            return Err(AppError::InvalidState(
                "work order is not pending".into(),
            ));
        }

        let new_status = if accepted { WorkOrderStatus::Accepted } else { WorkOrderStatus::Rejected };
        sqlx::query("UPDATE work_orders SET status = $1, response_time = now() WHERE id = $2")
            .bind(new_status)
            .bind(order_id)
            .execute(&self.pool)
            .await?;

        let session_id = if accepted {
            let session = self.sessions.create_from_accepted_order(order_id).await?;
            Some(session.id)
        } else {
            None
        };

        let order = repo::fetch_work_order(&self.pool, order_id).await?;

        let response_frame = OutboundFrame::WorkResponse {
            work_id: order_id,
            accepted,
            provider_id,
        };
        let seeker_group = group_for_user(order.seeker_id, Role::Seeker);
        let json = response_frame.to_json();
        for conn_id in self.connections.broadcast_to_group(&seeker_group, &json, FrameClass::Lossless) {
            self.connections.close(conn_id, 4000);
        }

        if let Some(session_id) = session_id {
            let accepted_frame = OutboundFrame::WorkAccepted { order_id, session_id };
            let json = accepted_frame.to_json();
            for conn_id in self.connections.broadcast_to_group(&seeker_group, &json, FrameClass::Lossless) {
                self.connections.close(conn_id, 4000);
            }
        }

        let kind = if accepted {
            NotificationKind::WorkAccepted
        } else {
            NotificationKind::WorkRejected
        };
        let _ = self
            .push
            .dispatch(
                &self.pool,
                order.seeker_id,
                Some(order_id),
                kind,
                serde_json::json!({ "order_id": order_id, "accepted": accepted }),
            )
            .await;

        Ok(RespondOutcome { order, session_id })
    }

    /// `List` (§4.2). Read-only; unconstrained beyond the caller's own
    /// work orders and the requested status filter.
    pub async fn list(
        &self,
        user_id: Uuid,
        status: Option<WorkOrderStatus>,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<WorkOrder>> {
        let limit = limit.clamp(1, 200);
        let offset = offset.max(0);

        let orders = match status {
            Some(status) => {
                sqlx::query_as::<_, WorkOrder>(
                    "SELECT id, seeker_id, provider_id, service_type, main_cat_code, sub_cat_code,
                            message, schedule, seeker_lat, seeker_lng, provider_lat, provider_lng,
                            calculated_distance_km, status, fcm_sent, websocket_sent, created_at,
                            response_time, completion_time
                     FROM work_orders
                     WHERE (seeker_id = $1 OR provider_id = $1) AND status = $2
                     ORDER BY created_at DESC
                     LIMIT $3 OFFSET $4",
                )
                .bind(user_id)
                .bind(status)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, WorkOrder>(
                    "SELECT id, seeker_id, provider_id, service_type, main_cat_code, sub_cat_code,
                            message, schedule, seeker_lat, seeker_lng, provider_lat, provider_lng,
                            calculated_distance_km, status, fcm_sent, websocket_sent, created_at,
                            response_time, completion_time
                     FROM work_orders
                     WHERE seeker_id = $1 OR provider_id = $1
                     ORDER BY created_at DESC
                     LIMIT $2 OFFSET $3",
                )
                .bind(user_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(orders)
    }
}

trait FlattenPair {
    fn flatten_pair(self) -> Option<(f64, f64)>;
}

impl FlattenPair for Option<(Option<f64>, Option<f64>)> {
    fn flatten_pair(self) -> Option<(f64, f64)> {
        match self {
            Some((Some(lat), Some(lng))) => Some((lat, lng)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_pair_requires_both_coordinates() {
        assert_eq!(Some((Some(1.0), Some(2.0))).flatten_pair(), Some((1.0, 2.0)));
        assert_eq!(Some((Some(1.0), None)).flatten_pair(), None);
        assert_eq!(None::<(Option<f64>, Option<f64>)>.flatten_pair(), None);
    }
}
