//! Session Manager (spec component F): the live, two-party interaction for
//! the duration of one accepted work order — location streams, medium
//! exchange, the distance ticker, chat-start, cancellation and completion.
//!
//! Every mutating operation on a session is serialized behind that
//! session's own `tokio::sync::Mutex` entry in [`SessionManager`]'s
//! registry (§5), so both parties' user groups observe a total order of
//! state changes. Snapshot reads (distance queries) take no lock.

pub mod distance;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use serde_json::{json, Value};
use sqlx::PgPool;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::gateway::connections::{group_for_user, ConnectionManager, FrameClass};
use crate::gateway::frames::OutboundFrame;
use crate::models::{Role, SessionState, WorkOrderStatus, WorkSession};
use crate::presence::PresenceStore;
use crate::push::PushDispatcher;
use crate::repo;

pub const ALLOWED_MEDIUM_KEYS: &[&str] = &[
    "telegram",
    "whatsapp",
    "call",
    "map_location",
    "website",
    "instagram",
    "facebook",
    "land_mark",
    "upi_ID",
];

fn validate_mediums(mediums: &Value) -> AppResult<()> {
    let Some(map) = mediums.as_object() else {
        return Err(AppError::Validation("mediums must be a JSON object".into()));
    };
    if map.is_empty() {
        return Err(AppError::Validation("mediums must not be empty".into()));
    }
    for key in map.keys() {
        if !ALLOWED_MEDIUM_KEYS.contains(&key.as_str()) {
            return Err(AppError::Validation(format!("unknown medium key: {key}")));
        }
    }
    Ok(())
}

struct SessionEntry {
    lock: AsyncMutex<()>,
    ticker: StdMutex<Option<JoinHandle<()>>>,
}

impl Default for SessionEntry {
    fn default() -> Self {
        Self {
            lock: AsyncMutex::new(()),
            ticker: StdMutex::new(None),
        }
    }
}

pub struct SessionManager {
    pool: PgPool,
    connections: Arc<ConnectionManager>,
    push: Arc<PushDispatcher>,
    presence: Arc<PresenceStore>,
    tick_interval: Duration,
    registry: RwLock<HashMap<Uuid, Arc<SessionEntry>>>,
}

impl SessionManager {
    pub fn new(
        pool: PgPool,
        connections: Arc<ConnectionManager>,
        push: Arc<PushDispatcher>,
        presence: Arc<PresenceStore>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            pool,
            connections,
            push,
            presence,
            tick_interval,
            registry: RwLock::new(HashMap::new()),
        }
    }

    fn entry(&self, session_id: Uuid) -> Arc<SessionEntry> {
        if let Some(existing) = self.registry.read().unwrap().get(&session_id) {
            return existing.clone();
        }
        let mut guard = self.registry.write().unwrap();
        guard
            .entry(session_id)
            .or_insert_with(|| Arc::new(SessionEntry::default()))
            .clone()
    }

    /// Fans a session-scoped frame out to both parties' user groups, rather
    /// than a dedicated session group: a connection only ever joins
    /// `user:{id}:{role}` on connect (§9), never a per-session group.
    fn broadcast(&self, session: &WorkSession, frame: &OutboundFrame, class: FrameClass) {
        let json = frame.to_json();
        let groups = [
            group_for_user(session.seeker_id, Role::Seeker),
            group_for_user(session.provider_id, Role::Provider),
        ];
        let failed = self.connections.broadcast_to_groups(&groups, &json, class);
        for conn_id in failed {
            self.connections.close(conn_id, 4000);
        }
    }

    fn notify_party(&self, session: &WorkSession, role: Role, frame: &OutboundFrame, class: FrameClass) {
        let json = frame.to_json();
        let group = group_for_user(session.user_id_for(role), role);
        let failed = self.connections.broadcast_to_group(&group, &json, class);
        for conn_id in failed {
            self.connections.close(conn_id, 4000);
        }
    }

    /// Rejects updates closer than 50 m to the last stored point, otherwise
    /// stores the new point and, once both parties have reported in,
    /// recomputes and publishes `current_distance_m` (§4.3 steps 1-3).
    pub async fn location_update(
        self: &Arc<Self>,
        session_id: Uuid,
        user_id: Uuid,
        lat: f64,
        lng: f64,
    ) -> AppResult<()> {
        let entry = self.entry(session_id);
        let _guard = entry.lock.lock().await;

        let mut session = repo::fetch_session(&self.pool, session_id).await?;
        let role = repo::require_session_party(&session, user_id)?;
        if session.state == SessionState::Cancelled || session.state == SessionState::Completed {
            return Err(AppError::InvalidState("session is already terminal".into()));
        }

        let (prior_lat, prior_lng) = match role {
            Role::Seeker => (session.seeker_lat, session.seeker_lng),
            Role::Provider => (session.provider_lat, session.provider_lng),
        };
        if let (Some(plat), Some(plng)) = (prior_lat, prior_lng) {
            if distance::distance_m(plat, plng, lat, lng) < distance::MIN_MOVE_METERS {
                return Ok(());
            }
        }

        match role {
            Role::Seeker => {
                sqlx::query(
                    "UPDATE work_sessions SET seeker_lat = $1, seeker_lng = $2, seeker_loc_at = now() WHERE id = $3",
                )
                .bind(lat)
                .bind(lng)
                .bind(session_id)
                .execute(&self.pool)
                .await?;
                session.seeker_lat = Some(lat);
                session.seeker_lng = Some(lng);
            }
            Role::Provider => {
                sqlx::query(
                    "UPDATE work_sessions SET provider_lat = $1, provider_lng = $2, provider_loc_at = now() WHERE id = $3",
                )
                .bind(lat)
                .bind(lng)
                .bind(session_id)
                .execute(&self.pool)
                .await?;
                session.provider_lat = Some(lat);
                session.provider_lng = Some(lng);
            }
        }

        if let (Some(slat), Some(slng), Some(plat), Some(plng)) = (
            session.seeker_lat,
            session.seeker_lng,
            session.provider_lat,
            session.provider_lng,
        ) {
            let meters = distance::distance_m(slat, slng, plat, plng);
            sqlx::query(
                "UPDATE work_sessions SET current_distance_m = $1, last_distance_at = now() WHERE id = $2",
            )
            .bind(meters)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
            self.publish_distance(&session, meters);
        }

        Ok(())
    }

    fn publish_distance(&self, session: &WorkSession, meters: f64) {
        let frame = OutboundFrame::DistanceUpdate {
            session_id: session.id,
            distance_m: meters,
            distance_text: distance::format_distance(meters),
        };
        self.broadcast(session, &frame, FrameClass::Lossy);
    }

    /// `MediumSelection` (§4.3). Seeker submissions drive the
    /// `waiting -> active` transition; a provider submission after the
    /// session is active notifies the seeker with `provider_mediums_shared`.
    pub async fn medium_selection(
        self: &Arc<Self>,
        session_id: Uuid,
        user_id: Uuid,
        mediums: Value,
    ) -> AppResult<()> {
        validate_mediums(&mediums)?;
        let entry = self.entry(session_id);
        let _guard = entry.lock.lock().await;

        let session = repo::fetch_session(&self.pool, session_id).await?;
        let role = repo::require_session_party(&session, user_id)?;
        if session.state == SessionState::Cancelled || session.state == SessionState::Completed {
            return Err(AppError::InvalidState("session is already terminal".into()));
        }

        match role {
            Role::Seeker => {
                let was_active = session.state == SessionState::Active;
                sqlx::query(
                    "UPDATE work_sessions SET seeker_mediums = $1,
                        state = CASE WHEN state = 'waiting' THEN 'active' ELSE state END,
                        mediums_shared_at = COALESCE(mediums_shared_at, now())
                     WHERE id = $2",
                )
                .bind(&mediums)
                .bind(session_id)
                .execute(&self.pool)
                .await?;
                if !was_active {
                    tracing::info!(%session_id, "session activated by seeker medium selection");
                    self.start_ticker(session_id);
                }
            }
            Role::Provider => {
                sqlx::query("UPDATE work_sessions SET provider_mediums = $1 WHERE id = $2")
                    .bind(&mediums)
                    .bind(session_id)
                    .execute(&self.pool)
                    .await?;
                if session.state == SessionState::Active {
                    let frame = OutboundFrame::ProviderMediumsShared {
                        session_id,
                        mediums: mediums.clone(),
                    };
                    self.notify_party(&session, Role::Seeker, &frame, FrameClass::Lossless);
                }
            }
        }

        Ok(())
    }

    /// `start_chat` (§4.3). Idempotent: only the first request stamps
    /// `chat_started_at` and emits `chat_ready`.
    pub async fn start_chat(self: &Arc<Self>, session_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let entry = self.entry(session_id);
        let _guard = entry.lock.lock().await;

        let session = repo::fetch_session(&self.pool, session_id).await?;
        repo::require_session_party(&session, user_id)?;

        if session.chat_started_at.is_some() {
            return Ok(());
        }

        sqlx::query("UPDATE work_sessions SET chat_started_at = now() WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        let frame = OutboundFrame::ChatReady {
            chat_room_id: session.chat_room_id(),
        };
        self.broadcast(&session, &frame, FrameClass::Lossless);
        Ok(())
    }

    /// Cancellation (§4.3): sets `state=cancelled`, flips the parent order,
    /// schedules chat TTL, notifies the counterparty and closes its sockets,
    /// and re-enables the seeker's search preference.
    pub async fn cancel(self: &Arc<Self>, session_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let entry = self.entry(session_id);
        let _guard = entry.lock.lock().await;

        let session = repo::fetch_session(&self.pool, session_id).await?;
        let canceller_role = repo::require_session_party(&session, user_id)?;
        if session.state == SessionState::Cancelled || session.state == SessionState::Completed {
            return Err(AppError::InvalidState("session is already terminal".into()));
        }

        let mut tx = self.pool.begin().await.map_err(AppError::from)?;
        sqlx::query(
            "UPDATE work_sessions SET state = 'cancelled', cancelled_by = $1, cancelled_at = now() WHERE id = $2",
        )
        .bind(user_id)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE work_orders SET status = 'cancelled' WHERE id = $1")
            .bind(session.work_order_id)
            .execute(&mut *tx)
            .await?;
        self.schedule_chat_ttl(&mut tx, session_id).await?;
        tx.commit().await.map_err(AppError::from)?;

        self.stop_ticker(session_id);

        let frame = OutboundFrame::ConnectionCancelled {
            session_id,
            cancelled_by: user_id,
        };
        self.broadcast(&session, &frame, FrameClass::Lossless);

        let counterparty_group = group_for_user(
            session.user_id_for(canceller_role.other()),
            canceller_role.other(),
        );
        for conn_id in self.connections.members_of(&counterparty_group) {
            self.connections.close(conn_id, 4000);
        }

        self.presence
            .reenable_seeker_search(session.seeker_id)
            .await?;

        Ok(())
    }

    /// Completion (§4.3): seeker-only, active-only, optionally rates the
    /// session, flips the parent order to `completed`, schedules chat TTL,
    /// and notifies the provider.
    pub async fn complete(
        self: &Arc<Self>,
        session_id: Uuid,
        user_id: Uuid,
        rating: Option<i32>,
        rating_text: Option<String>,
    ) -> AppResult<()> {
        if let Some(r) = rating {
            if !(1..=5).contains(&r) {
                return Err(AppError::Validation("rating must be between 1 and 5".into()));
            }
        }

        let entry = self.entry(session_id);
        let _guard = entry.lock.lock().await;

        let session = repo::fetch_session(&self.pool, session_id).await?;
        let role = repo::require_session_party(&session, user_id)?;
        if role != Role::Seeker {
            return Err(AppError::Forbidden("only the seeker may finish a service".into()));
        }
        if session.state != SessionState::Active {
            return Err(AppError::InvalidState("session is not active".into()));
        }

        let mut tx = self.pool.begin().await.map_err(AppError::from)?;
        sqlx::query(
            "UPDATE work_sessions SET state = 'completed', completed_at = now(), rating = $1, rating_text = $2 WHERE id = $3",
        )
        .bind(rating)
        .bind(&rating_text)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE work_orders SET status = 'completed', completion_time = now() WHERE id = $1")
            .bind(session.work_order_id)
            .execute(&mut *tx)
            .await?;
        self.schedule_chat_ttl(&mut tx, session_id).await?;
        tx.commit().await.map_err(AppError::from)?;

        self.stop_ticker(session_id);

        let frame = OutboundFrame::ServiceFinished { session_id };
        self.notify_party(&session, Role::Provider, &frame, FrameClass::Lossless);

        Ok(())
    }

    async fn schedule_chat_ttl(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        session_id: Uuid,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE chat_messages SET expires_at = (
                SELECT COALESCE(cancelled_at, completed_at) + interval '24 hours'
                FROM work_sessions WHERE id = $1
             ) WHERE session_id = $1",
        )
        .bind(session_id)
        .execute(&mut *tx)
        .await?;
        Ok(())
    }

    /// Spawns the per-session 30-second (configurable) distance ticker,
    /// owned by the session's registry entry and aborted on terminal
    /// transition or disconnect (§4.3 step 4, §5, §9).
    pub fn start_ticker(self: &Arc<Self>, session_id: Uuid) {
        let entry = self.entry(session_id);
        let mut ticker_guard = entry.ticker.lock().unwrap();
        if ticker_guard.is_some() {
            return;
        }

        let manager = self.clone();
        let interval = self.tick_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Ok(session) = repo::fetch_session(&manager.pool, session_id).await else {
                    break;
                };
                if session.state != SessionState::Active {
                    break;
                }
                if let (Some(slat), Some(slng), Some(plat), Some(plng)) = (
                    session.seeker_lat,
                    session.seeker_lng,
                    session.provider_lat,
                    session.provider_lng,
                ) {
                    let meters = distance::distance_m(slat, slng, plat, plng);
                    manager.publish_distance(&session, meters);
                }
            }
        });

        *ticker_guard = Some(handle);
    }

    pub fn stop_ticker(&self, session_id: Uuid) {
        if let Some(existing) = self.registry.read().unwrap().get(&session_id) {
            if let Some(handle) = existing.ticker.lock().unwrap().take() {
                handle.abort();
            }
        }
    }

    /// Called by the Work Order Service on `Respond(accepted=true)`: the
    /// only producer of sessions (§4.2).
    pub async fn create_from_accepted_order(
        &self,
        order_id: Uuid,
    ) -> AppResult<WorkSession> {
        let order = repo::fetch_work_order(&self.pool, order_id).await?;
        if order.status != WorkOrderStatus::Accepted {
            return Err(AppError::InvalidState(
                "work order must be accepted before a session can be created".into(),
            ));
        }

        let session_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO work_sessions
                (id, work_order_id, seeker_id, provider_id, state, seeker_mediums, provider_mediums, created_at)
             VALUES ($1, $2, $3, $4, 'waiting', $5, $5, now())",
        )
        .bind(session_id)
        .bind(order_id)
        .bind(order.seeker_id)
        .bind(order.provider_id)
        .bind(json!({}))
        .execute(&self.pool)
        .await?;

        repo::fetch_session(&self.pool, session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_mediums_rejects_empty_map() {
        let err = validate_mediums(&json!({})).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn validate_mediums_rejects_unknown_key() {
        let err = validate_mediums(&json!({"carrier_pigeon": "x"})).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn validate_mediums_accepts_known_keys() {
        assert!(validate_mediums(&json!({"call": "+911234567890"})).is_ok());
        assert!(validate_mediums(&json!({"telegram": "@x", "upi_ID": "x@upi"})).is_ok());
    }
}
