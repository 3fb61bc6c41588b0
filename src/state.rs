use std::sync::Arc;

use sqlx::PgPool;

use crate::chat::ChatSubstream;
use crate::config::Config;
use crate::gateway::connections::ConnectionManager;
use crate::geo::GeoIndex;
use crate::otp::OtpGateway;
use crate::presence::PresenceStore;
use crate::push::PushDispatcher;
use crate::session::SessionManager;
use crate::workorder::WorkOrderService;

/// Shared application state passed to all handlers and extractors.
///
/// Every field that needs interior mutability already wraps it internally
/// (`ConnectionManager`, `GeoIndex`, `SessionManager`'s registry), so cloning
/// `AppState` per request is cheap and never requires an outer lock here.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub jwt_secret: Arc<str>,
    pub connections: Arc<ConnectionManager>,
    pub geo: Arc<GeoIndex>,
    pub presence: Arc<PresenceStore>,
    pub push: Arc<PushDispatcher>,
    pub sessions: Arc<SessionManager>,
    pub chat: Arc<ChatSubstream>,
    pub workorders: Arc<WorkOrderService>,
    pub otp: Arc<OtpGateway>,
}

impl AppState {
    pub fn new(pool: PgPool, config: &Config, http_client: reqwest::Client) -> Self {
        let connections = Arc::new(ConnectionManager::new());
        let geo = Arc::new(GeoIndex::new());
        let presence = Arc::new(PresenceStore::new(pool.clone(), geo.clone()));
        let push = Arc::new(PushDispatcher::new(http_client, config.push_endpoint.clone()));
        let sessions = Arc::new(SessionManager::new(
            pool.clone(),
            connections.clone(),
            push.clone(),
            presence.clone(),
            std::time::Duration::from_secs(config.distance_tick_secs),
        ));
        let chat = Arc::new(ChatSubstream::new(pool.clone(), connections.clone(), push.clone()));
        let workorders = Arc::new(WorkOrderService::new(
            pool.clone(),
            connections.clone(),
            push.clone(),
            sessions.clone(),
        ));
        let otp = Arc::new(OtpGateway::new(pool.clone()));

        Self {
            pool,
            jwt_secret: Arc::from(config.jwt_secret.as_str()),
            connections,
            geo,
            presence,
            push,
            sessions,
            chat,
            workorders,
            otp,
        }
    }
}
