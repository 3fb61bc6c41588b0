//! Gateway: the two authenticated WebSocket upgrade points and the frame
//! dispatch loop that bridges wire frames to the domain services (§4.6, §6).
//!
//! `/ws/location/:role` carries presence-only traffic (provider go-online,
//! seeker search toggles). `/ws/work/:role` carries everything scoped to an
//! accepted work order: live location, medium exchange, chat, and the
//! provider's assignment response. Both share one connection lifecycle.

pub mod connections;
pub mod frames;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, Query, State},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use uuid::Uuid;

use crate::auth::authenticate_ws;
use crate::models::{MessageStatus, Role, UserRole};
use crate::state::AppState;

use connections::{group_for_user, ConnId, ConnectionManager, FrameClass, OutboundMessage};
use frames::{parse_inbound, InboundFrame, OutboundFrame};

/// Close code for a handshake that never should have upgraded (bad/expired
/// token, role mismatch). Mirrors the close codes already used for
/// in-session forced disconnects (4000) in `gateway::connections`.
const CLOSE_UNAUTHORIZED: u16 = 4001;

#[derive(Debug, serde::Deserialize)]
pub struct WsParams {
    pub token: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Surface {
    Location,
    Work,
}

fn parse_role(raw: &str) -> Option<Role> {
    match raw {
        "seeker" => Some(Role::Seeker),
        "provider" => Some(Role::Provider),
        _ => None,
    }
}

fn role_matches_account(role: Role, account_role: UserRole) -> bool {
    matches!(
        (role, account_role),
        (Role::Seeker, UserRole::Seeker) | (Role::Provider, UserRole::Provider)
    )
}

pub async fn location_ws(
    ws: WebSocketUpgrade,
    Path(role): Path<String>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, role, params, state, Surface::Location).await
}

pub async fn work_ws(
    ws: WebSocketUpgrade,
    Path(role): Path<String>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, role, params, state, Surface::Work).await
}

async fn upgrade(
    ws: WebSocketUpgrade,
    role: String,
    params: WsParams,
    state: AppState,
    surface: Surface,
) -> Response {
    let Some(role) = parse_role(&role) else {
        return axum::http::StatusCode::NOT_FOUND.into_response_with_ws();
    };

    let (user_id, account_role) = match authenticate_ws(&params.token, &state.jwt_secret) {
        Ok(pair) => pair,
        Err(_) => return axum::http::StatusCode::UNAUTHORIZED.into_response_with_ws(),
    };
    if !role_matches_account(role, account_role) {
        return axum::http::StatusCode::FORBIDDEN.into_response_with_ws();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, user_id, role, surface, state))
}

/// axum's `StatusCode` already implements `IntoResponse`; this trivial alias
/// keeps the upgrade-rejection call sites above readable as one line each.
trait IntoResponseExt {
    fn into_response_with_ws(self) -> Response;
}
impl IntoResponseExt for axum::http::StatusCode {
    fn into_response_with_ws(self) -> Response {
        axum::response::IntoResponse::into_response(self)
    }
}

async fn handle_socket(socket: WebSocket, user_id: Uuid, role: Role, surface: Surface, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (conn_id, mut rx) = state.connections.register();
    state.connections.join(conn_id, group_for_user(user_id, role));

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let outcome = match msg {
                OutboundMessage::Frame(text) => ws_sender.send(Message::Text(text)).await,
                OutboundMessage::Close(code) => {
                    let _ = ws_sender
                        .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                            code,
                            reason: "".into(),
                        })))
                        .await;
                    break;
                }
            };
            if outcome.is_err() {
                break;
            }
        }
    });

    let state_clone = state.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&state_clone, conn_id, user_id, role, surface, &text).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%user_id, error = ?e, "websocket receive error, closing");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.connections.deregister(conn_id);
}

async fn handle_frame(state: &AppState, conn_id: ConnId, user_id: Uuid, role: Role, surface: Surface, text: &str) {
    let frame = match parse_inbound(text) {
        Ok(frame) => frame,
        Err(message) => {
            reply_error(state, conn_id, message);
            return;
        }
    };

    if let Err(message) = dispatch(state, user_id, role, surface, conn_id, frame).await {
        reply_error(state, conn_id, message);
    }
}

fn reply_error(state: &AppState, conn_id: ConnId, message: String) {
    let frame = OutboundFrame::Error { error: message };
    state
        .connections
        .send_to_conn(conn_id, OutboundMessage::Frame(frame.to_json()), FrameClass::Lossless);
}

async fn dispatch(
    state: &AppState,
    user_id: Uuid,
    role: Role,
    surface: Surface,
    conn_id: ConnId,
    frame: InboundFrame,
) -> Result<(), String> {
    match frame {
        InboundFrame::Ping => {
            let pong = OutboundFrame::Pong { timestamp: chrono::Utc::now() };
            state.connections.send_to_conn(conn_id, OutboundMessage::Frame(pong.to_json()), FrameClass::Lossless);
            Ok(())
        }

        InboundFrame::ProviderStatusUpdate { active, lat, lng, main_cat_code, sub_cat_code } => {
            require_surface(surface, Surface::Location)?;
            let (lat, lng, main, sub) = require_presence_fields(active, lat, lng, main_cat_code, sub_cat_code)?;
            let outcome = state
                .presence
                .set_provider_active(user_id, lat, lng, &main, &sub, active)
                .await
                .map_err(|e| e.to_string())?;
            notify_presence_edge(state, user_id, role, active, outcome.was_active, lat, lng, &main, &sub);
            Ok(())
        }

        InboundFrame::SeekerSearchUpdate { searching, lat, lng, main_cat_code, sub_cat_code, radius_km } => {
            require_surface(surface, Surface::Location)?;
            let (lat, lng, main, sub) = require_presence_fields(searching, lat, lng, main_cat_code, sub_cat_code)?;
            let radius_km = radius_km.unwrap_or(crate::presence::MIN_RADIUS_KM.max(10.0));
            state
                .presence
                .set_seeker_search(user_id, lat, lng, &main, &sub, radius_km, searching)
                .await
                .map_err(|e| e.to_string())?;
            if searching {
                let providers = state.presence.nearby_providers(lat, lng, radius_km, &main, &sub);
                let frame = OutboundFrame::NearbyProviders {
                    providers: providers
                        .into_iter()
                        .map(|p| {
                            serde_json::json!({
                                "provider_id": p.user_id,
                                "lat": p.lat,
                                "lng": p.lng,
                                "distance_km": p.distance_km,
                            })
                        })
                        .collect(),
                };
                state.connections.send_to_conn(conn_id, OutboundMessage::Frame(frame.to_json()), FrameClass::Lossless);
            }
            Ok(())
        }

        InboundFrame::UpdateDistanceRadius { radius_km } => {
            require_surface(surface, Surface::Location)?;
            state.presence.update_search_radius(user_id, radius_km).await.map_err(|e| e.to_string())
        }

        InboundFrame::LocationUpdate { session_id, lat, lng } => {
            require_surface(surface, Surface::Work)?;
            state.sessions.location_update(session_id, user_id, lat, lng).await.map_err(|e| e.to_string())?;
            state.sessions.start_ticker(session_id);
            Ok(())
        }

        InboundFrame::MediumSelection { session_id, mediums } => {
            require_surface(surface, Surface::Work)?;
            state.sessions.medium_selection(session_id, user_id, mediums).await.map_err(|e| e.to_string())
        }

        InboundFrame::StartChat { session_id } => {
            require_surface(surface, Surface::Work)?;
            state.sessions.start_chat(session_id, user_id).await.map_err(|e| e.to_string())
        }

        InboundFrame::ChatMessage { session_id, text } => {
            require_surface(surface, Surface::Work)?;
            state.chat.send(session_id, user_id, text).await.map_err(|e| e.to_string())?;
            Ok(())
        }

        InboundFrame::MessageDelivered { message_id } => {
            require_surface(surface, Surface::Work)?;
            state.chat.ack(message_id, user_id, MessageStatus::Delivered).await.map_err(|e| e.to_string())
        }

        InboundFrame::MessageRead { message_id } => {
            require_surface(surface, Surface::Work)?;
            state.chat.ack(message_id, user_id, MessageStatus::Read).await.map_err(|e| e.to_string())
        }

        InboundFrame::TypingIndicator { session_id, is_typing } => {
            require_surface(surface, Surface::Work)?;
            state.chat.typing(session_id, user_id, is_typing).await.map_err(|e| e.to_string())
        }

        InboundFrame::RequestChatHistory { session_id } => {
            require_surface(surface, Surface::Work)?;
            let messages = state.chat.history(session_id, user_id).await.map_err(|e| e.to_string())?;
            let frame = OutboundFrame::ChatHistoryLoaded {
                session_id,
                messages: messages
                    .iter()
                    .map(|m| serde_json::to_value(m).unwrap_or(serde_json::Value::Null))
                    .collect(),
            };
            state.connections.send_to_conn(conn_id, OutboundMessage::Frame(frame.to_json()), FrameClass::Lossless);
            Ok(())
        }

        InboundFrame::CancelConnection { session_id } => {
            require_surface(surface, Surface::Work)?;
            state.sessions.cancel(session_id, user_id).await.map_err(|e| e.to_string())
        }

        InboundFrame::FinishService { session_id, rating, rating_text } => {
            require_surface(surface, Surface::Work)?;
            state
                .sessions
                .complete(session_id, user_id, rating, rating_text)
                .await
                .map_err(|e| e.to_string())
        }

        InboundFrame::WorkResponse { work_id, accepted } => {
            require_surface(surface, Surface::Work)?;
            state.workorders.respond(user_id, work_id, accepted).await.map_err(|e| e.to_string())?;
            Ok(())
        }
    }
}

fn require_surface(actual: Surface, expected: Surface) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err("this frame type is not valid on this socket".to_string())
    }
}

fn require_presence_fields(
    on: bool,
    lat: Option<f64>,
    lng: Option<f64>,
    main: Option<String>,
    sub: Option<String>,
) -> Result<(f64, f64, String, String), String> {
    if !on {
        // Going offline needs no coordinates; callers must still supply a
        // category pair so the index knows which shard to clear — but since
        // removal is keyed by user id alone, any placeholder is fine.
        return Ok((0.0, 0.0, main.unwrap_or_default(), sub.unwrap_or_default()));
    }
    match (lat, lng, main, sub) {
        (Some(lat), Some(lng), Some(main), Some(sub)) => Ok((lat, lng, main, sub)),
        _ => Err("lat, lng, main_cat_code and sub_cat_code are required when going active".into()),
    }
}

#[allow(clippy::too_many_arguments)]
fn notify_presence_edge(
    state: &AppState,
    provider_id: Uuid,
    _role: Role,
    active: bool,
    was_active: bool,
    lat: f64,
    lng: f64,
    main: &str,
    sub: &str,
) {
    if active == was_active {
        return;
    }
    let seekers = state.presence.seekers_searching_for_provider(lat, lng, main, sub);
    let frame = if active {
        OutboundFrame::NewProviderAvailable { provider_id, lat, lng, distance_km: 0.0 }
    } else {
        OutboundFrame::ProviderWentOffline { provider_id }
    };
    let json = frame.to_json();
    for seeker_id in seekers {
        let group = group_for_user(seeker_id, Role::Seeker);
        state.connections.broadcast_to_group(&group, &json, FrameClass::Lossy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_role_accepts_known_values_only() {
        assert_eq!(parse_role("seeker"), Some(Role::Seeker));
        assert_eq!(parse_role("provider"), Some(Role::Provider));
        assert_eq!(parse_role("admin"), None);
    }

    #[test]
    fn role_matches_account_rejects_cross_role() {
        assert!(role_matches_account(Role::Seeker, UserRole::Seeker));
        assert!(!role_matches_account(Role::Seeker, UserRole::Provider));
        assert!(!role_matches_account(Role::Provider, UserRole::Admin));
    }

    #[test]
    fn require_surface_rejects_mismatched_socket() {
        assert!(require_surface(Surface::Location, Surface::Work).is_err());
        assert!(require_surface(Surface::Work, Surface::Work).is_ok());
    }

    #[test]
    fn require_presence_fields_allows_bare_offline_toggle() {
        let result = require_presence_fields(false, None, None, None, None);
        assert!(result.is_ok());
    }

    #[test]
    fn require_presence_fields_requires_full_tuple_when_going_active() {
        assert!(require_presence_fields(true, Some(1.0), None, None, None).is_err());
        assert!(require_presence_fields(true, Some(1.0), Some(2.0), Some("a".into()), Some("b".into())).is_ok());
    }
}
