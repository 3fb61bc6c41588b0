//! Tagged-union frame parsing (§9's dynamic-typing redesign flag). Every
//! inbound frame carries a `type` discriminator; unknown tags produce an
//! `error` frame rather than a panic or a dynamic dict lookup.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Ping,

    ProviderStatusUpdate {
        active: bool,
        lat: Option<f64>,
        lng: Option<f64>,
        main_cat_code: Option<String>,
        sub_cat_code: Option<String>,
    },
    SeekerSearchUpdate {
        searching: bool,
        lat: Option<f64>,
        lng: Option<f64>,
        main_cat_code: Option<String>,
        sub_cat_code: Option<String>,
        radius_km: Option<f64>,
    },
    UpdateDistanceRadius {
        radius_km: f64,
    },

    LocationUpdate {
        session_id: Uuid,
        lat: f64,
        lng: f64,
    },
    MediumSelection {
        session_id: Uuid,
        mediums: Value,
    },
    StartChat {
        session_id: Uuid,
    },
    ChatMessage {
        session_id: Uuid,
        text: String,
    },
    MessageDelivered {
        message_id: Uuid,
    },
    MessageRead {
        message_id: Uuid,
    },
    TypingIndicator {
        session_id: Uuid,
        is_typing: bool,
    },
    RequestChatHistory {
        session_id: Uuid,
    },
    CancelConnection {
        session_id: Uuid,
    },
    FinishService {
        session_id: Uuid,
        rating: Option<i32>,
        rating_text: Option<String>,
    },
    /// Provider's accept/reject decision on an assignment request (§4.2
    /// scenario 3). Not itemized in the HTTP/WS summary table but required
    /// by the concrete acceptance scenario.
    WorkResponse {
        work_id: Uuid,
        accepted: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Pong {
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    Error {
        error: String,
    },

    NearbyProviders {
        providers: Vec<Value>,
    },
    NewProviderAvailable {
        provider_id: Uuid,
        lat: f64,
        lng: f64,
        distance_km: f64,
    },
    ProviderWentOffline {
        provider_id: Uuid,
    },
    DistanceUpdated {
        provider_id: Uuid,
        distance_km: f64,
    },

    WorkAssigned {
        order_id: Uuid,
        seeker_id: Uuid,
        service_type: String,
        message: Option<String>,
        distance_km: Option<f64>,
    },
    WorkResponse {
        work_id: Uuid,
        accepted: bool,
        provider_id: Uuid,
    },
    WorkAccepted {
        order_id: Uuid,
        session_id: Uuid,
    },

    DistanceUpdate {
        session_id: Uuid,
        distance_m: f64,
        distance_text: String,
    },
    ProviderMediumsShared {
        session_id: Uuid,
        mediums: Value,
    },
    ChatReady {
        chat_room_id: Uuid,
    },
    ChatMessage {
        session_id: Uuid,
        message_id: Uuid,
        sender_role: crate::models::Role,
        text: String,
        created_at: chrono::DateTime<chrono::Utc>,
    },
    MessageSent {
        message_id: Uuid,
    },
    MessageStatusUpdate {
        message_id: Uuid,
        status: crate::models::MessageStatus,
    },
    ChatHistoryLoaded {
        session_id: Uuid,
        messages: Vec<Value>,
    },
    ConnectionCancelled {
        session_id: Uuid,
        cancelled_by: Uuid,
    },
    ServiceFinished {
        session_id: Uuid,
    },
    UserPresence {
        user_id: Uuid,
        active: bool,
    },
}

impl OutboundFrame {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"type\":\"error\"}".to_string())
    }
}

pub fn parse_inbound(text: &str) -> Result<InboundFrame, String> {
    serde_json::from_str(text).map_err(|e| format!("unrecognized frame: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_parses_with_bare_type_tag() {
        let frame = parse_inbound(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(frame, InboundFrame::Ping));
    }

    #[test]
    fn unknown_type_is_rejected_not_panicking() {
        let err = parse_inbound(r#"{"type":"not_a_real_type"}"#).unwrap_err();
        assert!(err.contains("unrecognized frame"));
    }

    #[test]
    fn location_update_round_trips_fields() {
        let session_id = Uuid::new_v4();
        let text = format!(
            r#"{{"type":"location_update","session_id":"{session_id}","lat":11.25,"lng":75.85}}"#
        );
        let frame = parse_inbound(&text).unwrap();
        match frame {
            InboundFrame::LocationUpdate { session_id: s, lat, lng } => {
                assert_eq!(s, session_id);
                assert_eq!(lat, 11.25);
                assert_eq!(lng, 75.85);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn outbound_frame_serializes_with_type_tag() {
        let frame = OutboundFrame::Pong {
            timestamp: chrono::Utc::now(),
        };
        let json = frame.to_json();
        assert!(json.contains("\"type\":\"pong\""));
    }
}
