use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// User
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Seeker,
    Provider,
    Admin,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub mobile: String,
    pub role: UserRole,
    pub verified: bool,
    pub fcm_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// ProviderPresence
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProviderPresence {
    pub user_id: Uuid,
    pub active: bool,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub main_cat_code: Option<String>,
    pub sub_cat_code: Option<String>,
    pub last_active_at: Option<DateTime<Utc>>,
}

// ============================================================================
// SeekerSearch
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SeekerSearch {
    pub user_id: Uuid,
    pub searching: bool,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub cat_code: Option<String>,
    pub sub_cat_code: Option<String>,
    pub radius_km: Option<f64>,
    pub last_search_at: Option<DateTime<Utc>>,
}

// ============================================================================
// WorkOrder
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WorkOrderStatus {
    Pending,
    Accepted,
    Rejected,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WorkOrder {
    pub id: Uuid,
    pub seeker_id: Uuid,
    pub provider_id: Uuid,
    pub service_type: String,
    pub main_cat_code: String,
    pub sub_cat_code: String,
    pub message: Option<String>,
    pub schedule: Option<Value>,
    pub seeker_lat: f64,
    pub seeker_lng: f64,
    pub provider_lat: Option<f64>,
    pub provider_lng: Option<f64>,
    pub calculated_distance_km: Option<f64>,
    pub status: WorkOrderStatus,
    pub fcm_sent: bool,
    pub websocket_sent: bool,
    pub created_at: DateTime<Utc>,
    pub response_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
}

// ============================================================================
// WorkSession
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Waiting,
    Active,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Seeker,
    Provider,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::Seeker => Role::Provider,
            Role::Provider => Role::Seeker,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WorkSession {
    pub id: Uuid,
    pub work_order_id: Uuid,
    pub seeker_id: Uuid,
    pub provider_id: Uuid,
    pub state: SessionState,
    pub provider_lat: Option<f64>,
    pub provider_lng: Option<f64>,
    pub provider_loc_at: Option<DateTime<Utc>>,
    pub seeker_lat: Option<f64>,
    pub seeker_lng: Option<f64>,
    pub seeker_loc_at: Option<DateTime<Utc>>,
    pub current_distance_m: Option<f64>,
    pub last_distance_at: Option<DateTime<Utc>>,
    pub seeker_mediums: Value,
    pub provider_mediums: Value,
    pub mediums_shared_at: Option<DateTime<Utc>>,
    pub chat_started_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rating: Option<i32>,
    pub rating_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkSession {
    /// `chat_room_id` is defined to equal the session id.
    pub fn chat_room_id(&self) -> Uuid {
        self.id
    }

    pub fn terminal_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at.or(self.completed_at)
    }

    pub fn user_id_for(&self, role: Role) -> Uuid {
        match role {
            Role::Seeker => self.seeker_id,
            Role::Provider => self.provider_id,
        }
    }

    pub fn role_of(&self, user_id: Uuid) -> Option<Role> {
        if user_id == self.seeker_id {
            Some(Role::Seeker)
        } else if user_id == self.provider_id {
            Some(Role::Provider)
        } else {
            None
        }
    }
}

// ============================================================================
// ChatMessage
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: Role,
    pub text: String,
    pub status: MessageStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

// ============================================================================
// TypingFlag
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TypingFlag {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub is_typing: bool,
    pub last_typing_at: DateTime<Utc>,
}

// ============================================================================
// NotificationLog
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    WorkAssigned,
    WorkAccepted,
    WorkRejected,
    ChatMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Push,
    Ws,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct NotificationLog {
    pub id: Uuid,
    pub work_order_id: Option<Uuid>,
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub transport: Transport,
    pub status: NotificationStatus,
    pub external_id: Option<String>,
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_other_is_involution() {
        assert_eq!(Role::Seeker.other(), Role::Provider);
        assert_eq!(Role::Provider.other(), Role::Seeker);
        assert_eq!(Role::Seeker.other().other(), Role::Seeker);
    }

    #[test]
    fn chat_room_id_equals_session_id() {
        let session = sample_session();
        assert_eq!(session.chat_room_id(), session.id);
    }

    #[test]
    fn terminal_at_prefers_cancelled_over_completed() {
        let mut session = sample_session();
        session.cancelled_at = Some(Utc::now());
        session.completed_at = Some(Utc::now());
        assert_eq!(session.terminal_at(), session.cancelled_at);
    }

    #[test]
    fn role_of_matches_party_ids() {
        let session = sample_session();
        assert_eq!(session.role_of(session.seeker_id), Some(Role::Seeker));
        assert_eq!(session.role_of(session.provider_id), Some(Role::Provider));
        assert_eq!(session.role_of(Uuid::new_v4()), None);
    }

    fn sample_session() -> WorkSession {
        WorkSession {
            id: Uuid::new_v4(),
            work_order_id: Uuid::new_v4(),
            seeker_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            state: SessionState::Waiting,
            provider_lat: None,
            provider_lng: None,
            provider_loc_at: None,
            seeker_lat: None,
            seeker_lng: None,
            seeker_loc_at: None,
            current_distance_m: None,
            last_distance_at: None,
            seeker_mediums: Value::Null,
            provider_mediums: Value::Null,
            mediums_shared_at: None,
            chat_started_at: None,
            cancelled_by: None,
            cancelled_at: None,
            completed_at: None,
            rating: None,
            rating_text: None,
            created_at: Utc::now(),
        }
    }
}
