//! Chat Substream (spec component G): durable, ordered, two-party messaging
//! within an active session, with delivery/read receipts, typing
//! indicators, and bounded retention.
//!
//! Anonymity (§11): the gateway only ever exposes a counterparty's
//! `sender_role` (`seeker`/`provider`), never their raw user id, in chat
//! frames.

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::gateway::connections::{group_for_user, ConnectionManager, FrameClass};
use crate::gateway::frames::OutboundFrame;
use crate::models::{ChatMessage, MessageStatus, NotificationKind, Role, SessionState};
use crate::push::PushDispatcher;
use crate::repo;

pub struct ChatSubstream {
    pool: PgPool,
    connections: Arc<ConnectionManager>,
    push: Arc<PushDispatcher>,
}

impl ChatSubstream {
    pub fn new(pool: PgPool, connections: Arc<ConnectionManager>, push: Arc<PushDispatcher>) -> Self {
        Self {
            pool,
            connections,
            push,
        }
    }

    /// Fans a session-scoped frame out to both parties' user groups: a
    /// connection only ever joins `user:{id}:{role}` on connect, never a
    /// per-session group.
    fn broadcast(&self, session: &crate::models::WorkSession, frame: &OutboundFrame, class: FrameClass) {
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

    /// `Send` (§4.4). Requires the session to be `active`; persists with
    /// `status=sent`, fans out to both parties, and enqueues a push
    /// notification to the counterparty.
    pub async fn send(
        &self,
        session_id: Uuid,
        sender_id: Uuid,
        text: String,
    ) -> AppResult<ChatMessage> {
        if text.trim().is_empty() {
            return Err(AppError::Validation("message text must not be empty".into()));
        }

        let session = repo::fetch_session(&self.pool, session_id).await?;
        let sender_role = repo::require_session_party(&session, sender_id)?;
        if session.state != SessionState::Active {
            return Err(AppError::InvalidState(
                "chat is only available once the session is active".into(),
            ));
        }

        let message_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO chat_messages (id, session_id, sender_id, sender_role, text, status, created_at)
             VALUES ($1, $2, $3, $4, $5, 'sent', now())",
        )
        .bind(message_id)
        .bind(session_id)
        .bind(sender_id)
        .bind(sender_role)
        .bind(&text)
        .execute(&self.pool)
        .await?;

        let message = sqlx::query_as::<_, ChatMessage>(
            "SELECT id, session_id, sender_id, sender_role, text, status,
                    delivered_at, read_at, created_at, expires_at
             FROM chat_messages WHERE id = $1",
        )
        .bind(message_id)
        .fetch_one(&self.pool)
        .await?;

        let frame = OutboundFrame::ChatMessage {
            session_id,
            message_id,
            sender_role,
            text: message.text.clone(),
            created_at: message.created_at,
        };
        self.broadcast(&session, &frame, FrameClass::Lossless);

        let sent_frame = OutboundFrame::MessageSent { message_id };
        let sender_group = group_for_user(sender_id, sender_role);
        let sent_json = sent_frame.to_json();
        for conn_id in self.connections.broadcast_to_group(&sender_group, &sent_json, FrameClass::Lossless) {
            self.connections.close(conn_id, 4000);
        }

        let recipient_id = session.user_id_for(sender_role.other());
        let preview: String = text.chars().take(80).collect();
        let _ = self
            .push
            .dispatch(
                &self.pool,
                recipient_id,
                Some(session.work_order_id),
                NotificationKind::ChatMessage,
                serde_json::json!({
                    "session_id": session_id,
                    "message_id": message_id,
                    "preview": preview,
                }),
            )
            .await;

        Ok(message)
    }

    /// `Ack` (§4.4). Sets `status` to the higher of current and `kind`
    /// (`sent < delivered < read`); `delivered` after `read` is a no-op.
    pub async fn ack(&self, message_id: Uuid, acker_id: Uuid, kind: MessageStatus) -> AppResult<()> {
        let message = sqlx::query_as::<_, ChatMessage>(
            "SELECT id, session_id, sender_id, sender_role, text, status,
                    delivered_at, read_at, created_at, expires_at
             FROM chat_messages WHERE id = $1",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("message not found".into()))?;

        let session = repo::fetch_session(&self.pool, message.session_id).await?;
        let acker_role = repo::require_session_party(&session, acker_id)?;
        if acker_role == message.sender_role {
            return Err(AppError::Forbidden("only the recipient may acknowledge a message".into()));
        }

        if rank(kind) <= rank(message.status) {
            return Ok(());
        }

        match kind {
            MessageStatus::Delivered => {
                sqlx::query(
                    "UPDATE chat_messages SET status = 'delivered', delivered_at = now() WHERE id = $1",
                )
                .bind(message_id)
                .execute(&self.pool)
                .await?;
            }
            MessageStatus::Read => {
                sqlx::query(
                    "UPDATE chat_messages SET status = 'read', read_at = now() WHERE id = $1",
                )
                .bind(message_id)
                .execute(&self.pool)
                .await?;
            }
            MessageStatus::Sent => {}
        }

        let frame = OutboundFrame::MessageStatusUpdate {
            message_id,
            status: kind,
        };
        let sender_group = group_for_user(message.sender_id, message.sender_role);
        let json = frame.to_json();
        for conn_id in self.connections.broadcast_to_group(&sender_group, &json, FrameClass::Lossless) {
            self.connections.close(conn_id, 4000);
        }

        Ok(())
    }

    /// `Typing` (§4.4). Idempotent upsert, emitted only to the counterparty.
    pub async fn typing(&self, session_id: Uuid, user_id: Uuid, is_typing: bool) -> AppResult<()> {
        let session = repo::fetch_session(&self.pool, session_id).await?;
        let role = repo::require_session_party(&session, user_id)?;

        sqlx::query(
            "INSERT INTO typing_flags (session_id, user_id, role, is_typing, last_typing_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (session_id, user_id) DO UPDATE SET
                is_typing = EXCLUDED.is_typing, last_typing_at = now()",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(role)
        .bind(is_typing)
        .execute(&self.pool)
        .await?;

        let frame = serde_json::json!({
            "type": "typing_indicator",
            "session_id": session_id,
            "is_typing": is_typing,
        });
        let counterparty_group = group_for_user(session.user_id_for(role.other()), role.other());
        self.connections.broadcast_to_group(
            &counterparty_group,
            &frame.to_string(),
            FrameClass::Lossy,
        );
        Ok(())
    }

    /// `History` (§4.4). Returned only to a party of a session currently
    /// `active`, ordered by `created_at` with ties broken by `message_id`.
    pub async fn history(&self, session_id: Uuid, user_id: Uuid) -> AppResult<Vec<ChatMessage>> {
        let session = repo::fetch_session(&self.pool, session_id).await?;
        repo::require_session_party(&session, user_id)?;
        if session.state != SessionState::Active {
            return Err(AppError::InvalidState(
                "chat history is only available while the session is active".into(),
            ));
        }

        let messages = sqlx::query_as::<_, ChatMessage>(
            "SELECT id, session_id, sender_id, sender_role, text, status,
                    delivered_at, read_at, created_at, expires_at
             FROM chat_messages WHERE session_id = $1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    /// Deletes messages past their TTL. Intended to run on a fixed cadence
    /// from a background task owned by `main` (§4.4 retention, §11).
    pub async fn sweep_expired(&self) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM chat_messages WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn rank(status: MessageStatus) -> u8 {
    match status {
        MessageStatus::Sent => 0,
        MessageStatus::Delivered => 1,
        MessageStatus::Read => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_rank_orders_sent_delivered_read() {
        assert!(rank(MessageStatus::Sent) < rank(MessageStatus::Delivered));
        assert!(rank(MessageStatus::Delivered) < rank(MessageStatus::Read));
    }

    #[test]
    fn read_after_delivered_is_still_an_upgrade() {
        assert!(rank(MessageStatus::Read) > rank(MessageStatus::Delivered));
    }

    #[test]
    fn delivered_after_read_is_a_no_op_by_rank() {
        assert!(rank(MessageStatus::Delivered) <= rank(MessageStatus::Read));
    }
}
