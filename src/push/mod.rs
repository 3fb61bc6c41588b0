//! Push Dispatcher (spec component D): best-effort delivery of typed
//! notifications to a user's registered mobile-push token, with durable
//! audit via [`NotificationLog`] and automatic token invalidation on
//! permanent failures.
//!
//! The dispatcher is a constructed value owned by [`crate::state::AppState`]
//! (never a global), per §9's "global singletons" design note.

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{NotificationKind, NotificationStatus, Transport};

const SEND_TIMEOUT_SECS: u64 = 5;

/// Outcome of a single dispatch attempt, mirroring the `{fcm_sent, ws_sent}`
/// shape the Work Order Service surfaces on `Assign` (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub sent: bool,
}

pub struct PushDispatcher {
    client: reqwest::Client,
    /// External push endpoint (e.g. an FCM-compatible HTTP gateway). `None`
    /// in environments without push credentials configured, in which case
    /// dispatch is a logged no-op and the websocket remains the primary
    /// transport, as §4.5 anticipates.
    endpoint: Option<String>,
}

impl PushDispatcher {
    pub fn new(client: reqwest::Client, endpoint: Option<String>) -> Self {
        Self { client, endpoint }
    }

    /// Sends `kind` to `recipient_id` and records the attempt in
    /// `NotificationLog`, never propagating transport failures to the
    /// caller: push is best-effort (§4.5's failure taxonomy).
    pub async fn dispatch(
        &self,
        pool: &PgPool,
        recipient_id: Uuid,
        work_order_id: Option<Uuid>,
        kind: NotificationKind,
        payload: Value,
    ) -> AppResult<DispatchOutcome> {
        let row: Option<Option<String>> =
            sqlx::query_scalar("SELECT fcm_token FROM users WHERE id = $1")
                .bind(recipient_id)
                .fetch_optional(pool)
                .await?;
        let token = row.flatten();

        let Some(token) = token else {
            self.log(pool, work_order_id, recipient_id, kind, NotificationStatus::Failed, None, Some("no registered push token".into())).await?;
            return Ok(DispatchOutcome { sent: false });
        };

        let Some(endpoint) = &self.endpoint else {
            tracing::debug!("push dispatcher has no endpoint configured, skipping send");
            self.log(pool, work_order_id, recipient_id, kind, NotificationStatus::Pending, None, None).await?;
            return Ok(DispatchOutcome { sent: false });
        };

        let body = serde_json::json!({
            "to": token,
            "priority": "high",
            "data": payload,
        });

        let result = self
            .client
            .post(endpoint)
            .timeout(std::time::Duration::from_secs(SEND_TIMEOUT_SECS))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                self.log(pool, work_order_id, recipient_id, kind, NotificationStatus::Sent, None, None)
                    .await?;
                Ok(DispatchOutcome { sent: true })
            }
            Ok(resp) if resp.status().as_u16() == 410 || resp.status().as_u16() == 404 => {
                // Permanent failure: the token is no longer registered.
                sqlx::query("UPDATE users SET fcm_token = NULL WHERE id = $1")
                    .bind(recipient_id)
                    .execute(pool)
                    .await?;
                self.log(
                    pool,
                    work_order_id,
                    recipient_id,
                    kind,
                    NotificationStatus::Failed,
                    None,
                    Some(format!("token invalidated (status {})", resp.status())),
                )
                .await?;
                Ok(DispatchOutcome { sent: false })
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "push dispatch returned non-success, treating as transient");
                self.log(
                    pool,
                    work_order_id,
                    recipient_id,
                    kind,
                    NotificationStatus::Failed,
                    None,
                    Some(format!("transient error: status {}", resp.status())),
                )
                .await?;
                Ok(DispatchOutcome { sent: false })
            }
            Err(e) => {
                tracing::warn!(error = ?e, "push dispatch request failed, treating as transient");
                self.log(
                    pool,
                    work_order_id,
                    recipient_id,
                    kind,
                    NotificationStatus::Failed,
                    None,
                    Some(format!("transient error: {e}")),
                )
                .await?;
                Ok(DispatchOutcome { sent: false })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn log(
        &self,
        pool: &PgPool,
        work_order_id: Option<Uuid>,
        recipient_id: Uuid,
        kind: NotificationKind,
        status: NotificationStatus,
        external_id: Option<String>,
        error: Option<String>,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO notification_log
                (id, work_order_id, recipient_id, kind, transport, status, external_id, error, sent_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())",
        )
        .bind(Uuid::new_v4())
        .bind(work_order_id)
        .bind(recipient_id)
        .bind(kind)
        .bind(Transport::Push)
        .bind(status)
        .bind(external_id)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Records a websocket-transport delivery attempt, for the audit trail
    /// required alongside push in `NotificationLog` (§3).
    pub async fn log_websocket(
        &self,
        pool: &PgPool,
        work_order_id: Option<Uuid>,
        recipient_id: Uuid,
        kind: NotificationKind,
        delivered: bool,
    ) -> AppResult<()> {
        self.log(
            pool,
            work_order_id,
            recipient_id,
            kind,
            if delivered {
                NotificationStatus::Sent
            } else {
                NotificationStatus::Failed
            },
            None,
            None,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_outcome_distinguishes_sent_from_skipped() {
        assert_ne!(
            DispatchOutcome { sent: true },
            DispatchOutcome { sent: false }
        );
    }
}
