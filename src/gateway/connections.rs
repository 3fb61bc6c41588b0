//! Event Bus (spec component C): typed pub/sub addressed by logical group
//! (`user:{id}:{role}`), generalizing the teacher's single-recipient
//! connection registry to group fan-out with two frame classes and the
//! backpressure policy §5 requires. Session-scoped frames are addressed to
//! both parties' user groups via [`ConnectionManager::broadcast_to_groups`].

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tokio::sync::mpsc;
use uuid::Uuid;

/// Outbound channel buffer depth. Small and finite on purpose: §5's
/// backpressure policy only has teeth if the buffer can actually fill.
const CHANNEL_CAPACITY: usize = 64;

pub type ConnId = Uuid;

#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Frame(String),
    Close(u16),
}

/// Lossy frames (`distance_update`, `typing_indicator`) are dropped on a full
/// buffer. Lossless frames close the connection instead, so the client
/// reconnects and recovers state via `History` / dashboard reads (§5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    Lossy,
    Lossless,
}

pub fn group_for_user(user_id: Uuid, role: crate::models::Role) -> String {
    let role = match role {
        crate::models::Role::Seeker => "seeker",
        crate::models::Role::Provider => "provider",
    };
    format!("user:{user_id}:{role}")
}

#[derive(Default)]
pub struct ConnectionManager {
    senders: RwLock<HashMap<ConnId, mpsc::Sender<OutboundMessage>>>,
    groups: RwLock<HashMap<String, HashSet<ConnId>>>,
    memberships: RwLock<HashMap<ConnId, HashSet<String>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection and returns its id plus the receiver half
    /// the caller's send task should drain.
    pub fn register(&self) -> (ConnId, mpsc::Receiver<OutboundMessage>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.senders.write().unwrap().insert(conn_id, tx);
        (conn_id, rx)
    }

    pub fn join(&self, conn_id: ConnId, group: impl Into<String>) {
        let group = group.into();
        self.groups
            .write()
            .unwrap()
            .entry(group.clone())
            .or_default()
            .insert(conn_id);
        self.memberships
            .write()
            .unwrap()
            .entry(conn_id)
            .or_default()
            .insert(group);
    }

    pub fn leave(&self, conn_id: ConnId, group: &str) {
        if let Some(members) = self.groups.write().unwrap().get_mut(group) {
            members.remove(&conn_id);
        }
        if let Some(groups) = self.memberships.write().unwrap().get_mut(&conn_id) {
            groups.remove(group);
        }
    }

    /// Tears down a connection entirely: removes its sender and every group
    /// membership. Called from the gateway on socket close (§4.6).
    pub fn deregister(&self, conn_id: ConnId) {
        self.senders.write().unwrap().remove(&conn_id);
        if let Some(groups) = self.memberships.write().unwrap().remove(&conn_id) {
            let mut all_groups = self.groups.write().unwrap();
            for group in groups {
                if let Some(members) = all_groups.get_mut(&group) {
                    members.remove(&conn_id);
                }
            }
        }
    }

    /// Sends to a single connection. Returns `false` if the send could not
    /// be enqueued (buffer full or connection gone); lossless callers should
    /// treat `false` as "close this connection".
    pub fn send_to_conn(&self, conn_id: ConnId, message: OutboundMessage, class: FrameClass) -> bool {
        let sender = {
            let guard = self.senders.read().unwrap();
            guard.get(&conn_id).cloned()
        };
        let Some(sender) = sender else { return false };
        match sender.try_send(message) {
            Ok(()) => true,
            Err(_) if class == FrameClass::Lossy => {
                tracing::debug!(%conn_id, "dropped lossy frame on full buffer");
                true
            }
            Err(_) => false,
        }
    }

    /// Broadcasts a frame to every connection in `group`. Returns the ids of
    /// connections whose lossless send failed; the caller is expected to
    /// close those sockets.
    pub fn broadcast_to_group(
        &self,
        group: &str,
        frame_json: &str,
        class: FrameClass,
    ) -> Vec<ConnId> {
        let members: Vec<ConnId> = self
            .groups
            .read()
            .unwrap()
            .get(group)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();

        let mut failed = Vec::new();
        for conn_id in members {
            if !self.send_to_conn(conn_id, OutboundMessage::Frame(frame_json.to_string()), class) {
                failed.push(conn_id);
            }
        }
        failed
    }

    /// Broadcasts to the union of several groups, each connection receiving
    /// the frame at most once even if it belongs to more than one group.
    pub fn broadcast_to_groups(
        &self,
        groups: &[String],
        frame_json: &str,
        class: FrameClass,
    ) -> Vec<ConnId> {
        let mut seen = HashSet::new();
        {
            let guard = self.groups.read().unwrap();
            for group in groups {
                if let Some(members) = guard.get(group) {
                    seen.extend(members.iter().copied());
                }
            }
        }
        let mut failed = Vec::new();
        for conn_id in seen {
            if !self.send_to_conn(conn_id, OutboundMessage::Frame(frame_json.to_string()), class) {
                failed.push(conn_id);
            }
        }
        failed
    }

    pub fn close(&self, conn_id: ConnId, code: u16) {
        let sender = {
            let guard = self.senders.read().unwrap();
            guard.get(&conn_id).cloned()
        };
        if let Some(sender) = sender {
            let _ = sender.try_send(OutboundMessage::Close(code));
        }
    }

    pub fn is_connected(&self, conn_id: ConnId) -> bool {
        self.senders.read().unwrap().contains_key(&conn_id)
    }

    pub fn members_of(&self, group: &str) -> Vec<ConnId> {
        self.groups
            .read()
            .unwrap()
            .get(group)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn group_size(&self, group: &str) -> usize {
        self.groups
            .read()
            .unwrap()
            .get(group)
            .map(HashSet::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn group_naming_matches_spec_convention() {
        let uid = Uuid::new_v4();
        assert_eq!(group_for_user(uid, Role::Seeker), format!("user:{uid}:seeker"));
        assert_eq!(group_for_user(uid, Role::Provider), format!("user:{uid}:provider"));
    }

    #[tokio::test]
    async fn register_join_and_broadcast_delivers_frame() {
        let manager = ConnectionManager::new();
        let (conn_id, mut rx) = manager.register();
        manager.join(conn_id, "session:abc");

        let failed = manager.broadcast_to_group("session:abc", "{\"type\":\"ping\"}", FrameClass::Lossless);
        assert!(failed.is_empty());

        let msg = rx.recv().await.unwrap();
        match msg {
            OutboundMessage::Frame(s) => assert_eq!(s, "{\"type\":\"ping\"}"),
            OutboundMessage::Close(_) => panic!("expected frame"),
        }
    }

    #[tokio::test]
    async fn deregister_removes_from_all_groups() {
        let manager = ConnectionManager::new();
        let (conn_id, _rx) = manager.register();
        manager.join(conn_id, "session:abc");
        manager.join(conn_id, "user:1:seeker");

        manager.deregister(conn_id);

        assert_eq!(manager.group_size("session:abc"), 0);
        assert_eq!(manager.group_size("user:1:seeker"), 0);
        assert!(!manager.is_connected(conn_id));
    }

    #[tokio::test]
    async fn broadcast_to_groups_dedupes_shared_membership() {
        let manager = ConnectionManager::new();
        let (conn_id, mut rx) = manager.register();
        manager.join(conn_id, "session:abc");
        manager.join(conn_id, "user:1:seeker");

        manager.broadcast_to_groups(
            &["session:abc".into(), "user:1:seeker".into()],
            "{\"type\":\"ping\"}",
            FrameClass::Lossless,
        );

        // Only one frame should have been enqueued despite dual membership.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn lossy_send_on_full_buffer_is_dropped_not_failed() {
        let manager = ConnectionManager::new();
        let (conn_id, mut rx) = manager.register();
        manager.join(conn_id, "g");

        for _ in 0..CHANNEL_CAPACITY {
            manager.broadcast_to_group("g", "{}", FrameClass::Lossy);
        }
        // Buffer is now full; one more lossy send should be silently dropped.
        let failed = manager.broadcast_to_group("g", "{}", FrameClass::Lossy);
        assert!(failed.is_empty());

        drop(rx.recv().await);
    }

    #[tokio::test]
    async fn lossless_send_on_full_buffer_reports_failure() {
        let manager = ConnectionManager::new();
        let (conn_id, _rx_not_drained) = manager.register();
        manager.join(conn_id, "g");

        for _ in 0..CHANNEL_CAPACITY {
            manager.broadcast_to_group("g", "{}", FrameClass::Lossless);
        }
        let failed = manager.broadcast_to_group("g", "{}", FrameClass::Lossless);
        assert_eq!(failed, vec![conn_id]);
    }
}
