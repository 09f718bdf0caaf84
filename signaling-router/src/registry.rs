//! Session and room registry
//!
//! One registry instance is constructed at startup and shared by every
//! connection task. Rooms are created on first join and destroyed when
//! empty. Fan-out works on membership snapshots so no lock is held while
//! messages are delivered.

use crate::error::{RouterError, RouterResult};
use icebridge_types::ServerMessage;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

struct SessionEntry {
    room: Option<String>,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

/// Shared session/room tables
#[derive(Default)]
pub struct Registry {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    rooms: RwLock<HashMap<String, HashSet<Uuid>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session with its ordered outbound channel
    pub async fn register(&self, id: Uuid, tx: mpsc::UnboundedSender<ServerMessage>) {
        self.sessions
            .write()
            .await
            .insert(id, SessionEntry { room: None, tx });
    }

    /// Add the session to a room, creating it on first join.
    ///
    /// Returns the other members at join time. A session already in a
    /// different room is moved.
    pub async fn join_room(&self, id: Uuid, room_id: &str) -> RouterResult<Vec<Uuid>> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&id)
            .ok_or_else(|| RouterError::Routing(format!("unknown session {}", id)))?;

        let mut rooms = self.rooms.write().await;
        if let Some(previous) = entry.room.take() {
            if let Some(members) = rooms.get_mut(&previous) {
                members.remove(&id);
                if members.is_empty() {
                    rooms.remove(&previous);
                }
            }
        }

        let members = rooms.entry(room_id.to_string()).or_default();
        let others: Vec<Uuid> = members.iter().copied().collect();
        members.insert(id);
        entry.room = Some(room_id.to_string());
        Ok(others)
    }

    /// Remove the session from its room; the room is destroyed when empty.
    ///
    /// Returns the room id and the remaining members.
    pub async fn leave_room(&self, id: Uuid) -> Option<(String, Vec<Uuid>)> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id)?;
        let room_id = entry.room.take()?;

        let mut rooms = self.rooms.write().await;
        let remaining = match rooms.get_mut(&room_id) {
            Some(members) => {
                members.remove(&id);
                let remaining: Vec<Uuid> = members.iter().copied().collect();
                if members.is_empty() {
                    rooms.remove(&room_id);
                }
                remaining
            }
            None => Vec::new(),
        };
        Some((room_id, remaining))
    }

    /// Drop the session entirely; used on disconnect
    pub async fn remove(&self, id: Uuid) -> Option<(String, Vec<Uuid>)> {
        let left = self.leave_room(id).await;
        self.sessions.write().await.remove(&id);
        left
    }

    /// Deliver a message to one session; delivery per session is in
    /// sender order
    pub async fn send_to(&self, target: Uuid, msg: ServerMessage) -> bool {
        match self.sessions.read().await.get(&target) {
            Some(entry) => entry.tx.send(msg).is_ok(),
            None => false,
        }
    }

    /// Relay a message from one room member to another.
    ///
    /// Fails with a routing error when the target does not exist, is not
    /// in a room, or is in a different room than the sender.
    pub async fn relay(&self, from: Uuid, target: Uuid, msg: ServerMessage) -> RouterResult<()> {
        let sessions = self.sessions.read().await;
        let sender_room = sessions
            .get(&from)
            .and_then(|entry| entry.room.clone())
            .ok_or_else(|| RouterError::Routing("sender is not in a room".to_string()))?;
        let target_entry = sessions
            .get(&target)
            .ok_or_else(|| RouterError::Routing(format!("unknown target {}", target)))?;
        if target_entry.room.as_deref() != Some(sender_room.as_str()) {
            return Err(RouterError::Routing(format!(
                "target {} is not in room {}",
                target, sender_room
            )));
        }
        target_entry
            .tx
            .send(msg)
            .map_err(|_| RouterError::Routing(format!("target {} is gone", target)))?;
        Ok(())
    }

    pub async fn room_of(&self, id: Uuid) -> Option<String> {
        self.sessions.read().await.get(&id)?.room.clone()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn session(registry: &Registry) -> (Uuid, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(id, tx).await;
        (id, rx)
    }

    #[tokio::test]
    async fn test_room_created_and_destroyed() {
        let registry = Registry::new();
        let (a, _rx_a) = session(&registry).await;
        let (b, _rx_b) = session(&registry).await;

        assert!(registry.join_room(a, "abc").await.unwrap().is_empty());
        let others = registry.join_room(b, "abc").await.unwrap();
        assert_eq!(others, vec![a]);
        assert_eq!(registry.room_count().await, 1);

        registry.leave_room(a).await.unwrap();
        assert_eq!(registry.room_count().await, 1);
        let (room, remaining) = registry.leave_room(b).await.unwrap();
        assert_eq!(room, "abc");
        assert!(remaining.is_empty());
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_relay_requires_same_room() {
        let registry = Registry::new();
        let (a, _rx_a) = session(&registry).await;
        let (b, mut rx_b) = session(&registry).await;
        let (c, _rx_c) = session(&registry).await;

        registry.join_room(a, "abc").await.unwrap();
        registry.join_room(b, "abc").await.unwrap();
        registry.join_room(c, "other").await.unwrap();

        registry
            .relay(a, b, ServerMessage::Bye { from: a })
            .await
            .unwrap();
        assert_eq!(rx_b.recv().await, Some(ServerMessage::Bye { from: a }));

        // cross-room target is a routing error
        let err = registry
            .relay(a, c, ServerMessage::Bye { from: a })
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Routing(_)));

        // unknown target is a routing error
        let err = registry
            .relay(a, Uuid::new_v4(), ServerMessage::Bye { from: a })
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Routing(_)));
    }

    #[tokio::test]
    async fn test_delivery_preserves_sender_order() {
        let registry = Registry::new();
        let (a, _rx_a) = session(&registry).await;
        let (b, mut rx_b) = session(&registry).await;
        registry.join_room(a, "abc").await.unwrap();
        registry.join_room(b, "abc").await.unwrap();

        for i in 0..10u8 {
            let payload = serde_json::json!({ "seq": i });
            registry
                .relay(a, b, ServerMessage::Candidate { from: a, payload })
                .await
                .unwrap();
        }
        for i in 0..10u8 {
            match rx_b.recv().await {
                Some(ServerMessage::Candidate { payload, .. }) => {
                    assert_eq!(payload["seq"], i)
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_remove_cleans_up_membership() {
        let registry = Registry::new();
        let (a, _rx_a) = session(&registry).await;
        registry.join_room(a, "abc").await.unwrap();

        let (room, remaining) = registry.remove(a).await.unwrap();
        assert_eq!(room, "abc");
        assert!(remaining.is_empty());
        assert_eq!(registry.session_count().await, 0);
        assert_eq!(registry.room_count().await, 0);
    }
}
