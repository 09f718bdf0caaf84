//! Signaling message dispatch
//!
//! Every client message kind is matched exhaustively; adding a message
//! kind forces a decision here. Negotiation messages are relayed verbatim
//! to their target; routing failures are reported to the sender only.

use crate::registry::Registry;
use icebridge_types::{ClientMessage, ServerMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use turn_relay::CredentialIssuer;
use uuid::Uuid;

/// Routes signaling messages between room members
pub struct Router {
    registry: Registry,
    issuer: Arc<CredentialIssuer>,
}

impl Router {
    pub fn new(issuer: Arc<CredentialIssuer>) -> Self {
        Router {
            registry: Registry::new(),
            issuer,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register a new signaling session
    pub async fn connect(&self, id: Uuid, tx: mpsc::UnboundedSender<ServerMessage>) {
        self.registry.register(id, tx).await;
    }

    /// Tear down a session: leave its room, notify the remaining members,
    /// destroy the room when it empties
    pub async fn disconnect(&self, id: Uuid) {
        if let Some((room_id, remaining)) = self.registry.remove(id).await {
            info!(session_id = %id, room_id, "session left room on disconnect");
            for member in remaining {
                self.registry
                    .send_to(member, ServerMessage::PeerLeft { session_id: id })
                    .await;
            }
        }
    }

    /// Report a request failure to one session only
    pub async fn reject(&self, id: Uuid, reason: String) {
        debug!(session_id = %id, reason, "rejecting message");
        self.registry
            .send_to(id, ServerMessage::Error { reason })
            .await;
    }

    /// Dispatch one client message
    pub async fn handle(&self, id: Uuid, msg: ClientMessage) {
        match msg {
            ClientMessage::JoinRoom { room_id } => self.handle_join(id, room_id).await,
            ClientMessage::LeaveRoom => self.handle_leave(id).await,
            ClientMessage::Offer { target, payload } => {
                self.relay(id, target, ServerMessage::Offer { from: id, payload })
                    .await
            }
            ClientMessage::Answer { target, payload } => {
                self.relay(id, target, ServerMessage::Answer { from: id, payload })
                    .await
            }
            ClientMessage::Candidate { target, payload } => {
                self.relay(id, target, ServerMessage::Candidate { from: id, payload })
                    .await
            }
            ClientMessage::Bye { target } => {
                self.relay(id, target, ServerMessage::Bye { from: id }).await
            }
            ClientMessage::Keepalive => {
                self.registry.send_to(id, ServerMessage::Keepalive).await;
            }
        }
    }

    async fn handle_join(&self, id: Uuid, room_id: String) {
        let others = match self.registry.join_room(id, &room_id).await {
            Ok(others) => others,
            Err(e) => {
                self.reject(id, e.to_string()).await;
                return;
            }
        };
        info!(session_id = %id, room_id, members = others.len() + 1, "session joined room");

        let credentials = self.issuer.issue(&id.to_string());
        self.registry
            .send_to(
                id,
                ServerMessage::Joined {
                    session_id: id,
                    room_id,
                    credentials,
                },
            )
            .await;
        for member in others {
            self.registry
                .send_to(member, ServerMessage::PeerJoined { session_id: id })
                .await;
        }
    }

    async fn handle_leave(&self, id: Uuid) {
        if let Some((room_id, remaining)) = self.registry.leave_room(id).await {
            info!(session_id = %id, room_id, "session left room");
            for member in remaining {
                self.registry
                    .send_to(member, ServerMessage::PeerLeft { session_id: id })
                    .await;
            }
        }
    }

    async fn relay(&self, from: Uuid, target: Uuid, msg: ServerMessage) {
        if let Err(e) = self.registry.relay(from, target, msg).await {
            self.reject(from, e.to_string()).await;
        }
    }
}
