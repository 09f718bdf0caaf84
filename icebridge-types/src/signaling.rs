//! Signaling message contract
//!
//! Typed messages exchanged over a signaling connection. Negotiation
//! payloads (SDP, ICE candidates) are opaque JSON values relayed verbatim.
// Copyright 2025 The Icebridge Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::credentials::IceCredentials;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Messages a client may send on its signaling connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Join (and create if absent) a named room
    #[serde(rename = "join-room")]
    JoinRoom { room_id: String },
    /// Leave the current room
    #[serde(rename = "leave-room")]
    LeaveRoom,
    /// Session description offer for a room member
    #[serde(rename = "offer")]
    Offer { target: Uuid, payload: Value },
    /// Session description answer for a room member
    #[serde(rename = "answer")]
    Answer { target: Uuid, payload: Value },
    /// ICE candidate for a room member
    #[serde(rename = "candidate")]
    Candidate { target: Uuid, payload: Value },
    /// Hang up on a room member
    #[serde(rename = "bye")]
    Bye { target: Uuid },
    /// Liveness probe
    #[serde(rename = "keepalive")]
    Keepalive,
}

/// Messages the router sends to a client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Room join acknowledgment carrying relay credentials
    #[serde(rename = "joined")]
    Joined {
        session_id: Uuid,
        room_id: String,
        credentials: IceCredentials,
    },
    /// Another session joined the room
    #[serde(rename = "peer-joined")]
    PeerJoined { session_id: Uuid },
    /// Another session left the room or disconnected
    #[serde(rename = "peer-left")]
    PeerLeft { session_id: Uuid },
    /// Relayed offer
    #[serde(rename = "offer")]
    Offer { from: Uuid, payload: Value },
    /// Relayed answer
    #[serde(rename = "answer")]
    Answer { from: Uuid, payload: Value },
    /// Relayed ICE candidate
    #[serde(rename = "candidate")]
    Candidate { from: Uuid, payload: Value },
    /// Relayed hang-up
    #[serde(rename = "bye")]
    Bye { from: Uuid },
    /// Keepalive echo
    #[serde(rename = "keepalive")]
    Keepalive,
    /// Request-scoped failure, reported to the sender only
    #[serde(rename = "error")]
    Error { reason: String },
}
