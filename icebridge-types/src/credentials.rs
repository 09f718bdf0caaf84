//! Relay credential response shape
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


use serde::{Deserialize, Serialize};

/// Time-limited STUN/TURN credentials handed to a signaling client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceCredentials {
    /// Username encoding issuance time and the signaling identity
    pub username: String,
    /// Shared secret derived from the username
    pub password: String,
    /// Remaining validity window in seconds
    pub ttl_seconds: u64,
    /// stun:/turn: URIs of the relay server
    pub uris: Vec<String>,
}
