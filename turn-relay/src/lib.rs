//! Embedded STUN/TURN relay for NAT traversal
//!
//! Implements the server side of the STUN/TURN protocols: long-term
//! credential authentication, relay allocations with bounded lifetimes,
//! peer permissions, channel bindings, and datagram forwarding between a
//! client and its permitted peers.
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


pub mod allocation;
pub mod auth;
pub mod error;
pub mod relay;
pub mod stun;

pub use allocation::{Allocation, AllocationLimits, AllocationManager, FiveTuple, Transport};
pub use auth::{Authenticator, CredentialIssuer};
pub use error::{RelayError, RelayResult};
pub use relay::RelayServer;
