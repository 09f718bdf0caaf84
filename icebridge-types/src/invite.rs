//! Call-invite record consumed by the push bridge
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
use uuid::Uuid;

/// A call invitation to forward to a mobile push service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallInvite {
    /// Caller identity (phone number or account id)
    pub caller_id: String,
    /// Display name of the caller
    pub caller_name: String,
    /// Push token of the callee's device
    pub target_token: String,
    /// Room the callee should join to answer
    pub room_id: String,
    /// Unique call identifier
    pub call_id: Uuid,
    /// Whether the call carries video
    #[serde(default)]
    pub has_video: bool,
}

/// Delivery result returned by the push bridge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DeliveryReceipt {
    pub fn delivered() -> Self {
        Self {
            delivered: true,
            detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            delivered: false,
            detail: Some(detail.into()),
        }
    }
}
