//! Error types for the STUN/TURN relay
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


use thiserror::Error;

/// STUN/TURN relay error
#[derive(Debug, Error)]
pub enum RelayError {
    /// Malformed or unparseable packet; dropped without a reply
    #[error("malformed packet: {0}")]
    Protocol(String),

    /// Missing, invalid or stale credential; answered with a challenge
    #[error("authentication failed ({code}): {reason}")]
    Auth { code: u16, reason: &'static str },

    /// Relay port pool exhausted; answered with 486
    #[error("relay port pool exhausted")]
    Resource,

    /// 5-tuple, channel or peer state mismatch; answered with 437/400
    #[error("request conflict ({code}): {reason}")]
    Conflict { code: u16, reason: &'static str },

    /// Socket failure; terminates only the affected allocation
    #[error("I/O error: {0}")]
    Transport(#[from] std::io::Error),
}

impl RelayError {
    /// Protocol error code to answer with, if this error is answerable
    pub fn response_code(&self) -> Option<(u16, &'static str)> {
        match self {
            RelayError::Auth { code, reason } => Some((*code, reason)),
            RelayError::Resource => Some((486, "Allocation Quota Reached")),
            RelayError::Conflict { code, reason } => Some((*code, reason)),
            RelayError::Protocol(_) | RelayError::Transport(_) => None,
        }
    }
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
