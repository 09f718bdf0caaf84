//! Push Bridge
//!
//! Thin collaborator that forwards call invitations to a mobile push
//! delivery endpoint. It consumes a structured call-invite record and
//! returns a delivery outcome; it holds no signaling or allocation state.

mod sender;

use async_trait::async_trait;
use icebridge_types::{CallInvite, DeliveryReceipt};
use thiserror::Error;

pub use sender::{HttpInviteSender, RecordingInviteSender};

/// Push bridge error
#[derive(Debug, Error)]
pub enum PushError {
    /// Delivery endpoint unreachable or returned a failure status
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// No delivery endpoint configured
    #[error("push delivery is not configured")]
    NotConfigured,
}

/// Seam for call-invite delivery
#[async_trait]
pub trait InviteSender: Send + Sync {
    /// Forward one call invite; the receipt reports delivery success
    async fn send_invite(&self, invite: &CallInvite) -> Result<DeliveryReceipt, PushError>;
}
