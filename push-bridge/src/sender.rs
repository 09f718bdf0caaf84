//! Invite senders
//!
//! HTTP delivery toward a push gateway, plus a recording sender for tests.

use crate::{InviteSender, PushError};
use async_trait::async_trait;
use icebridge_types::{CallInvite, DeliveryReceipt};
use std::sync::Mutex;
use tracing::{info, warn};

/// Forwards invites to an HTTP push gateway
pub struct HttpInviteSender {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpInviteSender {
    pub fn new(endpoint: impl Into<String>) -> Self {
        HttpInviteSender {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl InviteSender for HttpInviteSender {
    async fn send_invite(&self, invite: &CallInvite) -> Result<DeliveryReceipt, PushError> {
        info!(
            call_id = %invite.call_id,
            room_id = %invite.room_id,
            caller = %invite.caller_id,
            "Forwarding call invite"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(invite)
            .send()
            .await
            .map_err(|e| PushError::Delivery(e.to_string()))?;

        if response.status().is_success() {
            Ok(DeliveryReceipt::delivered())
        } else {
            warn!(
                call_id = %invite.call_id,
                status = %response.status(),
                "Push gateway rejected invite"
            );
            Ok(DeliveryReceipt::failed(format!(
                "gateway returned {}",
                response.status()
            )))
        }
    }
}

/// Records invites instead of delivering them; for tests and for running
/// without a configured gateway
#[derive(Default)]
pub struct RecordingInviteSender {
    sent: Mutex<Vec<CallInvite>>,
}

impl RecordingInviteSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<CallInvite> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl InviteSender for RecordingInviteSender {
    async fn send_invite(&self, invite: &CallInvite) -> Result<DeliveryReceipt, PushError> {
        info!(call_id = %invite.call_id, "Recording call invite (no gateway configured)");
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(invite.clone());
        }
        Ok(DeliveryReceipt::delivered())
    }
}
