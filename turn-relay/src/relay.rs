//! STUN/TURN relay server
//!
//! Drives the UDP control socket: STUN dispatch, the authentication
//! handshake, allocation lifecycle requests, and the data plane that
//! forwards datagrams between clients and their permitted peers.
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


use crate::allocation::{Allocation, AllocationManager, FiveTuple, RefreshOutcome, Transport};
use crate::auth::{AuthFailure, Authenticator, CredentialIssuer};
use crate::error::{RelayError, RelayResult};
use crate::stun::{self, attr, error_code, ChannelData, Class, Message, Method};
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const SOFTWARE: &str = "icebridge";
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const MAX_DATAGRAM: usize = 65536;

/// UDP-facing STUN/TURN server
pub struct RelayServer {
    socket: Arc<UdpSocket>,
    auth: Authenticator,
    issuer: Arc<CredentialIssuer>,
    manager: Arc<AllocationManager>,
    relay_sockets: RwLock<HashMap<SocketAddr, Arc<UdpSocket>>>,
}

impl RelayServer {
    /// Bind the control socket. Failure here is the one fatal startup error.
    pub async fn bind(
        listen: SocketAddr,
        issuer: Arc<CredentialIssuer>,
        manager: Arc<AllocationManager>,
    ) -> RelayResult<Self> {
        let socket = UdpSocket::bind(listen).await?;
        info!(addr = %socket.local_addr()?, "TURN relay listening");
        Ok(RelayServer {
            socket: Arc::new(socket),
            auth: Authenticator::new(issuer.clone()),
            issuer,
            manager,
            relay_sockets: RwLock::new(HashMap::new()),
        })
    }

    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive loop with the periodic expiry sweep interleaved
    pub async fn run(&self) -> RelayResult<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, from)) => self.handle_packet(&buf[..len], from).await,
                        Err(e) => {
                            warn!(error = %e, "control socket receive failed");
                        }
                    }
                }
                _ = sweep.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    /// Reclaim expired allocations and aged-out nonces
    pub async fn sweep(&self) {
        let expired = self.manager.sweep().await;
        if !expired.is_empty() {
            let mut sockets = self.relay_sockets.write().await;
            for allocation in &expired {
                sockets.remove(&allocation.relay_addr);
                info!(
                    client = %allocation.five_tuple.client,
                    relay = %allocation.relay_addr,
                    "allocation expired"
                );
            }
        }
        self.auth.prune_nonces().await;
    }

    async fn handle_packet(&self, data: &[u8], from: SocketAddr) {
        if stun::is_channel_data(data) {
            self.handle_channel_data(data, from).await;
            return;
        }
        if !stun::is_stun(data) {
            debug!(%from, len = data.len(), "dropping non-STUN datagram");
            return;
        }

        let msg = match Message::decode(data) {
            Ok(msg) => msg,
            Err(e) => {
                // malformed input is dropped whole, never partially processed
                debug!(%from, error = %e, "dropping malformed STUN message");
                return;
            }
        };

        // FINGERPRINT, when present, is validated before anything else
        if msg.attribute(attr::FINGERPRINT).is_some() {
            if let Err(e) = stun::verify_fingerprint(data) {
                debug!(%from, error = %e, "dropping message with bad fingerprint");
                return;
            }
        }

        if let Some(reply) = self.handle_message(&msg, data, from).await {
            if let Err(e) = self.socket.send_to(&reply, from).await {
                warn!(%from, error = %e, "failed to send reply");
            }
        }
    }

    async fn handle_message(&self, msg: &Message, raw: &[u8], from: SocketAddr) -> Option<Vec<u8>> {
        match (msg.class, msg.method) {
            (Class::Request, Method::Binding) => Some(self.binding_response(msg, from)),
            (Class::Indication, Method::Send) => {
                self.handle_send_indication(msg, from).await;
                None
            }
            (Class::Request, method) => {
                let username = match self.auth.authenticate(msg, raw).await {
                    Ok(username) => username,
                    Err(failure) => return Some(self.challenge(msg, failure).await),
                };
                let five_tuple = FiveTuple {
                    client: from,
                    transport: Transport::Udp,
                };
                let result = match method {
                    Method::Allocate => self.handle_allocate(msg, five_tuple, &username, from).await,
                    Method::Refresh => self.handle_refresh(msg, five_tuple, &username).await,
                    Method::CreatePermission => {
                        self.handle_create_permission(msg, five_tuple, &username).await
                    }
                    Method::ChannelBind => {
                        self.handle_channel_bind(msg, five_tuple, &username).await
                    }
                    // Binding handled above; Send/Data are never requests
                    _ => {
                        debug!(%from, ?method, "dropping request with unexpected method");
                        return None;
                    }
                };
                match result {
                    Ok(mut reply) => {
                        reply.add(attr::SOFTWARE, SOFTWARE.as_bytes().to_vec());
                        let key = self.issuer.long_term_key(&username);
                        let mut bytes = reply.encode();
                        stun::append_integrity(&mut bytes, &key);
                        Some(bytes)
                    }
                    Err(err) => self.error_reply(msg, err, from),
                }
            }
            (class, method) => {
                debug!(%from, ?class, ?method, "dropping unexpected message");
                None
            }
        }
    }

    fn binding_response(&self, msg: &Message, from: SocketAddr) -> Vec<u8> {
        let mut reply = Message::new(Class::SuccessResponse, Method::Binding, msg.transaction_id);
        reply.add_xor_address(attr::XOR_MAPPED_ADDRESS, from);
        reply.add(attr::SOFTWARE, SOFTWARE.as_bytes().to_vec());
        reply.encode()
    }

    async fn handle_allocate(
        &self,
        msg: &Message,
        five_tuple: FiveTuple,
        username: &str,
        from: SocketAddr,
    ) -> RelayResult<Message> {
        let transport = msg
            .attribute(attr::REQUESTED_TRANSPORT)
            .and_then(|v| v.first().copied())
            .and_then(Transport::from_protocol)
            .ok_or(RelayError::Conflict {
                code: error_code::BAD_REQUEST,
                reason: "missing or unsupported transport",
            })?;
        if transport != Transport::Udp {
            return Err(RelayError::Conflict {
                code: error_code::BAD_REQUEST,
                reason: "only UDP relay is supported",
            });
        }

        let lifetime = msg.attr_u32(attr::LIFETIME);
        let (allocation, created) = self
            .manager
            .allocate(five_tuple, transport, username, lifetime)
            .await?;

        if created {
            if let Err(e) = self.open_relay(&allocation).await {
                warn!(relay = %allocation.relay_addr, error = %e, "relay socket bind failed");
                let _ = self.manager.refresh(five_tuple, username, Some(0)).await;
                return Err(RelayError::Resource);
            }
            info!(
                client = %from,
                relay = %allocation.relay_addr,
                username,
                "allocation created"
            );
        }

        let mut reply = Message::new(Class::SuccessResponse, Method::Allocate, msg.transaction_id);
        reply.add_xor_address(attr::XOR_RELAYED_ADDRESS, allocation.relay_addr);
        reply.add_xor_address(attr::XOR_MAPPED_ADDRESS, from);
        reply.add(
            attr::LIFETIME,
            (allocation.lifetime().await.as_secs() as u32)
                .to_be_bytes()
                .to_vec(),
        );
        Ok(reply)
    }

    async fn handle_refresh(
        &self,
        msg: &Message,
        five_tuple: FiveTuple,
        username: &str,
    ) -> RelayResult<Message> {
        let lifetime = msg.attr_u32(attr::LIFETIME);
        let outcome = self.manager.refresh(five_tuple, username, lifetime).await?;

        let granted = match outcome {
            RefreshOutcome::Refreshed(lifetime) => lifetime.as_secs() as u32,
            RefreshOutcome::Deleted(allocation) => {
                self.relay_sockets
                    .write()
                    .await
                    .remove(&allocation.relay_addr);
                info!(
                    client = %allocation.five_tuple.client,
                    relay = %allocation.relay_addr,
                    "allocation released"
                );
                0
            }
        };

        let mut reply = Message::new(Class::SuccessResponse, Method::Refresh, msg.transaction_id);
        reply.add(attr::LIFETIME, granted.to_be_bytes().to_vec());
        Ok(reply)
    }

    async fn handle_create_permission(
        &self,
        msg: &Message,
        five_tuple: FiveTuple,
        username: &str,
    ) -> RelayResult<Message> {
        let peers = msg.xor_addresses(attr::XOR_PEER_ADDRESS);
        if peers.is_empty() {
            return Err(RelayError::Conflict {
                code: error_code::BAD_REQUEST,
                reason: "no peer address",
            });
        }
        self.manager
            .create_permission(five_tuple, username, &peers)
            .await?;
        debug!(client = %five_tuple.client, peers = peers.len(), "permissions installed");
        Ok(Message::new(
            Class::SuccessResponse,
            Method::CreatePermission,
            msg.transaction_id,
        ))
    }

    async fn handle_channel_bind(
        &self,
        msg: &Message,
        five_tuple: FiveTuple,
        username: &str,
    ) -> RelayResult<Message> {
        let number = msg
            .attribute(attr::CHANNEL_NUMBER)
            .filter(|v| v.len() >= 2)
            .map(|v| u16::from_be_bytes([v[0], v[1]]))
            .ok_or(RelayError::Conflict {
                code: error_code::BAD_REQUEST,
                reason: "missing channel number",
            })?;
        let peer = msg
            .xor_address(attr::XOR_PEER_ADDRESS)
            .ok_or(RelayError::Conflict {
                code: error_code::BAD_REQUEST,
                reason: "missing peer address",
            })?;

        self.manager
            .channel_bind(five_tuple, username, number, peer)
            .await?;
        debug!(client = %five_tuple.client, channel = number, %peer, "channel bound");
        Ok(Message::new(
            Class::SuccessResponse,
            Method::ChannelBind,
            msg.transaction_id,
        ))
    }

    /// Send indication: client -> peer through the relay.
    ///
    /// Forwarded only when the target holds a live permission; everything
    /// else is dropped silently. This is a security boundary, not an error.
    async fn handle_send_indication(&self, msg: &Message, from: SocketAddr) {
        let five_tuple = FiveTuple {
            client: from,
            transport: Transport::Udp,
        };
        let (peer, data) = match (
            msg.xor_address(attr::XOR_PEER_ADDRESS),
            msg.attribute(attr::DATA),
        ) {
            (Some(peer), Some(data)) => (peer, data),
            _ => {
                debug!(%from, "dropping send indication without peer/data");
                return;
            }
        };
        let allocation = match self.manager.get(five_tuple).await {
            Some(allocation) => allocation,
            None => {
                debug!(%from, "dropping send indication without allocation");
                return;
            }
        };
        let window = self.manager.limits().permission_window;
        if !allocation.touch_permission(peer.ip(), window).await {
            debug!(%from, %peer, "dropping send indication without permission");
            return;
        }
        self.send_to_peer(&allocation, peer, data).await;
    }

    /// ChannelData: client -> peer with the compact 4-byte header
    async fn handle_channel_data(&self, data: &[u8], from: SocketAddr) {
        let five_tuple = FiveTuple {
            client: from,
            transport: Transport::Udp,
        };
        let frame = match ChannelData::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(%from, error = %e, "dropping malformed channel data");
                return;
            }
        };
        let allocation = match self.manager.get(five_tuple).await {
            Some(allocation) => allocation,
            None => return,
        };
        let peer = match allocation.channel_peer(frame.number).await {
            Some(peer) => peer,
            None => {
                debug!(%from, channel = frame.number, "dropping data on unbound channel");
                return;
            }
        };
        self.send_to_peer(&allocation, peer, frame.data).await;
    }

    async fn send_to_peer(&self, allocation: &Allocation, peer: SocketAddr, data: &[u8]) {
        let socket = self
            .relay_sockets
            .read()
            .await
            .get(&allocation.relay_addr)
            .cloned();
        if let Some(socket) = socket {
            if let Err(e) = socket.send_to(data, peer).await {
                debug!(%peer, error = %e, "relay send failed");
            }
        }
    }

    /// Bind the relay socket for a new allocation and start its inbound
    /// forwarding task
    async fn open_relay(&self, allocation: &Arc<Allocation>) -> RelayResult<()> {
        let socket = Arc::new(UdpSocket::bind(allocation.relay_addr).await?);
        self.relay_sockets
            .write()
            .await
            .insert(allocation.relay_addr, socket.clone());

        tokio::spawn(relay_inbound(
            allocation.clone(),
            socket,
            self.socket.clone(),
        ));
        Ok(())
    }

    /// 401/438 challenge or 400 rejection for a failed authentication
    async fn challenge(&self, msg: &Message, failure: AuthFailure) -> Vec<u8> {
        let mut reply = Message::new(Class::ErrorResponse, msg.method, msg.transaction_id);
        reply.add_error_code(failure.code());
        match failure {
            AuthFailure::Unauthorized(reason) => {
                debug!(reason, "authentication challenge issued");
                reply.add(attr::REALM, self.issuer.realm().as_bytes().to_vec());
                let nonce = self.auth.mint_nonce().await;
                reply.add(attr::NONCE, nonce.into_bytes());
            }
            AuthFailure::StaleNonce => {
                reply.add(attr::REALM, self.issuer.realm().as_bytes().to_vec());
                let nonce = self.auth.mint_nonce().await;
                reply.add(attr::NONCE, nonce.into_bytes());
            }
            AuthFailure::BadRequest(reason) => {
                debug!(reason, "malformed authenticated request");
            }
        }
        reply.encode()
    }

    fn error_reply(&self, msg: &Message, err: RelayError, from: SocketAddr) -> Option<Vec<u8>> {
        let (code, reason) = match err.response_code() {
            Some(answer) => answer,
            None => {
                debug!(%from, error = %err, "dropping request");
                return None;
            }
        };
        debug!(%from, code, reason, "request rejected");
        let mut reply = Message::new(Class::ErrorResponse, msg.method, msg.transaction_id);
        reply.add_error_code(code);
        Some(reply.encode())
    }
}

/// Per-allocation task: peer -> client forwarding.
///
/// Runs until the allocation is deleted; cancellation touches nothing
/// beyond this one allocation.
async fn relay_inbound(
    allocation: Arc<Allocation>,
    relay_socket: Arc<UdpSocket>,
    server_socket: Arc<UdpSocket>,
) {
    let client = allocation.five_tuple.client;
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = allocation.cancel.cancelled() => break,
            received = relay_socket.recv_from(&mut buf) => {
                let (len, peer) = match received {
                    Ok(ok) => ok,
                    Err(e) => {
                        warn!(relay = %allocation.relay_addr, error = %e, "relay socket failed");
                        break;
                    }
                };
                forward_to_client(&allocation, &server_socket, client, peer, &buf[..len]).await;
            }
        }
    }
    debug!(relay = %allocation.relay_addr, "relay forwarding stopped");
}

async fn forward_to_client(
    allocation: &Allocation,
    server_socket: &UdpSocket,
    client: SocketAddr,
    peer: SocketAddr,
    data: &[u8],
) {
    // channel relay when bound, Data indication under a plain permission
    let reply = if let Some(number) = allocation.peer_channel(peer).await {
        ChannelData::encode(number, data)
    } else if allocation.permission_live(peer.ip()).await {
        let mut indication = Message::new(
            Class::Indication,
            Method::Data,
            rand::thread_rng().gen::<[u8; 12]>(),
        );
        indication.add_xor_address(attr::XOR_PEER_ADDRESS, peer);
        indication.add(attr::DATA, data.to_vec());
        indication.encode()
    } else {
        debug!(%peer, "dropping inbound datagram without permission");
        return;
    };
    if let Err(e) = server_socket.send_to(&reply, client).await {
        debug!(%client, error = %e, "client send failed");
    }
}
