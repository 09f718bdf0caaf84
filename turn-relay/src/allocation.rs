//! TURN allocation management
//!
//! Owns the table of active relay allocations keyed by client 5-tuple,
//! their permissions and channel bindings, and the bounded relay port
//! pool. Expiry is enforced by a periodic sweep so ports are reclaimed
//! promptly rather than on the next lookup.
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


use crate::error::{RelayError, RelayResult};
use crate::stun::{error_code, CHANNEL_MAX, CHANNEL_MIN};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Relay transport protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Udp,
    Tcp,
}

impl Transport {
    pub fn from_protocol(proto: u8) -> Option<Self> {
        match proto {
            17 => Some(Transport::Udp),
            6 => Some(Transport::Tcp),
            _ => None,
        }
    }
}

/// Client transport session identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiveTuple {
    /// Client source address
    pub client: SocketAddr,
    /// Transport of the client-server leg
    pub transport: Transport,
}

/// Lifetime bounds and sub-timer windows
#[derive(Debug, Clone)]
pub struct AllocationLimits {
    /// Lifetime used when the request names none; also the lower clamp bound
    pub default_lifetime: Duration,
    /// Upper clamp bound for requested lifetimes
    pub max_lifetime: Duration,
    /// Permission validity window, reset on each matching request
    pub permission_window: Duration,
    /// Channel binding validity window
    pub channel_window: Duration,
}

impl Default for AllocationLimits {
    fn default() -> Self {
        AllocationLimits {
            default_lifetime: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(3600),
            permission_window: Duration::from_secs(300),
            channel_window: Duration::from_secs(600),
        }
    }
}

#[derive(Debug)]
struct AllocState {
    expires_at: Instant,
    /// Granted lifetime, reported back in Allocate/Refresh responses
    lifetime: Duration,
    /// Permitted peer IPs and their expiry
    permissions: HashMap<IpAddr, Instant>,
    /// Channel number -> (peer, expiry)
    channels: HashMap<u16, (SocketAddr, Instant)>,
    /// Reverse index: peer -> channel number
    peers: HashMap<SocketAddr, u16>,
}

/// One relay allocation, owned by an authenticated client 5-tuple
#[derive(Debug)]
pub struct Allocation {
    pub five_tuple: FiveTuple,
    /// Relay transport requested at creation
    pub transport: Transport,
    /// Relay address peers send to
    pub relay_addr: SocketAddr,
    /// Credential username that created the allocation
    pub username: String,
    /// Cancelled when the allocation is deleted; stops its forwarding task
    pub cancel: CancellationToken,
    state: Mutex<AllocState>,
}

impl Allocation {
    fn new(
        five_tuple: FiveTuple,
        transport: Transport,
        relay_addr: SocketAddr,
        username: String,
        lifetime: Duration,
    ) -> Self {
        Allocation {
            five_tuple,
            transport,
            relay_addr,
            username,
            cancel: CancellationToken::new(),
            state: Mutex::new(AllocState {
                expires_at: Instant::now() + lifetime,
                lifetime,
                permissions: HashMap::new(),
                channels: HashMap::new(),
                peers: HashMap::new(),
            }),
        }
    }

    pub async fn expires_in(&self) -> Duration {
        let state = self.state.lock().await;
        state.expires_at.saturating_duration_since(Instant::now())
    }

    pub async fn is_expired(&self) -> bool {
        self.state.lock().await.expires_at <= Instant::now()
    }

    /// Granted lifetime as last set by Allocate or Refresh
    pub async fn lifetime(&self) -> Duration {
        self.state.lock().await.lifetime
    }

    async fn refresh(&self, lifetime: Duration) {
        let mut state = self.state.lock().await;
        state.expires_at = Instant::now() + lifetime;
        state.lifetime = lifetime;
    }

    /// Install or refresh a permission for a peer IP
    pub async fn add_permission(&self, peer: IpAddr, window: Duration) {
        self.state
            .lock()
            .await
            .permissions
            .insert(peer, Instant::now() + window);
    }

    /// Whether a live permission covers the peer IP
    pub async fn permission_live(&self, peer: IpAddr) -> bool {
        match self.state.lock().await.permissions.get(&peer) {
            Some(expiry) => *expiry > Instant::now(),
            None => false,
        }
    }

    /// Refresh a permission only if it is live; a request naming a peer
    /// that already holds one resets its window
    pub async fn touch_permission(&self, peer: IpAddr, window: Duration) -> bool {
        let mut state = self.state.lock().await;
        match state.permissions.get_mut(&peer) {
            Some(expiry) if *expiry > Instant::now() => {
                *expiry = Instant::now() + window;
                true
            }
            _ => false,
        }
    }

    /// Bind a channel number to a peer address.
    ///
    /// A number and a peer are each bound to at most one counterpart;
    /// rebinding the same pair refreshes the timer, rebinding a live half
    /// to a different counterpart is rejected.
    pub async fn bind_channel(
        &self,
        number: u16,
        peer: SocketAddr,
        window: Duration,
    ) -> RelayResult<()> {
        if !(CHANNEL_MIN..=CHANNEL_MAX).contains(&number) {
            return Err(RelayError::Conflict {
                code: error_code::BAD_REQUEST,
                reason: "channel number out of range",
            });
        }

        let now = Instant::now();
        let mut state = self.state.lock().await;

        if let Some((bound_peer, expiry)) = state.channels.get(&number) {
            if *bound_peer != peer && *expiry > now {
                return Err(RelayError::Conflict {
                    code: error_code::BAD_REQUEST,
                    reason: "channel already bound to another peer",
                });
            }
        }
        if let Some(bound_number) = state.peers.get(&peer) {
            let live = state
                .channels
                .get(bound_number)
                .map(|(_, expiry)| *expiry > now)
                .unwrap_or(false);
            if *bound_number != number && live {
                return Err(RelayError::Conflict {
                    code: error_code::BAD_REQUEST,
                    reason: "peer already bound to another channel",
                });
            }
        }

        state.channels.insert(number, (peer, now + window));
        state.peers.insert(peer, number);
        Ok(())
    }

    /// Peer bound to a channel number, if the binding is live
    pub async fn channel_peer(&self, number: u16) -> Option<SocketAddr> {
        let state = self.state.lock().await;
        match state.channels.get(&number) {
            Some((peer, expiry)) if *expiry > Instant::now() => Some(*peer),
            _ => None,
        }
    }

    /// Channel number bound to a peer, if the binding is live
    pub async fn peer_channel(&self, peer: SocketAddr) -> Option<u16> {
        let state = self.state.lock().await;
        let number = *state.peers.get(&peer)?;
        match state.channels.get(&number) {
            Some((_, expiry)) if *expiry > Instant::now() => Some(number),
            _ => None,
        }
    }

    /// Drop expired permissions and channel bindings
    async fn prune(&self, now: Instant) {
        let mut state = self.state.lock().await;
        state.permissions.retain(|_, expiry| *expiry > now);
        let dead: Vec<u16> = state
            .channels
            .iter()
            .filter(|(_, (_, expiry))| *expiry <= now)
            .map(|(number, _)| *number)
            .collect();
        for number in dead {
            if let Some((peer, _)) = state.channels.remove(&number) {
                state.peers.remove(&peer);
            }
        }
    }
}

/// Outcome of a Refresh request
#[derive(Debug)]
pub enum RefreshOutcome {
    /// Expiry reset; carries the granted lifetime
    Refreshed(Duration),
    /// Lifetime 0: allocation deleted, port released
    Deleted(Arc<Allocation>),
}

/// Table of active allocations and the relay port pool
pub struct AllocationManager {
    relay_ip: IpAddr,
    limits: AllocationLimits,
    allocations: RwLock<HashMap<FiveTuple, Arc<Allocation>>>,
    by_relay: RwLock<HashMap<SocketAddr, FiveTuple>>,
    ports: Mutex<Vec<u16>>,
}

impl AllocationManager {
    pub fn new(relay_ip: IpAddr, port_range: (u16, u16), limits: AllocationLimits) -> Self {
        AllocationManager {
            relay_ip,
            limits,
            allocations: RwLock::new(HashMap::new()),
            by_relay: RwLock::new(HashMap::new()),
            ports: Mutex::new((port_range.0..=port_range.1).collect()),
        }
    }

    pub fn limits(&self) -> &AllocationLimits {
        &self.limits
    }

    /// Create an allocation, or return the existing one for a retransmission.
    ///
    /// The second element is true when a new allocation was created.
    pub async fn allocate(
        &self,
        five_tuple: FiveTuple,
        transport: Transport,
        username: &str,
        requested_lifetime: Option<u32>,
    ) -> RelayResult<(Arc<Allocation>, bool)> {
        let mut allocations = self.allocations.write().await;

        if let Some(existing) = allocations.get(&five_tuple) {
            if existing.transport != transport {
                return Err(RelayError::Conflict {
                    code: error_code::ALLOCATION_MISMATCH,
                    reason: "allocation exists with a different transport",
                });
            }
            return Ok((existing.clone(), false));
        }

        let port = self.ports.lock().await.pop().ok_or(RelayError::Resource)?;
        let relay_addr = SocketAddr::new(self.relay_ip, port);
        let lifetime = self.clamp_lifetime(requested_lifetime);

        let allocation = Arc::new(Allocation::new(
            five_tuple,
            transport,
            relay_addr,
            username.to_string(),
            lifetime,
        ));
        allocations.insert(five_tuple, allocation.clone());
        self.by_relay.write().await.insert(relay_addr, five_tuple);

        Ok((allocation, true))
    }

    /// Reset an allocation's expiry, or delete it when lifetime is 0
    pub async fn refresh(
        &self,
        five_tuple: FiveTuple,
        username: &str,
        requested_lifetime: Option<u32>,
    ) -> RelayResult<RefreshOutcome> {
        let allocation = self.owned(five_tuple, username).await?;

        if requested_lifetime == Some(0) {
            let removed = self.remove(five_tuple).await;
            return Ok(RefreshOutcome::Deleted(removed.unwrap_or(allocation)));
        }

        let lifetime = self.clamp_lifetime(requested_lifetime);
        allocation.refresh(lifetime).await;
        Ok(RefreshOutcome::Refreshed(lifetime))
    }

    /// Install or refresh permissions for the listed peers
    pub async fn create_permission(
        &self,
        five_tuple: FiveTuple,
        username: &str,
        peers: &[SocketAddr],
    ) -> RelayResult<()> {
        let allocation = self.owned(five_tuple, username).await?;
        for peer in peers {
            allocation
                .add_permission(peer.ip(), self.limits.permission_window)
                .await;
        }
        Ok(())
    }

    /// Bind a channel; also installs a permission for the peer
    pub async fn channel_bind(
        &self,
        five_tuple: FiveTuple,
        username: &str,
        number: u16,
        peer: SocketAddr,
    ) -> RelayResult<()> {
        let allocation = self.owned(five_tuple, username).await?;
        allocation
            .bind_channel(number, peer, self.limits.channel_window)
            .await?;
        allocation
            .add_permission(peer.ip(), self.limits.permission_window)
            .await;
        Ok(())
    }

    pub async fn get(&self, five_tuple: FiveTuple) -> Option<Arc<Allocation>> {
        self.allocations.read().await.get(&five_tuple).cloned()
    }

    pub async fn by_relay_addr(&self, relay_addr: SocketAddr) -> Option<Arc<Allocation>> {
        let five_tuple = *self.by_relay.read().await.get(&relay_addr)?;
        self.get(five_tuple).await
    }

    pub async fn allocation_count(&self) -> usize {
        self.allocations.read().await.len()
    }

    pub async fn free_ports(&self) -> usize {
        self.ports.lock().await.len()
    }

    /// Remove every expired allocation, cascading its permissions and
    /// channel bindings and returning its relay port to the pool.
    /// Returns the removed allocations so the caller can tear down their
    /// forwarding state.
    pub async fn sweep(&self) -> Vec<Arc<Allocation>> {
        let now = Instant::now();
        let mut expired = Vec::new();

        {
            let mut allocations = self.allocations.write().await;
            let mut stale = Vec::new();
            for (five_tuple, allocation) in allocations.iter() {
                if allocation.state.lock().await.expires_at <= now {
                    stale.push(*five_tuple);
                }
            }
            let mut by_relay = self.by_relay.write().await;
            let mut ports = self.ports.lock().await;
            for five_tuple in stale {
                if let Some(allocation) = allocations.remove(&five_tuple) {
                    by_relay.remove(&allocation.relay_addr);
                    ports.push(allocation.relay_addr.port());
                    allocation.cancel.cancel();
                    expired.push(allocation);
                }
            }
        }

        let live: Vec<Arc<Allocation>> =
            self.allocations.read().await.values().cloned().collect();
        for allocation in live {
            allocation.prune(now).await;
        }

        expired
    }

    /// Delete one allocation, releasing its port and cancelling forwarding
    async fn remove(&self, five_tuple: FiveTuple) -> Option<Arc<Allocation>> {
        let allocation = self.allocations.write().await.remove(&five_tuple)?;
        self.by_relay.write().await.remove(&allocation.relay_addr);
        self.ports.lock().await.push(allocation.relay_addr.port());
        allocation.cancel.cancel();
        Some(allocation)
    }

    async fn owned(&self, five_tuple: FiveTuple, username: &str) -> RelayResult<Arc<Allocation>> {
        let allocation = self.get(five_tuple).await.ok_or(RelayError::Conflict {
            code: error_code::ALLOCATION_MISMATCH,
            reason: "no allocation for this 5-tuple",
        })?;
        if allocation.username != username {
            return Err(RelayError::Auth {
                code: error_code::UNAUTHORIZED,
                reason: "allocation owned by another credential",
            });
        }
        Ok(allocation)
    }

    fn clamp_lifetime(&self, requested: Option<u32>) -> Duration {
        let requested = requested
            .map(|secs| Duration::from_secs(u64::from(secs)))
            .unwrap_or(self.limits.default_lifetime);
        requested.clamp(self.limits.default_lifetime, self.limits.max_lifetime)
    }
}
