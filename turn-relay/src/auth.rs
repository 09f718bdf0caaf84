//! Long-term credential mechanism
//!
//! Credentials are derived, not stored: the username encodes its issuance
//! time and the signaling identity, and the password is an HMAC of the
//! username under the server-wide secret. Any server instance holding the
//! secret can re-derive and verify a credential without a lookup table.
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


use crate::stun::{self, attr, Message};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use icebridge_types::IceCredentials;
use md5::{Digest, Md5};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha1::Sha1;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

type HmacSha1 = Hmac<Sha1>;

const NONCE_LEN: usize = 16;
const NONCE_TTL: Duration = Duration::from_secs(3600);

/// Issues and verifies time-limited relay credentials
pub struct CredentialIssuer {
    secret: String,
    realm: String,
    lifetime: Duration,
    uris: Vec<String>,
}

impl CredentialIssuer {
    pub fn new(
        secret: impl Into<String>,
        realm: impl Into<String>,
        lifetime: Duration,
        public_ip: IpAddr,
        port: u16,
    ) -> Self {
        let host = match public_ip {
            IpAddr::V4(ip) => format!("{}:{}", ip, port),
            IpAddr::V6(ip) => format!("[{}]:{}", ip, port),
        };
        CredentialIssuer {
            secret: secret.into(),
            realm: realm.into(),
            lifetime,
            uris: vec![
                format!("stun:{}", host),
                format!("turn:{}?transport=udp", host),
            ],
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Issue a credential bound to a signaling identity
    pub fn issue(&self, identity: &str) -> IceCredentials {
        let username = format!("{}:{}", chrono::Utc::now().timestamp(), identity);
        let password = self.password_for(&username);
        IceCredentials {
            username,
            password,
            ttl_seconds: self.lifetime.as_secs(),
            uris: self.uris.clone(),
        }
    }

    /// Re-derive the password for a username; identical input always yields
    /// the same secret
    pub fn password_for(&self, username: &str) -> String {
        // HMAC accepts keys of any length
        let mut mac = HmacSha1::new_from_slice(self.secret.as_bytes()).expect("hmac key");
        mac.update(username.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    /// A username is valid while now < issuance time + lifetime
    pub fn username_valid(&self, username: &str) -> bool {
        let issued: i64 = match username.split_once(':').and_then(|(ts, _)| ts.parse().ok()) {
            Some(ts) => ts,
            None => return false,
        };
        let now = chrono::Utc::now().timestamp();
        now >= issued && now < issued + self.lifetime.as_secs() as i64
    }

    /// MESSAGE-INTEGRITY key: MD5(username:realm:password)
    pub fn long_term_key(&self, username: &str) -> [u8; 16] {
        let password = self.password_for(username);
        let mut hasher = Md5::new();
        hasher.update(format!("{}:{}:{}", username, self.realm, password).as_bytes());
        hasher.finalize().into()
    }
}

/// Outcome of a failed authentication attempt, mapped to a challenge reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// 401 with a fresh nonce and the realm
    Unauthorized(&'static str),
    /// 438 with a fresh nonce
    StaleNonce,
    /// 400, request is structurally broken
    BadRequest(&'static str),
}

impl AuthFailure {
    pub fn code(self) -> u16 {
        match self {
            AuthFailure::Unauthorized(_) => stun::error_code::UNAUTHORIZED,
            AuthFailure::StaleNonce => stun::error_code::STALE_NONCE,
            AuthFailure::BadRequest(_) => stun::error_code::BAD_REQUEST,
        }
    }
}

/// Validates requests under the long-term credential mechanism
pub struct Authenticator {
    issuer: std::sync::Arc<CredentialIssuer>,
    nonces: Mutex<HashMap<String, Instant>>,
}

impl Authenticator {
    pub fn new(issuer: std::sync::Arc<CredentialIssuer>) -> Self {
        Authenticator {
            issuer,
            nonces: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a nonce for a challenge reply
    pub async fn mint_nonce(&self) -> String {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();
        self.nonces.lock().await.insert(nonce.clone(), Instant::now());
        nonce
    }

    /// Drop nonces past their validity window
    pub async fn prune_nonces(&self) {
        let now = Instant::now();
        self.nonces
            .lock()
            .await
            .retain(|_, minted| now.duration_since(*minted) < NONCE_TTL);
    }

    /// Authenticate a request; returns the verified username
    pub async fn authenticate(&self, msg: &Message, raw: &[u8]) -> Result<String, AuthFailure> {
        if msg.attribute(attr::MESSAGE_INTEGRITY).is_none() {
            return Err(AuthFailure::Unauthorized("no message integrity"));
        }

        let username = msg
            .attr_string(attr::USERNAME)
            .ok_or(AuthFailure::BadRequest("missing username"))?
            .to_string();
        let realm = msg
            .attr_string(attr::REALM)
            .ok_or(AuthFailure::BadRequest("missing realm"))?;
        let nonce = msg
            .attr_string(attr::NONCE)
            .ok_or(AuthFailure::BadRequest("missing nonce"))?;

        if !self.nonce_live(nonce).await {
            return Err(AuthFailure::StaleNonce);
        }
        if realm != self.issuer.realm() {
            return Err(AuthFailure::Unauthorized("wrong realm"));
        }
        if !self.issuer.username_valid(&username) {
            return Err(AuthFailure::Unauthorized("unknown or expired username"));
        }

        let key = self.issuer.long_term_key(&username);
        if !stun::verify_integrity(raw, &key) {
            return Err(AuthFailure::Unauthorized("integrity mismatch"));
        }

        Ok(username)
    }

    async fn nonce_live(&self, nonce: &str) -> bool {
        match self.nonces.lock().await.get(nonce) {
            Some(minted) => minted.elapsed() < NONCE_TTL,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stun::{Class, Method};
    use std::sync::Arc;

    fn issuer() -> Arc<CredentialIssuer> {
        Arc::new(CredentialIssuer::new(
            "server-secret",
            "icebridge",
            Duration::from_secs(600),
            IpAddr::from([127, 0, 0, 1]),
            3478,
        ))
    }

    #[test]
    fn test_issue_and_rederive() {
        let issuer = issuer();
        let creds = issuer.issue("alice");
        assert_eq!(creds.password, issuer.password_for(&creds.username));
        assert!(issuer.username_valid(&creds.username));
        assert_eq!(creds.ttl_seconds, 600);
        assert!(creds.uris.iter().any(|u| u.starts_with("stun:")));
        assert!(creds.uris.iter().any(|u| u.starts_with("turn:")));
    }

    #[test]
    fn test_expired_username_rejected() {
        let issuer = issuer();
        let old = chrono::Utc::now().timestamp() - 601;
        assert!(!issuer.username_valid(&format!("{}:alice", old)));
        assert!(!issuer.username_valid("garbage"));
        // a username claiming to be issued in the future is not valid yet
        let future = chrono::Utc::now().timestamp() + 60;
        assert!(!issuer.username_valid(&format!("{}:alice", future)));
    }

    fn signed_request(
        issuer: &CredentialIssuer,
        username: &str,
        realm: &str,
        nonce: &str,
    ) -> (Message, Vec<u8>) {
        let mut msg = Message::new(Class::Request, Method::Allocate, [3u8; 12]);
        msg.add(attr::REQUESTED_TRANSPORT, vec![17, 0, 0, 0]);
        msg.add(attr::USERNAME, username.as_bytes().to_vec());
        msg.add(attr::REALM, realm.as_bytes().to_vec());
        msg.add(attr::NONCE, nonce.as_bytes().to_vec());
        let mut raw = msg.encode();
        stun::append_integrity(&mut raw, &issuer.long_term_key(username));
        let parsed = Message::decode(&raw).unwrap();
        (parsed, raw)
    }

    #[tokio::test]
    async fn test_authenticate_accepts_valid_request() {
        let issuer = issuer();
        let auth = Authenticator::new(issuer.clone());
        let nonce = auth.mint_nonce().await;
        let creds = issuer.issue("alice");

        let (msg, raw) = signed_request(&issuer, &creds.username, "icebridge", &nonce);
        let username = auth.authenticate(&msg, &raw).await.unwrap();
        assert_eq!(username, creds.username);
    }

    #[tokio::test]
    async fn test_missing_integrity_unauthorized() {
        let issuer = issuer();
        let auth = Authenticator::new(issuer);
        let msg = Message::new(Class::Request, Method::Allocate, [3u8; 12]);
        let raw = msg.encode();
        assert!(matches!(
            auth.authenticate(&msg, &raw).await,
            Err(AuthFailure::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_nonce_is_stale() {
        let issuer = issuer();
        let auth = Authenticator::new(issuer.clone());
        let creds = issuer.issue("alice");
        let (msg, raw) = signed_request(&issuer, &creds.username, "icebridge", "never-minted");
        assert_eq!(
            auth.authenticate(&msg, &raw).await,
            Err(AuthFailure::StaleNonce)
        );
    }

    #[tokio::test]
    async fn test_bad_integrity_unauthorized() {
        let issuer = issuer();
        let auth = Authenticator::new(issuer.clone());
        let nonce = auth.mint_nonce().await;
        let creds = issuer.issue("alice");
        let (msg, mut raw) = signed_request(&issuer, &creds.username, "icebridge", &nonce);
        let last = raw.len() - 1;
        raw[last] ^= 0x55;
        assert!(matches!(
            auth.authenticate(&msg, &raw).await,
            Err(AuthFailure::Unauthorized(_))
        ));
    }
}
