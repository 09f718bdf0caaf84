//! Configuration management for Icebridge services

use serde::Deserialize;
use std::env;
use std::net::IpAddr;

/// STUN/TURN relay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TurnConfig {
    /// Address advertised to clients and used for relay sockets
    pub public_ip: IpAddr,
    /// UDP listening port for STUN/TURN control traffic
    pub port: u16,
    /// Authentication realm
    pub realm: String,
    /// Server-wide secret used to derive relay credentials
    pub shared_secret: String,
    /// Issued credential lifetime in seconds
    pub credential_lifetime_secs: u64,
    /// Hard cap on the credential lifetime
    pub credential_lifetime_max_secs: u64,
    /// First port of the relay allocation pool (inclusive)
    pub relay_port_min: u16,
    /// Last port of the relay allocation pool (inclusive)
    pub relay_port_max: u16,
    /// Permission validity window in seconds
    pub permission_window_secs: u64,
    /// Channel binding validity window in seconds
    pub channel_window_secs: u64,
}

/// Signaling server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SignalingConfig {
    /// Bind address for the WebSocket/HTTP listener
    pub bind: IpAddr,
    /// Listening port
    pub port: u16,
    /// A session missing keepalives for this long is disconnected
    pub keepalive_timeout_secs: u64,
    /// TLS certificate path (terminated by a fronting proxy when unset)
    pub cert_file: Option<String>,
    /// TLS private key path
    pub key_file: Option<String>,
}

/// Push bridge configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    /// Delivery endpoint for call invites; disabled when unset
    pub endpoint: Option<String>,
}

/// Application configuration, loaded once at startup
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub turn: TurnConfig,
    pub signaling: SignalingConfig,
    pub push: PushConfig,
    pub log_level: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let public_ip = parse_var("TURN_PUBLIC_IP", IpAddr::from([127, 0, 0, 1]))?;
        let turn_port = parse_var("TURN_PORT", 3478u16)?;
        let realm = env::var("TURN_REALM").unwrap_or_else(|_| "icebridge".to_string());
        let shared_secret = env::var("TURN_SHARED_SECRET")
            .map_err(|_| config::ConfigError::NotFound("TURN_SHARED_SECRET".to_string()))?;
        let credential_lifetime_secs = parse_var("TURN_CREDENTIAL_LIFETIME_SECS", 600u64)?;
        let credential_lifetime_max_secs = parse_var("TURN_CREDENTIAL_LIFETIME_MAX_SECS", 3600u64)?;
        let relay_port_min = parse_var("TURN_RELAY_PORT_MIN", 49152u16)?;
        let relay_port_max = parse_var("TURN_RELAY_PORT_MAX", 49407u16)?;
        let permission_window_secs = parse_var("TURN_PERMISSION_WINDOW_SECS", 300u64)?;
        let channel_window_secs = parse_var("TURN_CHANNEL_WINDOW_SECS", 600u64)?;

        let bind = parse_var("SIGNALING_BIND", IpAddr::from([0, 0, 0, 0]))?;
        let signaling_port = parse_var("SIGNALING_PORT", 8086u16)?;
        let keepalive_timeout_secs = parse_var("SIGNALING_KEEPALIVE_TIMEOUT_SECS", 30u64)?;

        let log_level = env::var("LOG_LEVEL").ok();

        Ok(Self {
            turn: TurnConfig {
                public_ip,
                port: turn_port,
                realm,
                shared_secret,
                credential_lifetime_secs,
                credential_lifetime_max_secs,
                relay_port_min,
                relay_port_max,
                permission_window_secs,
                channel_window_secs,
            },
            signaling: SignalingConfig {
                bind,
                port: signaling_port,
                keepalive_timeout_secs,
                cert_file: env::var("SIGNALING_CERT_FILE").ok(),
                key_file: env::var("SIGNALING_KEY_FILE").ok(),
            },
            push: PushConfig {
                endpoint: env::var("PUSH_ENDPOINT").ok(),
            },
            log_level,
        })
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, config::ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|e| {
            config::ConfigError::Message(format!("invalid value for {}: {}", name, e))
        }),
        Err(_) => Ok(default),
    }
}
