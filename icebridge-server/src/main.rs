//! Icebridge server
//!
//! Wires the signaling router and the embedded STUN/TURN relay together:
//! loads configuration, constructs the shared registries, binds the
//! listeners and runs until interrupted. Failing to bind a listener is
//! the only fatal error.

use anyhow::{anyhow, Result};
use icebridge_config::AppConfig;
use icebridge_logging::init_console_logging;
use push_bridge::{HttpInviteSender, InviteSender, RecordingInviteSender};
use signaling_router::{AppState, Router};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use turn_relay::{AllocationLimits, AllocationManager, CredentialIssuer, RelayServer};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_console_logging("icebridge-server", "info");

    info!("Starting Icebridge");

    // Load configuration
    let config = AppConfig::from_env()
        .map_err(|e| anyhow!("Failed to load configuration: {}", e))?;

    info!(
        public_ip = %config.turn.public_ip,
        turn_port = config.turn.port,
        signaling_port = config.signaling.port,
        realm = %config.turn.realm,
        "Configuration loaded"
    );

    // Credential issuer shared by the relay and the signaling router
    let credential_lifetime = Duration::from_secs(
        config
            .turn
            .credential_lifetime_secs
            .min(config.turn.credential_lifetime_max_secs),
    );
    let issuer = Arc::new(CredentialIssuer::new(
        config.turn.shared_secret.clone(),
        config.turn.realm.clone(),
        credential_lifetime,
        config.turn.public_ip,
        config.turn.port,
    ));

    // Allocation registry and the TURN relay
    let limits = AllocationLimits {
        permission_window: Duration::from_secs(config.turn.permission_window_secs),
        channel_window: Duration::from_secs(config.turn.channel_window_secs),
        ..AllocationLimits::default()
    };
    let manager = Arc::new(AllocationManager::new(
        config.turn.public_ip,
        (config.turn.relay_port_min, config.turn.relay_port_max),
        limits,
    ));
    let turn_listen = SocketAddr::new(IpAddr::from([0, 0, 0, 0]), config.turn.port);
    let relay = Arc::new(RelayServer::bind(turn_listen, issuer.clone(), manager.clone()).await?);

    // Push bridge collaborator
    let invites: Arc<dyn InviteSender> = match &config.push.endpoint {
        Some(endpoint) => Arc::new(HttpInviteSender::new(endpoint.clone())),
        None => Arc::new(RecordingInviteSender::new()),
    };

    // Signaling router
    let state = Arc::new(AppState {
        router: Arc::new(Router::new(issuer.clone())),
        issuer,
        invites,
        keepalive_timeout: Duration::from_secs(config.signaling.keepalive_timeout_secs),
    });
    let signaling_listen = SocketAddr::new(config.signaling.bind, config.signaling.port);

    let relay_task = tokio::spawn(async move { relay.run().await });
    let signaling_task = tokio::spawn(signaling_router::serve(signaling_listen, state));

    info!("Icebridge running. Press Ctrl+C to stop.");
    tokio::select! {
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Shutdown signal received"),
                Err(err) => error!(error = %err, "Unable to listen for shutdown signal"),
            }
        }
        result = relay_task => {
            return Err(anyhow!("TURN relay exited unexpectedly: {:?}", result));
        }
        result = signaling_task => {
            return Err(anyhow!("Signaling server exited unexpectedly: {:?}", result));
        }
    }

    info!("Icebridge stopped");
    Ok(())
}
