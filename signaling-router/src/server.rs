//! Signaling transport
//!
//! One task per WebSocket connection with a blocking receive loop; the
//! loop suspends only at the receive call, so cancellation and cleanup
//! happen deterministically on loop exit. A dedicated writer task drains
//! each session's outbound queue in order.

use crate::error::RouterResult;
use crate::router::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router as HttpRouter};
use futures::{SinkExt, StreamExt};
use icebridge_types::{CallInvite, ClientMessage, DeliveryReceipt, IceCredentials};
use push_bridge::InviteSender;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use turn_relay::CredentialIssuer;
use uuid::Uuid;

/// Shared state for the signaling endpoints
pub struct AppState {
    pub router: Arc<Router>,
    pub issuer: Arc<CredentialIssuer>,
    pub invites: Arc<dyn InviteSender>,
    pub keepalive_timeout: Duration,
}

/// Build the HTTP/WebSocket application
pub fn app(state: Arc<AppState>) -> HttpRouter {
    HttpRouter::new()
        .route("/ws", get(ws_handler))
        .route("/api/turn", get(turn_credentials))
        .route("/api/invite", post(send_invite))
        .with_state(state)
}

/// Bind and serve until the process stops.
///
/// Failing to bind the listener is the one fatal startup error.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> RouterResult<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "signaling server listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_session(socket, state))
}

/// One task per signaling connection
async fn client_session(socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.router.connect(session_id, tx).await;
    info!(%session_id, "signaling session connected");

    let (mut sink, mut stream) = socket.split();

    // writer: drains the session queue in order
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "dropping unencodable message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    loop {
        let received = tokio::time::timeout(state.keepalive_timeout, stream.next()).await;
        match received {
            Err(_) => {
                debug!(%session_id, "keepalive deadline missed");
                break;
            }
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Err(e))) => {
                debug!(%session_id, error = %e, "transport error");
                break;
            }
            Ok(Some(Ok(Message::Text(text)))) => {
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => state.router.handle(session_id, msg).await,
                    Err(e) => {
                        // unrecognized messages get an error reply; the
                        // connection stays open
                        state
                            .router
                            .reject(session_id, format!("unrecognized message: {}", e))
                            .await;
                    }
                }
            }
            Ok(Some(Ok(_))) => {} // ping/pong/binary frames carry no signaling
        }
    }

    state.router.disconnect(session_id).await;
    writer.abort();
    info!(%session_id, "signaling session closed");
}

#[derive(Debug, Deserialize)]
struct TurnQuery {
    username: Option<String>,
}

/// Relay credentials for a caller outside a room-join flow (used by the
/// push bridge and by pre-join clients)
async fn turn_credentials(
    Query(query): Query<TurnQuery>,
    State(state): State<Arc<AppState>>,
) -> Json<IceCredentials> {
    let identity = query
        .username
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    Json(state.issuer.issue(&identity))
}

/// Forward a call invite through the push bridge
async fn send_invite(
    State(state): State<Arc<AppState>>,
    Json(invite): Json<CallInvite>,
) -> impl IntoResponse {
    match state.invites.send_invite(&invite).await {
        Ok(receipt) => (StatusCode::OK, Json(receipt)),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(DeliveryReceipt::failed(e.to_string())),
        ),
    }
}
