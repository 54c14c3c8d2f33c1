//! WebSocket upgrade handling: authentication gate, registration, read loop

use std::sync::Arc;

use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use log::{debug, error, info};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::auth::AuthGate;
use crate::core::dispatcher::Dispatcher;
use crate::core::events::ServerEvent;
use crate::error::RelayError;

/// Handle a freshly upgraded WebSocket connection.
///
/// The bearer credential arrives as the `token` query parameter; the gate
/// runs before any registry state exists, and a failed gate closes the
/// socket after a single auth_error frame.
pub async fn handle_ws_client(
    ws: WebSocket,
    token: Option<String>,
    gate: Arc<AuthGate>,
    dispatcher: Arc<Dispatcher>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Forward events from the connection's channel to the socket
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = message.is_close();
            if let Err(e) = ws_tx.send(message).await {
                debug!("WebSocket send failed: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // Connect-time authentication: no token or a bad token means no session
    let identity = match token {
        Some(token) => match gate.authenticate(&token).await {
            Ok(identity) => identity,
            Err(e) => {
                info!("Rejected connection: {}", e);
                send_auth_error(&tx, "Invalid or expired credential");
                return;
            }
        },
        None => {
            info!("Rejected connection: missing credential");
            send_auth_error(&tx, "Missing credential");
            return;
        }
    };

    let connection_id = match dispatcher.handle_connect(&identity, tx.clone()).await {
        Ok(connection_id) => connection_id,
        Err(e) => {
            error!("Failed to register connection for user {}: {}", identity.user_id, e);
            send_event_and_close(&tx, &registration_error(&e));
            return;
        }
    };

    // Read loop: one frame at a time, errors isolated per event
    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(message) => {
                if message.is_close() {
                    break;
                }
                if let Ok(text) = message.to_str() {
                    dispatcher.dispatch(&connection_id, text).await;
                } else if message.is_ping() || message.is_pong() {
                    dispatcher.hub().touch(&connection_id).await;
                }
            }
            Err(e) => {
                debug!("WebSocket error on connection {}: {}", connection_id, e);
                break;
            }
        }
    }

    // Voluntary disconnect or transport failure: same teardown either way
    dispatcher.handle_disconnect(&connection_id).await;
    info!("Connection {} closed (user {})", connection_id, identity.user_id);
}

fn send_auth_error(tx: &mpsc::UnboundedSender<Message>, message: &str) {
    let event = ServerEvent::AuthError {
        message: message.to_string(),
    };
    send_event_and_close(tx, &event);
}

/// Registration failures are not credential failures: capacity gets its own
/// code so clients can back off and retry instead of re-authenticating.
fn registration_error(error: &RelayError) -> ServerEvent {
    match error {
        RelayError::ServerFull => ServerEvent::Error {
            code: "SERVER_FULL".to_string(),
            message: "Server connection limit reached".to_string(),
        },
        _ => ServerEvent::Error {
            code: "SERVICE_ERROR".to_string(),
            message: "Connection could not be registered".to_string(),
        },
    }
}

fn send_event_and_close(tx: &mpsc::UnboundedSender<Message>, event: &ServerEvent) {
    if let Ok(text) = serde_json::to_string(event) {
        let _ = tx.send(Message::text(text));
    }
    let _ = tx.send(Message::close());
}
