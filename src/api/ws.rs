//! WebSocket client channel.
//!
//! Each socket subscribes to the server event broadcast and forwards every
//! frame as JSON text. Inbound frames are [`ClientEvent`]s. A client counts
//! towards the [`ConnectionRegistry`] from its `connected` event until the
//! socket closes (or it sends `disconnect`), and is deregistered exactly once.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::clock::sync_system_clock;
use super::handlers::AppState;
use crate::pipeline::ClientEvent;
use crate::session::ConnectionRegistry;

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| client_session(socket, state))
}

/// Registration of one client. Deregisters on drop if it ever registered.
pub struct ClientGuard {
    registry: Arc<ConnectionRegistry>,
    registered: bool,
}

impl ClientGuard {
    pub const fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            registered: false,
        }
    }

    /// Register with the registry. Repeated calls are ignored.
    pub fn register(&mut self) -> bool {
        if self.registered {
            return false;
        }
        self.registry.connect();
        self.registered = true;
        true
    }

    pub const fn is_registered(&self) -> bool {
        self.registered
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        if self.registered {
            self.registry.disconnect();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Apply one inbound event to the session.
pub fn handle_client_event(state: &AppState, guard: &mut ClientGuard, event: ClientEvent) -> Flow {
    match event {
        ClientEvent::Connected { time } => {
            if !guard.register() {
                debug!("[WebSocket] Duplicate connected event ignored");
                return Flow::Continue;
            }
            if state.config.snapshot().server.clock_sync {
                tokio::spawn(async move {
                    if let Err(e) = sync_system_clock(&time).await {
                        warn!(error = %e, "[WebSocket] Clock sync failed");
                    }
                });
            }
            Flow::Continue
        }
        ClientEvent::Recording { recording } => {
            state.registry.set_recording(recording);
            Flow::Continue
        }
        ClientEvent::Disconnect => Flow::Close,
    }
}

async fn client_session(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.registry.events().subscribe();
    let mut guard = ClientGuard::new(Arc::clone(&state.registry));
    debug!("[WebSocket] Socket opened");

    loop {
        tokio::select! {
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => match ClientEvent::parse(&text) {
                    Ok(event) => {
                        if handle_client_event(&state, &mut guard, event) == Flow::Close {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "[WebSocket] Unrecognised client frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "[WebSocket] Receive failed");
                    break;
                }
            },
            outbound = events.recv() => match outbound {
                Ok(event) => match event.to_json() {
                    Ok(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, event = event.name(), "[WebSocket] Failed to encode event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "[WebSocket] Client lagging, frames dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!(registered = guard.is_registered(), "[WebSocket] Socket closed");
}
