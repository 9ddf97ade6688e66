//! Viewer WebSocket stream.
//!
//! Each connection runs two pumps. The write pump forwards the viewer's hub
//! queue and sends keepalive pings; the read pump applies subscribe and
//! unsubscribe frames and drops viewers that stay silent too long. When
//! either pump ends the other is cancelled and the viewer is unregistered.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tracing::debug;

use super::handlers::AppState;
use crate::config::HubConfig;
use crate::hub::{ClientMessage, MailboxHub, Viewer};
use crate::smtp::normalize_mailbox;

/// Timing settings of one viewer connection.
#[derive(Debug, Clone, Copy)]
struct PumpSettings {
    ping_interval: Duration,
    pong_timeout: Duration,
    write_timeout: Duration,
}

impl From<&HubConfig> for PumpSettings {
    fn from(config: &HubConfig) -> Self {
        Self {
            ping_interval: Duration::from_secs(config.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(config.pong_timeout_secs.max(1)),
            write_timeout: Duration::from_secs(config.write_timeout_secs.max(1)),
        }
    }
}

/// GET /ws
pub async fn viewer_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    // Oversized inbound frames fail the read and close the connection
    let limit = state.viewer.max_frame_bytes;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let settings = PumpSettings::from(&state.viewer);
    let (viewer, queue) = state.hub.register().await;
    debug!("Viewer {} connected", viewer.id());

    let (sink, stream) = socket.split();
    let mut write = tokio::spawn(write_pump(sink, queue, settings, viewer.clone()));
    let mut read = tokio::spawn(read_pump(stream, state.hub.clone(), viewer.clone(), settings));

    tokio::select! {
        _ = &mut write => read.abort(),
        _ = &mut read => write.abort(),
    }

    state.hub.unregister(&viewer).await;
    debug!("Viewer {} disconnected", viewer.id());
}

/// Forward queued frames and keepalive pings until the queue closes or a
/// write fails or times out.
async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<String>,
    settings: PumpSettings,
    viewer: Viewer,
) {
    let mut ping = interval_at(
        Instant::now() + settings.ping_interval,
        settings.ping_interval,
    );

    loop {
        let message = tokio::select! {
            frame = queue.recv() => match frame {
                Some(json) => Message::Text(json),
                None => {
                    // The hub closed the queue
                    let _ = timeout(settings.write_timeout, sink.send(Message::Close(None))).await;
                    return;
                }
            },
            _ = ping.tick() => Message::Ping(Vec::new()),
        };

        match timeout(settings.write_timeout, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Write to viewer {} failed: {}", viewer.id(), e);
                return;
            }
            Err(_) => {
                debug!("Write to viewer {} timed out", viewer.id());
                return;
            }
        }
    }
}

/// Apply inbound frames until the peer closes, errors, or stays silent for
/// longer than the pong timeout.
async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    hub: MailboxHub,
    viewer: Viewer,
    settings: PumpSettings,
) {
    loop {
        let frame = match timeout(settings.pong_timeout, stream.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                debug!("Read from viewer {} failed: {}", viewer.id(), e);
                return;
            }
            Ok(None) => return,
            Err(_) => {
                debug!("Viewer {} timed out", viewer.id());
                return;
            }
        };

        match frame {
            Message::Text(text) => apply_client_frame(&hub, &viewer, &text).await,
            Message::Close(_) => return,
            // Pongs only refresh the deadline; pings are answered by axum
            _ => {}
        }
    }
}

/// Apply one text frame from a viewer. Malformed frames are ignored.
pub(crate) async fn apply_client_frame(hub: &MailboxHub, viewer: &Viewer, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe { email }) => {
            let mailbox = normalize_mailbox(&email);
            if mailbox.is_empty() {
                debug!("Viewer {} sent an empty subscription", viewer.id());
                return;
            }
            hub.subscribe(viewer, &mailbox).await;
        }
        Ok(ClientMessage::Unsubscribe { email }) => {
            hub.unsubscribe(viewer, &normalize_mailbox(&email)).await;
        }
        Err(e) => debug!("Ignoring malformed frame from viewer {}: {}", viewer.id(), e),
    }
}
