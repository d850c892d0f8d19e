//! WebSocket connections

use std::time::Duration;

use anyhow::Context;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{AppState, ConnectParams};
use crate::peer::Client;
use crate::protocol::{version_message, ClientMessage};
use crate::version;

/// Close code for a bad id or an unparseable frame
const CLOSE_INVALID: u16 = 4000;

/// Time allowed for the writer to send its close frame
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Any path other than the fixed routes: upgrade or 404
pub(super) async fn fallback(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    match upgrade {
        Some(upgrade) => self::upgrade(upgrade, state, params),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub(super) fn upgrade(upgrade: WebSocketUpgrade, state: AppState, params: ConnectParams) -> Response {
    let max_size = state.server.websocket_max_message_bytes;
    upgrade
        .max_message_size(max_size)
        .on_upgrade(move |socket| async move {
            let peer = params.id.clone().unwrap_or_default();
            if let Err(e) = run_socket(socket, state, params).await {
                debug!(peer = %peer, error = %e, "WebSocket ended with error");
            }
        })
}

fn close_frame(reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code: CLOSE_INVALID,
        reason: reason.into(),
    }))
}

async fn run_socket(mut socket: WebSocket, state: AppState, params: ConnectParams) -> anyhow::Result<()> {
    let Some(peer_id) = params.peer_id().map(str::to_string) else {
        socket
            .send(close_frame("id is not valid"))
            .await
            .context("closing socket with invalid id")?;
        return Ok(());
    };
    let hub = state.hub.clone();

    let (outbound, outbound_rx) = mpsc::channel(state.server.socket_send_buffer);
    let handle = outbound.downgrade();

    let client = match hub.client(&peer_id) {
        Some(client) => {
            client.switch_to_socket(outbound);
            hub.touch(&client).await;
            client
        }
        None => {
            let client = Client::socket(peer_id.clone(), state.client_options(&params), outbound);
            hub.register(client.clone()).await;
            client
        }
    };
    if !client.send(version_message(version::protocol_version())) {
        trace!(peer = %peer_id, "Version greeting not sent");
    }

    let (sink, stream) = socket.split();
    let (close_tx, close_rx) = oneshot::channel();
    let mut writer = tokio::spawn(write_loop(sink, outbound_rx, close_rx));

    let close = read_loop(stream, &state, &peer_id, &params, &handle, &mut writer).await;
    match close {
        Some(reason) => {
            let _ = close_tx.send(reason);
        }
        None => drop(close_tx),
    }
    if !writer.is_finished() && tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }

    // a newer connection may have taken over this peer id
    if let Some(current) = hub.client(&peer_id) {
        if current.owns_socket(&handle) {
            hub.unregister_client(&current).await;
        }
    }
    debug!(peer = %peer_id, "WebSocket closed");
    Ok(())
}

/// Read frames until the peer goes away. Returns the reason to close
/// with when the relay ends the connection.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    peer_id: &str,
    params: &ConnectParams,
    handle: &mpsc::WeakSender<String>,
    writer: &mut JoinHandle<()>,
) -> Option<&'static str> {
    let hub = &state.hub;

    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = &mut *writer => return None,
        };

        let text = match frame {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return None,
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
            Some(Ok(Message::Ping(_))) => {
                if let Some(client) = hub.client(peer_id) {
                    hub.touch(&client).await;
                }
                continue;
            }
            Some(Ok(Message::Pong(_))) => continue,
        };

        let messages = match ClientMessage::parse_many(&text) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(peer = %peer_id, error = %e, "Failed to parse message");
                return Some("invalid message");
            }
        };

        let client = match hub.client(peer_id) {
            Some(client) => client,
            None => {
                // unregistered while the socket stayed open
                let Some(outbound) = handle.upgrade() else {
                    return None;
                };
                let client = Client::socket(peer_id, state.client_options(params), outbound);
                hub.register(client.clone()).await;
                client
            }
        };

        for msg in messages {
            hub.route_message(msg, peer_id, Some(&client)).await;
        }
    }
}

/// Forward outbound messages to the socket until the client drops its
/// sender or the reader asks to close
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<String>,
    mut close: oneshot::Receiver<&'static str>,
) {
    loop {
        tokio::select! {
            msg = outbound.recv() => match msg {
                Some(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },
            reason = &mut close => {
                if let Ok(reason) = reason {
                    let _ = sink.send(close_frame(reason)).await;
                }
                return;
            }
        }
    }
}
