//! Long-poll and stats handlers

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::{debug, trace};

use super::{ws, AppState, ConnectParams};
use crate::error::Error;
use crate::peer::{Client, Hub, PollAttach};
use crate::protocol::ClientMessage;
use crate::version;

fn json_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json; charset=utf-8")], body).into_response()
}

pub(super) async fn health() -> &'static str {
    "ok"
}

// ─────────────────────────────────────────────────────────────────
// Long Polling
// ─────────────────────────────────────────────────────────────────

/// `GET /`: a WebSocket upgrade or a long poll
pub(super) async fn root(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    match upgrade {
        Some(upgrade) => ws::upgrade(upgrade, state, params),
        None => poll(state, params).await,
    }
}

/// Unregisters the polling client if the request goes away before it is
/// answered
struct PollGuard {
    hub: Arc<Hub>,
    client: Option<Arc<Client>>,
}

impl PollGuard {
    fn disarm(mut self) {
        self.client = None;
    }
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        if !client.abort_poll() {
            return;
        }
        debug!(peer = %client.peer_id(), "Poll aborted");
        let hub = self.hub.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                hub.unregister_client(&client).await;
            });
        }
    }
}

async fn poll(state: AppState, params: ConnectParams) -> Response {
    let Some(peer_id) = params.peer_id() else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let hub = &state.hub;

    let client = match hub.client(peer_id) {
        Some(client) if !client.is_polling() => return StatusCode::CONFLICT.into_response(),
        Some(client) => {
            hub.touch(&client).await;
            client
        }
        None => {
            let client = Client::polling(peer_id, state.client_options(&params));
            hub.register(client.clone()).await;
            client
        }
    };

    let rx = match client.attach_poll() {
        Ok(PollAttach::Ready(body)) => return json_response(body),
        Ok(PollAttach::Wait(rx)) => rx,
        Err(Error::PollConflict { .. }) => return StatusCode::CONFLICT.into_response(),
        Err(e) => {
            debug!(peer = %peer_id, error = %e, "Poll rejected");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let guard = PollGuard {
        hub: hub.clone(),
        client: Some(client.clone()),
    };
    let body = tokio::select! {
        body = rx => body.ok(),
        _ = tokio::time::sleep(state.polling_hold) => {
            trace!(peer = %peer_id, "Poll reached hold timeout");
            client.release_poll()
        }
    };
    guard.disarm();

    json_response(body.unwrap_or_default())
}

/// `POST /`: messages from a polling client
pub(super) async fn push(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    body: String,
) -> Response {
    let Some(peer_id) = params.peer_id() else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let hub = &state.hub;

    // the sender may be polling on another process
    let client = hub.client(peer_id);
    if client.as_ref().is_some_and(|c| !c.is_polling()) {
        return StatusCode::CONFLICT.into_response();
    }

    if params.hello.is_some() {
        return json_response(json!({"ver": version::protocol_version()}).to_string());
    }

    let items = match serde_json::from_str::<Value>(&body) {
        Ok(Value::Array(items)) => items,
        _ => {
            trace!(peer = %peer_id, "Ignoring body that is not a message array");
            return StatusCode::OK.into_response();
        }
    };

    for item in items {
        match ClientMessage::from_value(item) {
            Ok(msg) => hub.route_message(msg, peer_id, client.as_ref()).await,
            Err(e) => trace!(peer = %peer_id, error = %e, "Dropping malformed message"),
        }
    }
    StatusCode::OK.into_response()
}

// ─────────────────────────────────────────────────────────────────
// Stats
// ─────────────────────────────────────────────────────────────────

fn stats_allowed(state: &AppState, params: &ConnectParams) -> bool {
    if !state.server.stats_enabled {
        return false;
    }
    match state.server.stats_token.as_deref() {
        None | Some("") => true,
        Some(token) => params.token.as_deref() == Some(token),
    }
}

fn local_and_remote(hub: &Hub) -> u64 {
    hub.client_count() as u64 + hub.nodes().total_client_count()
}

pub(super) async fn info(State(state): State<AppState>, Query(params): Query<ConnectParams>) -> Response {
    if !stats_allowed(&state, &params) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let hub = &state.hub;
    let body = json!({
        "version": env!("CARGO_PKG_VERSION"),
        "node_address": hub.directory().self_address(),
        "current_connections": hub.client_count(),
        "total_connections": local_and_remote(hub),
        "num_instance": hub.nodes().alive_count(),
        "directory_healthy": hub.directory().is_healthy(),
        "compact_enabled": state.server.compaction_enabled,
        "started_at": state.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        "uptime_secs": (Utc::now() - state.started_at).num_seconds().max(0),
    });
    json_response(body.to_string())
}

pub(super) async fn count(State(state): State<AppState>, Query(params): Query<ConnectParams>) -> Response {
    if !stats_allowed(&state, &params) {
        return StatusCode::FORBIDDEN.into_response();
    }
    json_response(state.hub.client_count().to_string())
}

pub(super) async fn total_count(State(state): State<AppState>, Query(params): Query<ConnectParams>) -> Response {
    if !stats_allowed(&state, &params) {
        return StatusCode::FORBIDDEN.into_response();
    }
    json_response(local_and_remote(&state.hub).to_string())
}

pub(super) async fn version_info(State(state): State<AppState>, Query(params): Query<ConnectParams>) -> Response {
    if !stats_allowed(&state, &params) {
        return StatusCode::FORBIDDEN.into_response();
    }
    env!("CARGO_PKG_VERSION").into_response()
}
