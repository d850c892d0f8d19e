//! HTTP and WebSocket front end
//!
//! Endpoints:
//! - GET /health - liveness probe
//! - GET /info, /count, /total_count, /version - stats (token guarded)
//! - GET /?id= - long poll (or WebSocket upgrade)
//! - POST /?id= - push messages from a polling client
//! - WebSocket upgrade on any other path

mod http;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::{RelayConfig, ServerSettings};
use crate::error::{Error, Result};
use crate::peer::{ClientOptions, Hub};

/// Shortest accepted peer id
pub const MIN_PEER_ID_LEN: usize = 6;

/// Query flag value that opts a client into compaction
const COMPACT_VERSION: &str = "1";

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    hub: Arc<Hub>,
    server: Arc<ServerSettings>,
    polling_linger: Duration,
    polling_hold: Duration,
    polling_queue_size: usize,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(hub: Arc<Hub>, config: &RelayConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            hub,
            server: Arc::new(config.server.clone()),
            polling_linger: config.relay.polling_linger(),
            polling_hold: config.relay.polling_hold(),
            polling_queue_size: config.relay.polling_queue_size,
            started_at,
        }
    }

    fn client_options(&self, params: &ConnectParams) -> ClientOptions {
        ClientOptions {
            compact: self.server.compaction_enabled && params.c.as_deref() == Some(COMPACT_VERSION),
            batchable: params.b.as_deref().is_some_and(|b| !b.is_empty()),
            device: params.p.clone().filter(|p| !p.is_empty()),
            polling_linger: self.polling_linger,
            polling_queue_size: self.polling_queue_size,
        }
    }
}

/// Query string of connect, poll and stats requests
#[derive(Debug, Default, Clone, Deserialize)]
pub(crate) struct ConnectParams {
    id: Option<String>,
    /// Compaction version the client understands
    c: Option<String>,
    /// Non-empty when the client accepts merged `signals` messages
    b: Option<String>,
    /// Device tag
    p: Option<String>,
    token: Option<String>,
    hello: Option<String>,
}

impl ConnectParams {
    /// The peer id, if long enough to be valid
    fn peer_id(&self) -> Option<&str> {
        self.id
            .as_deref()
            .filter(|id| id.chars().count() >= MIN_PEER_ID_LEN)
    }
}

/// Build the router for one relay process
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(http::health))
        .route("/info", get(http::info))
        .route("/count", get(http::count))
        .route("/total_count", get(http::total_count))
        .route("/version", get(http::version_info))
        .route("/", get(http::root).post(http::push))
        .fallback(ws::fallback)
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────

/// Listeners for every configured bind address, serving one router
pub struct Server {
    listeners: Vec<TcpListener>,
    router: Router,
}

impl Server {
    /// Bind every address in `[server] bind`
    pub async fn bind(bind: &[String], state: AppState) -> Result<Self> {
        let mut listeners = Vec::with_capacity(bind.len());
        for addr in bind {
            let listener = TcpListener::bind(addr.as_str()).await.map_err(|e| Error::Server {
                bind: addr.clone(),
                message: e.to_string(),
            })?;
            listeners.push(listener);
        }

        Ok(Self {
            listeners,
            router: router(state),
        })
    }

    /// Addresses actually bound (resolves port 0)
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok())
            .collect()
    }

    /// Serve until `shutdown` turns true
    pub async fn serve(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut tasks = JoinSet::new();

        for listener in self.listeners {
            let addr = listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".into());
            let router = self.router.clone();
            let mut shutdown = shutdown.clone();

            info!(addr = %addr, "Listening");
            tasks.spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.wait_for(|stop| *stop).await;
                    })
                    .await
                    .map_err(|e| Error::Server {
                        bind: addr,
                        message: e.to_string(),
                    })
            });
        }

        let mut result = Ok(());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "Listener stopped");
                    result = Err(e);
                }
                Err(e) => {
                    warn!(error = %e, "Listener task failed");
                    result = Err(Error::Internal(e.to_string()));
                }
            }
        }
        result
    }
}
