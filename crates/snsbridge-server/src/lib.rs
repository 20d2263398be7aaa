//! HTTP surface of the bridge
//!
//! Two routes: `/status` answers readiness probes (the subscription task's
//! own polling included), and `/` feeds every inbound body through the
//! notification router. Classified payloads answer 200 with the router's
//! message; routing failures surface as a 500 so the provider's delivery
//! retry policy kicks in.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use snsbridge_router::{route, RouterState};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// The local HTTP server hosting the notification callback endpoint.
pub struct BridgeServer {
    bind_addr: SocketAddr,
    state: Arc<RouterState>,
}

impl BridgeServer {
    pub fn new(bind_addr: SocketAddr, state: Arc<RouterState>) -> Self {
        Self { bind_addr, state }
    }

    /// Build the router with all routes.
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/status", get(status))
            .route("/", get(root).post(root))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the listener, signal readiness, and serve until the process
    /// shuts down. The readiness flip is what releases the subscription
    /// task from its `AwaitingReady` state.
    pub async fn serve(self, ready: watch::Sender<bool>) -> Result<(), ServerError> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.bind_addr,
                source,
            })?;
        info!("Listening on {}", self.bind_addr);

        let _ = ready.send(true);

        axum::serve(listener, self.build_router())
            .await
            .map_err(ServerError::Serve)
    }
}

/// Health endpoint used for readiness polling.
async fn status() -> &'static str {
    "Healthy"
}

/// Feed the raw body through the notification router.
async fn root(State(state): State<Arc<RouterState>>, body: Bytes) -> Response {
    match route(&state, &body).await {
        Ok(msg) => (StatusCode::OK, msg).into_response(),
        Err(err) => {
            error!("Failed to route inbound payload: {err:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}
