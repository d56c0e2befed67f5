//! Relay HTTP/WebSocket server

use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

use crate::config::RelayConfig;
use crate::error::TransportError;
use crate::relay::handlers;
use crate::relay::session::SessionRegistry;
use crate::relay::websocket::ws_handler;

/// Shared state passed to all request handlers
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub config: RelayConfig,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new(config.listener_queue_frames)),
            config,
            started_at: Instant::now(),
        }
    }
}

/// WebSocket relay plus its JSON API
pub struct RelayServer {
    state: Arc<AppState>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            state: Arc::new(AppState::new(config)),
        }
    }

    /// Registry handle, for inspecting live streams
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.state.registry.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .route("/api/status", get(handlers::get_status))
            .route("/api/streams", get(handlers::list_streams))
            .route("/api/streams/:id", get(handlers::get_stream))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until the process ends
    pub async fn run(self) -> Result<(), TransportError> {
        let addr = self.state.config.socket_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{}: {}", addr, e)))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<(), TransportError> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Relay listening on ws://{}/", addr);
        }

        axum::serve(listener, self.router())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
    }

    /// Serve in a background task
    pub fn start_background(self, listener: TcpListener) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.serve(listener).await {
                tracing::error!("Relay server error: {}", e);
            }
        })
    }
}
