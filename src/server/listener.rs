//! Viewer-facing HTTP server
//!
//! Serves the WebSocket endpoint viewers attach to and, optionally, the
//! static player assets. Each upgraded socket gets its own task.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tower_http::services::ServeDir;

use crate::error::Result;
use crate::hub::HubHandle;
use crate::server::config::ServerConfig;
use crate::server::connection::serve_viewer;

/// Path of the viewer WebSocket endpoint
pub const WEBSOCKET_PATH: &str = "/websocket";

/// State shared by every request handler
#[derive(Clone)]
struct AppState {
    hub: HubHandle,
    config: Arc<ServerConfig>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

/// Relay server
pub struct RelayServer {
    config: Arc<ServerConfig>,
    hub: HubHandle,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl RelayServer {
    /// Create a new server that attaches viewers to `hub`
    pub fn new(config: ServerConfig, hub: HubHandle) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config: Arc::new(config),
            hub,
            connection_semaphore,
        }
    }

    /// Build the request router
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            config: Arc::clone(&self.config),
            connection_semaphore: self.connection_semaphore.clone(),
        };

        let mut app = Router::new()
            .route(WEBSOCKET_PATH, get(websocket_handler))
            .with_state(state);

        if let Some(dir) = &self.config.static_dir {
            tracing::info!(dir = %dir.display(), "Serving player assets");
            app = app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
        }

        app
    }

    /// Run the server
    ///
    /// This method blocks until the server fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, path = WEBSOCKET_PATH, "Relay server listening");

        let app = self.router();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

        Ok(())
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    // Check connection limit
    let permit = if let Some(ref sem) = state.connection_semaphore {
        match sem.clone().try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
        }
    } else {
        None
    };

    let write_timeout = state.config.write_timeout;
    let hub = state.hub;

    ws.on_failed_upgrade(move |e| {
        tracing::debug!(peer = %peer_addr, error = %e, "WebSocket upgrade failed");
    })
    .on_upgrade(move |socket| async move {
        let _permit = permit;
        serve_viewer(socket, peer_addr, hub, write_timeout).await;
    })
}
