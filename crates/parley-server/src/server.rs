//! `ParleyServer`: axum router, shared state and the serve loop.

use std::net::SocketAddr;
use std::time::Instant;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post, put};
use parley_fanout::LocalHub;
use parley_runtime::Orchestrator;
use parley_settings::ServerSettings;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::routes;
use crate::ws::{self, Connections};

/// Largest accepted request body; image uploads arrive base64-encoded.
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Message lifecycle.
    pub orchestrator: Orchestrator,
    /// Local delivery feeding WebSocket subscribers.
    pub hub: LocalHub,
    /// When the server started.
    pub start_time: Instant,
    /// Open WebSocket subscriptions.
    pub connections: Connections,
}

/// The HTTP + WebSocket surface.
pub struct ParleyServer {
    settings: ServerSettings,
    state: AppState,
}

impl ParleyServer {
    /// Server over an orchestrator. Subscribers read from the
    /// orchestrator's fan-out hub.
    pub fn new(settings: ServerSettings, orchestrator: Orchestrator) -> Self {
        let hub = orchestrator.fanout().hub().clone();
        Self {
            settings,
            state: AppState {
                orchestrator,
                hub,
                start_time: Instant::now(),
                connections: Connections::default(),
            },
        }
    }

    /// Build the router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(routes::health))
            .route("/api/chats", post(routes::create_chat))
            .route("/api/chats/{chat_id}/messages", post(routes::create_message))
            .route("/api/messages/{id}", put(routes::edit_message).delete(routes::delete_message))
            .route("/api/messages/{id}/switch", post(routes::switch_model))
            .route("/api/messages/{id}/call-other", post(routes::call_other_model))
            .route("/api/messages/{id}/cancel", post(routes::cancel_message))
            .route("/ws/chats/{chat_id}", get(ws::chat_socket))
            .route("/ws/documents", get(ws::document_socket))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors_layer(&self.settings.cors_origins))
                    .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
            )
            .with_state(self.state.clone())
    }

    /// Bind address from the settings.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }

    /// Open WebSocket subscriptions.
    pub fn connections(&self) -> &Connections {
        &self.state.connections
    }

    /// Get the server settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Serve on `listener` until `shutdown` fires. In-flight requests are
    /// allowed to finish.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> std::io::Result<()> {
        let local: Option<SocketAddr> = listener.local_addr().ok();
        info!(addr = ?local, "listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    }
}

/// CORS for the configured origins; an empty list allows any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}
