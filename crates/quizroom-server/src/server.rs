use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::client::{self, ClientRegistry, Heartbeat};
use crate::handlers::HandlerState;
use crate::routes;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat: Heartbeat,
    pub cleanup_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            max_send_queue: 256,
            heartbeat: Heartbeat::default(),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
    pub client_registry: Arc<ClientRegistry>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(routes::health))
        .route(
            "/api/quizzes",
            get(routes::list_quizzes).post(routes::create_quiz),
        )
        .route("/api/quizzes/{quiz_id}/host", post(routes::host_quiz))
        .route("/api/join", post(routes::lookup_join_code))
        .route("/auth/register", post(routes::register))
        .route("/auth/login", post(routes::login))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps it running.
pub async fn start(
    config: ServerConfig,
    handler_state: Arc<HandlerState>,
) -> Result<ServerHandle, std::io::Error> {
    let client_registry = Arc::new(ClientRegistry::new(
        config.max_send_queue,
        config.heartbeat,
    ));

    let _cleanup = client::start_cleanup_task(Arc::clone(&client_registry), config.cleanup_interval);

    let app_state = AppState {
        handler_state,
        client_registry,
    };

    let router = build_router(app_state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "Quizroom server started");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "HTTP server stopped");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
        _cleanup,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self._server.abort();
        self._cleanup.abort();
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client, channels) = state.client_registry.register();
    tracing::info!(client_id = %client.id(), "WebSocket client connected");

    client::handle_ws_connection(
        socket,
        client,
        channels,
        state.client_registry,
        state.handler_state,
    )
    .await;
}
