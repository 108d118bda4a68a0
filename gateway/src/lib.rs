//! HTTP surface of the OpenClaw gateway.

pub mod admission;
pub mod errors;
mod flags;
pub mod handlers;
pub mod payments;
pub mod state;
mod streaming;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use axum::routing::post;

pub use flags::OPENCLAW_LISTEN_ADDR;
pub use state::AppState;
pub use state::GatewayConfig;

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/responses", post(handlers::responses))
        .route("/v1/models", get(handlers::models))
        .route("/health", get(handlers::health))
        .with_state(state)
}

/// Serve until the listener fails or the process is shut down.
pub async fn serve(state: Arc<AppState>, listener: tokio::net::TcpListener) -> std::io::Result<()> {
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}
