use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use openclaw_gateway::AppState;
use openclaw_gateway::OPENCLAW_LISTEN_ADDR;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let state = Arc::new(AppState::from_env()?);
    let addr = *OPENCLAW_LISTEN_ADDR;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr, "openclaw gateway listening");
    tokio::select! {
        result = openclaw_gateway::serve(state, listener) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received; shutting down");
        }
    }
    Ok(())
}
