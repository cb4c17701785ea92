use std::env;
use std::net::TcpListener;

use anyhow::Context;
use konnect_server::{Config, State};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("konnect_server=info,tower_http=info")),
        )
        .init();

    let mut config = Config::load()?;
    if let Some(p) = env::args().nth(1) {
        config.port = p.parse().with_context(|| format!("Invalid port argument {p:?}"))?;
    }

    let state = State::open(&config)?;
    let listener = TcpListener::bind(config.bind_address())
        .with_context(|| format!("Failed to bind {}", config.bind_address()))?;
    konnect_server::serve(listener, state.clone(), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("shutting down");
    })
    .await?;
    state.flush().await?;
    Ok(())
}
