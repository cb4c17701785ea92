pub mod auth;
pub mod config;
pub mod connections;
pub mod error;
pub mod notifications;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{AppError, Result};
pub use routes::app;
pub use state::State;

/// Serves the API on an already bound listener until `shutdown` resolves.
pub async fn serve(
    listener: std::net::TcpListener,
    state: State,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::Server::from_tcp(listener)?
        .serve(app(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
