//! HTTP front door for the gateway.
//!
//! - `POST /query`: submit a request, answer with its current snapshot
//! - `GET /health`: liveness

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;

use crate::gateway::Gateway;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    /// Flips to true on shutdown; in-flight submissions are cancelled.
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>, shutdown: watch::Receiver<bool>) -> Self {
        Self { gateway, shutdown }
    }
}

/// Serve until `shutdown` turns true.
pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let mut shutdown = state.shutdown.clone();
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            // Without a sender left nobody can stop us.
            if shutdown.wait_for(|stop| *stop).await.is_err() {
                std::future::pending::<()>().await;
            }
            tracing::info!("Server shutting down");
        })
        .await?;

    Ok(())
}
