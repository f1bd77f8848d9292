pub mod error;
pub mod params;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use log::info;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::extract::Extractor;

pub use params::RequestDefaults;

#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<Extractor>,
    pub defaults: RequestDefaults,
    /// Cancelled on shutdown; every extraction runs under a child token.
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState, upload_limit: usize) -> Router {
    Router::new()
        .route("/", get(routes::index))
        .route("/extract", post(routes::extract))
        .route("/upload", post(routes::upload))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP server until `state.shutdown` is cancelled.
pub async fn run_server(
    addr: SocketAddr,
    state: AppState,
    upload_limit: usize,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let shutdown = state.shutdown.clone();
    let app = router(state, upload_limit);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("[server] listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
