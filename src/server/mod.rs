mod handlers;
mod routes;

pub use routes::{create_router, ApiDoc};

use crate::app_state::AppState;
use crate::error::{Result, ServerError};
use axum_server::Handle;
use std::net::SocketAddr;
use std::sync::Arc;

/// Serves the API until `handle` is told to shut down.
pub async fn run_server(app_state: Arc<AppState>, handle: Handle) -> Result<()> {
    let app: axum::Router = create_router(app_state.clone());

    let settings = app_state.config.get();
    let addr = SocketAddr::new(
        settings
            .server
            .host
            .parse()
            .map_err(|e| ServerError::Init(format!("Invalid host: {}", e)))?,
        settings.server.port,
    );
    tracing::info!("Listening on {}", addr);
    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .map_err(|e| ServerError::Init(format!("Server error: {}", e)))?;

    Ok(())
}
