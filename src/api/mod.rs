pub mod auth;
pub mod handlers;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{middleware, routing::get, Router};
use tracing::info;

use crate::crawler::JobScheduler;

/// Shared state of the Control API
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<JobScheduler>,
    pub api_token: Arc<str>,
}

impl AppState {
    pub fn new(scheduler: JobScheduler, api_token: &str) -> Self {
        Self {
            scheduler: Arc::new(scheduler),
            api_token: Arc::from(api_token),
        }
    }
}

/// `/scraper` and `/config` need a bearer token; `/health` does not
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/scraper",
            get(handlers::scraper_query)
                .post(handlers::scraper_command)
                .fallback(handlers::method_not_allowed),
        )
        .route(
            "/config",
            get(handlers::config_query)
                .post(handlers::config_command)
                .fallback(handlers::method_not_allowed),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_token));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .with_state(state)
}

/// Serve the Control API until Ctrl-C
pub async fn serve(bind: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .context(format!("Failed to bind control API to {}", bind))?;

    info!("Control API listening on {}", bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Control API server failed")?;

    info!("Control API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
