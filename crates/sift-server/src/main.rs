//! Sift compile server
//!
//! Accepts discover requests over HTTP and returns the compiled query plan.
//! Execution is left to the caller.

use std::sync::Arc;

use anyhow::Context;
use sift_registry::FunctionRegistry;
use tracing::info;

mod config;
mod logging;
mod metrics;
mod routes;

use config::Config;
use metrics::Metrics;
use routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let path = std::env::var("SIFT_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = if std::path::Path::new(&path).exists() {
        Config::load(&path).with_context(|| format!("loading {}", path))?
    } else {
        let mut config = Config::default();
        config.apply_env(|name| std::env::var(name).ok())?;
        config
    };
    logging::init(&config.logging)?;

    let state = Arc::new(AppState {
        catalog: config.catalog.clone(),
        registry: FunctionRegistry::builtin(),
        limits: config.limits,
        metrics: Metrics::new()?,
    });
    info!(
        projects = state.catalog.projects.len(),
        releases = state.catalog.releases.len(),
        registry_version = state.registry.version(),
        "Catalog loaded"
    );

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {}", address))?;
    info!("Starting sift server on {}", address);
    axum::serve(listener, routes::router(state)).await?;
    Ok(())
}
