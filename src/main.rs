//! Oracle service binary
//!
//! Loads and validates the configuration graph, builds the engine and
//! serves the HTTP API.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use priceoracle::api;
use priceoracle::config::{load_config_graph, AppConfig};
use priceoracle::oracle::PriceOracle;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = AppConfig::load()?;
    tracing::info!("starting price oracle: {}", settings.digest());

    let graph = load_config_graph(Path::new(&settings.oracle.config_dir))
        .context("failed to load configuration graph")?;
    tracing::info!(
        chains = graph.chains.len(),
        assets = graph.assets.len(),
        sources = graph.sources.len(),
        feeds = graph.pairs.len(),
        "✅ Configuration loaded"
    );

    let oracle = Arc::new(PriceOracle::new(Arc::new(graph), &settings.oracle)?);
    let app = api::create_router(oracle);

    let addr = format!("{}:{}", settings.server.bind, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "API server listening");

    axum::serve(listener, app)
        .await
        .context("API server failed")?;
    Ok(())
}
