//! Source fetchers (CEX tickers, DEX subgraphs, chain RPC)
//!
//! One fetch routine per source kind, all normalising to a `PricePoint`.
//! Dispatch is a closed match on the source's kind tag so adding a kind
//! forces every call site to handle it.

mod cex;
mod dex_rpc;
mod subgraph;

use reqwest::Client;
use thiserror::Error;

use crate::config::{Chain, Source, SourceKind};
use crate::types::PricePoint;

/// Asset-pair context handed to every fetcher. Exchange-specific pair
/// strings (BTCUSDT, ETH-USD, XBTUSDT) are composed inside the fetchers.
#[derive(Debug, Clone)]
pub struct PairContext {
    pub base: String,
    pub quote: String,
}

/// Per-source failure. Never propagates past the orchestrator; it becomes a
/// `fetch_error` observation in the detail cache.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    #[error("unparseable price {0:?}")]
    ParsePrice(String),

    #[error("source/pair configuration mismatch: {0}")]
    ConfigMismatch(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("missing data: {0}")]
    MissingData(String),
}

/// Fetch one observation from a source for the given pair.
pub async fn fetch_observation(
    http: &Client,
    source: &Source,
    chain: Option<&Chain>,
    ctx: &PairContext,
) -> Result<PricePoint, FetchError> {
    match source.kind {
        SourceKind::CexTicker => cex::fetch_ticker(http, source, ctx).await,
        SourceKind::DexSubgraphPool => subgraph::fetch_pool_price(http, source, ctx).await,
        SourceKind::DexSubgraphBundle => subgraph::fetch_bundle_eth_price(http, source, ctx).await,
        SourceKind::DexRpc => dex_rpc::fetch_market_price(http, source, chain, ctx).await,
    }
}

/// Reject a non-2xx response, keeping a truncated body for diagnostics.
async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let body = body.chars().take(256).collect();
    Err(FetchError::Http {
        status: status.as_u16(),
        body,
    })
}

/// Parse a price field; anything non-finite or non-positive is an error.
fn parse_price(raw: &str) -> Result<f64, FetchError> {
    match raw.trim().parse::<f64>() {
        Ok(price) if price.is_finite() && price > 0.0 => Ok(price),
        _ => Err(FetchError::ParsePrice(raw.to_string())),
    }
}

/// Parse a volume field; garbage degrades to 0.0 with a warning since a
/// missing volume only weakens the weighting, it does not invalidate the
/// price.
fn parse_volume(source_id: &str, raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(volume) if volume.is_finite() && volume >= 0.0 => volume,
        _ => {
            tracing::warn!(
                source = %source_id,
                raw = %raw,
                "non-numeric volume, treating as 0"
            );
            0.0
        }
    }
}

/// A fresh observation in the `pending` state, stamped with the current
/// wall-clock time.
fn observation(source: &Source, price: f64, volume: f64) -> PricePoint {
    PricePoint {
        source: source.id.clone(),
        price,
        volume,
        timestamp: chrono::Utc::now(),
        weight: 0.0,
        status: crate::types::PriceStatus::Pending,
    }
}

/// API key lookup: resolves the env var named on the source, if any.
fn api_key(source: &Source) -> Option<String> {
    source
        .api_key_env_var
        .as_ref()
        .and_then(|name| std::env::var(name).ok())
        .filter(|key| !key.is_empty())
}
