//! DEX subgraph fetchers (The Graph)
//!
//! Two query methods: a per-pool price lookup and the subgraph-global
//! ETH/USD bundle. Both POST GraphQL and read string-encoded decimals.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::Source;
use crate::types::PricePoint;

use super::{api_key, ensure_success, observation, parse_price, parse_volume, FetchError, PairContext};

const POOL_QUERY: &str = "query Pool($id: ID!) { pool(id: $id) { \
    token0Price token1Price volumeUSD \
    token0 { symbol } token1 { symbol } } }";

const BUNDLE_QUERY: &str = "{ bundle(id: \"1\") { ethPriceUSD } }";

/// Quote assets accepted as a USD proxy for the bundle query.
const USD_QUOTES: &[&str] = &["USD", "USDC", "USDT", "DAI", "BUSD"];

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct PoolData {
    pool: Option<Pool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pool {
    token0_price: String,
    token1_price: String,
    #[serde(rename = "volumeUSD")]
    volume_usd: String,
    token0: PoolToken,
    token1: PoolToken,
}

#[derive(Debug, Deserialize)]
struct PoolToken {
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct BundleData {
    bundle: Option<Bundle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bundle {
    #[serde(rename = "ethPriceUSD")]
    eth_price_usd: String,
}

/// Pools hold wrapped assets; fold the common wrappers onto the symbols
/// feeds are configured with before comparing.
fn canonical(symbol: &str) -> String {
    let upper = symbol.to_uppercase();
    match upper.as_str() {
        "WETH" => "ETH".to_string(),
        "WBTC" => "BTC".to_string(),
        "WSOL" => "SOL".to_string(),
        "WMATIC" => "MATIC".to_string(),
        _ => upper,
    }
}

fn subgraph_url(source: &Source) -> Result<String, FetchError> {
    let base_url = source
        .base_url
        .as_deref()
        .ok_or_else(|| FetchError::ConfigMismatch("subgraph source without baseUrl".into()))?
        .trim_end_matches('/');
    Ok(match &source.subgraph_id {
        Some(id) => format!("{base_url}/{id}"),
        None => base_url.to_string(),
    })
}

async fn post_query<T: serde::de::DeserializeOwned>(
    http: &Client,
    source: &Source,
    body: serde_json::Value,
) -> Result<T, FetchError> {
    let mut request = http.post(subgraph_url(source)?).json(&body);
    if let Some(key) = api_key(source) {
        request = request.bearer_auth(key);
    }
    let resp = ensure_success(request.send().await?).await?;
    let parsed: GraphQlResponse<T> = resp.json().await?;
    if let Some(err) = parsed.errors.first() {
        return Err(FetchError::MissingData(format!(
            "subgraph error: {}",
            err.message
        )));
    }
    parsed
        .data
        .ok_or_else(|| FetchError::MissingData("subgraph response without data".into()))
}

/// Price of the configured pool, quoted in the feed's quote asset.
///
/// The subgraph reports `token0Price` (token0 per token1) and `token1Price`
/// (token1 per token0); which one is the pair price depends on the pool's
/// token ordering, so the quote asset is matched against both tokens and the
/// orientation picked accordingly. A pool that does not hold the requested
/// pair is a configuration mismatch, not a price of anything.
pub(super) async fn fetch_pool_price(
    http: &Client,
    source: &Source,
    ctx: &PairContext,
) -> Result<PricePoint, FetchError> {
    let pool_address = source
        .pool_address
        .as_deref()
        .ok_or_else(|| FetchError::ConfigMismatch("pool source without poolAddress".into()))?;

    let body = json!({
        "query": POOL_QUERY,
        "variables": { "id": pool_address.to_lowercase() },
    });
    let data: PoolData = post_query(http, source, body).await?;
    let pool = data
        .pool
        .ok_or_else(|| FetchError::MissingData(format!("pool {pool_address} not found")))?;

    let token0 = canonical(&pool.token0.symbol);
    let token1 = canonical(&pool.token1.symbol);
    let base = canonical(&ctx.base);
    let quote = canonical(&ctx.quote);

    let raw_price = if token0 == base && token1 == quote {
        &pool.token1_price
    } else if token0 == quote && token1 == base {
        &pool.token0_price
    } else {
        return Err(FetchError::ConfigMismatch(format!(
            "pool holds {token0}/{token1}, feed wants {base}/{quote}"
        )));
    };

    let price = parse_price(raw_price)?;
    let volume = parse_volume(&source.id, &pool.volume_usd);
    Ok(observation(source, price, volume))
}

/// The subgraph-global ETH/USD price. Only meaningful when the feed is ETH
/// against a USD-quote asset; anything else is a configuration mismatch.
pub(super) async fn fetch_bundle_eth_price(
    http: &Client,
    source: &Source,
    ctx: &PairContext,
) -> Result<PricePoint, FetchError> {
    let base = canonical(&ctx.base);
    let quote = canonical(&ctx.quote);
    if base != "ETH" || !USD_QUOTES.contains(&quote.as_str()) {
        return Err(FetchError::ConfigMismatch(format!(
            "bundle query only prices ETH/USD, feed wants {base}/{quote}"
        )));
    }

    let data: BundleData = post_query(http, source, json!({ "query": BUNDLE_QUERY })).await?;
    let bundle = data
        .bundle
        .ok_or_else(|| FetchError::MissingData("bundle not found".into()))?;

    let price = parse_price(&bundle.eth_price_usd)?;
    Ok(observation(source, price, 0.0))
}
