//! Chain-RPC DEX fetcher (Solana-style AMM markets)
//!
//! Reads the market's two token vault balances over plain JSON-RPC
//! (`getTokenAccountBalance`) and derives the spot price as the ratio of
//! quote to base reserves. Vault balances carry no 24h volume, so these
//! observations always report volume 0.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::{Chain, Source};
use crate::types::PricePoint;

use super::{ensure_success, observation, FetchError, PairContext};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<RpcResult>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcResult {
    value: TokenAmount,
}

#[derive(Debug, Deserialize)]
struct TokenAmount {
    amount: String,
    decimals: u32,
    #[serde(rename = "uiAmount")]
    ui_amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

async fn vault_balance(http: &Client, rpc_url: &str, account: &str) -> Result<f64, FetchError> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "getTokenAccountBalance",
        "params": [account],
    });
    let resp = ensure_success(http.post(rpc_url).json(&body).send().await?).await?;
    let parsed: RpcResponse = resp.json().await?;

    if let Some(err) = parsed.error {
        return Err(FetchError::MissingData(format!(
            "rpc error {} for {account}: {}",
            err.code, err.message
        )));
    }
    let value = parsed
        .result
        .ok_or_else(|| FetchError::MissingData(format!("no balance for {account}")))?
        .value;

    match value.ui_amount {
        Some(amount) => Ok(amount),
        None => value
            .amount
            .parse::<f64>()
            .map(|raw| raw / 10f64.powi(value.decimals as i32))
            .map_err(|_| FetchError::MissingData(format!("unparseable balance for {account}"))),
    }
}

pub(super) async fn fetch_market_price(
    http: &Client,
    source: &Source,
    chain: Option<&Chain>,
    _ctx: &PairContext,
) -> Result<PricePoint, FetchError> {
    let chain = chain
        .ok_or_else(|| FetchError::ConfigMismatch("dex_rpc source without a chain".into()))?;
    let rpc_url = chain
        .rpc_endpoints
        .first()
        .ok_or_else(|| {
            FetchError::ConfigMismatch(format!("chain {} has no RPC endpoints", chain.id))
        })?;
    let base_vault = source
        .base_vault
        .as_deref()
        .ok_or_else(|| FetchError::ConfigMismatch("dex_rpc source without baseVault".into()))?;
    let quote_vault = source
        .quote_vault
        .as_deref()
        .ok_or_else(|| FetchError::ConfigMismatch("dex_rpc source without quoteVault".into()))?;

    let (base_balance, quote_balance) = tokio::join!(
        vault_balance(http, rpc_url, base_vault),
        vault_balance(http, rpc_url, quote_vault),
    );
    let base_balance = base_balance?;
    let quote_balance = quote_balance?;

    if base_balance <= 0.0 {
        return Err(FetchError::MissingData(format!(
            "empty base vault {base_vault}"
        )));
    }
    let price = quote_balance / base_balance;
    if !price.is_finite() || price <= 0.0 {
        return Err(FetchError::MissingData(format!(
            "degenerate reserves for market {}",
            source.id
        )));
    }

    Ok(observation(source, price, 0.0))
}
