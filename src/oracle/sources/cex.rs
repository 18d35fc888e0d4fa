//! CEX ticker fetcher
//!
//! One GET per observation against a REST ticker endpoint. The pair string
//! is composed from a per-source template after applying per-source symbol
//! renames (Kraken's BTC -> XBT being the motivating case), so nonstandard
//! exchanges are a config change rather than a code change.

use std::collections::HashMap;

use reqwest::Client;
use serde::Deserialize;

use crate::config::{Source, TickerShape};
use crate::types::PricePoint;

use super::{api_key, ensure_success, observation, parse_price, parse_volume, FetchError, PairContext};

/// 24h ticker payload, Binance style. Prices and volumes arrive as strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Binance24hTicker {
    last_price: String,
    volume: String,
}

/// Spot price payload, Coinbase style. No volume on this endpoint.
#[derive(Debug, Deserialize)]
struct CoinbaseSpotResponse {
    data: CoinbaseSpotData,
}

#[derive(Debug, Deserialize)]
struct CoinbaseSpotData {
    amount: String,
}

/// Ticker payload, Kraken style: a result map keyed by Kraken's own pair
/// name, `c` = [last trade price, lot volume], `v` = [today, last 24h].
#[derive(Debug, Deserialize)]
struct KrakenTickerResponse {
    #[serde(default)]
    error: Vec<String>,
    #[serde(default)]
    result: HashMap<String, KrakenPairData>,
}

#[derive(Debug, Deserialize)]
struct KrakenPairData {
    c: Vec<String>,
    v: Vec<String>,
}

fn default_template(shape: TickerShape) -> &'static str {
    match shape {
        TickerShape::Binance24h => "{base}{quote}",
        TickerShape::CoinbaseSpot => "{base}-{quote}",
        TickerShape::KrakenTicker => "{base}{quote}",
    }
}

/// Compose the exchange-specific pair string: per-source renames first,
/// then the symbol template.
fn compose_symbol(source: &Source, shape: TickerShape, ctx: &PairContext) -> String {
    let rename = |symbol: &str| -> String {
        source
            .symbol_overrides
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| symbol.to_string())
    };
    let template = source
        .symbol_template
        .as_deref()
        .unwrap_or_else(|| default_template(shape));
    template
        .replace("{base}", &rename(&ctx.base))
        .replace("{quote}", &rename(&ctx.quote))
}

pub(super) async fn fetch_ticker(
    http: &Client,
    source: &Source,
    ctx: &PairContext,
) -> Result<PricePoint, FetchError> {
    let shape = source
        .ticker_shape
        .ok_or_else(|| FetchError::ConfigMismatch("CEX source without tickerShape".into()))?;
    let base_url = source
        .base_url
        .as_deref()
        .ok_or_else(|| FetchError::ConfigMismatch("CEX source without baseUrl".into()))?
        .trim_end_matches('/');

    let symbol = compose_symbol(source, shape, ctx);
    let url = match shape {
        TickerShape::Binance24h => format!("{base_url}/ticker/24hr?symbol={symbol}"),
        TickerShape::CoinbaseSpot => format!("{base_url}/prices/{symbol}/spot"),
        TickerShape::KrakenTicker => format!("{base_url}/0/public/Ticker?pair={symbol}"),
    };

    let mut request = http.get(&url);
    if let Some(key) = api_key(source) {
        request = match shape {
            TickerShape::Binance24h => request.header("X-MBX-APIKEY", key),
            _ => request.header("X-Api-Key", key),
        };
    }

    let resp = ensure_success(request.send().await?).await?;

    let (price, volume) = match shape {
        TickerShape::Binance24h => {
            let data: Binance24hTicker = resp.json().await?;
            (
                parse_price(&data.last_price)?,
                parse_volume(&source.id, &data.volume),
            )
        }
        TickerShape::CoinbaseSpot => {
            let data: CoinbaseSpotResponse = resp.json().await?;
            (parse_price(&data.data.amount)?, 0.0)
        }
        TickerShape::KrakenTicker => {
            let data: KrakenTickerResponse = resp.json().await?;
            if !data.error.is_empty() {
                return Err(FetchError::MissingData(data.error.join("; ")));
            }
            let pair = data
                .result
                .into_values()
                .next()
                .ok_or_else(|| FetchError::MissingData("empty Kraken result".into()))?;
            let last = pair
                .c
                .first()
                .ok_or_else(|| FetchError::MissingData("Kraken ticker without last trade".into()))?;
            let volume = pair
                .v
                .first()
                .map(|raw| parse_volume(&source.id, raw))
                .unwrap_or(0.0);
            (parse_price(last)?, volume)
        }
    };

    Ok(observation(source, price, volume))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceKind;
    use crate::types::PriceStatus;
    use httpmock::{Method::GET, MockServer};

    fn make_source(id: &str, shape: TickerShape, base_url: &str) -> Source {
        Source {
            id: id.to_string(),
            name: id.to_string(),
            kind: SourceKind::CexTicker,
            chain_id: None,
            base_url: Some(base_url.to_string()),
            subgraph_id: None,
            pool_address: None,
            base_vault: None,
            quote_vault: None,
            api_key_env_var: None,
            ticker_shape: Some(shape),
            symbol_template: None,
            symbol_overrides: HashMap::new(),
        }
    }

    fn make_ctx(base: &str, quote: &str) -> PairContext {
        PairContext {
            base: base.to_string(),
            quote: quote.to_string(),
        }
    }

    #[tokio::test]
    async fn test_binance_shape_happy_path() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/ticker/24hr")
                    .query_param("symbol", "ETHUSDC");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"lastPrice":"1646.96","volume":"355615.01"}"#);
            })
            .await;

        let source = make_source("binance_cex", TickerShape::Binance24h, &server.base_url());
        let http = Client::new();
        let point = fetch_ticker(&http, &source, &make_ctx("ETH", "USDC"))
            .await
            .unwrap();

        assert_eq!(point.source, "binance_cex");
        assert_eq!(point.price, 1646.96);
        assert_eq!(point.volume, 355615.01);
        assert_eq!(point.status, PriceStatus::Pending);
        mock.assert();
    }

    #[tokio::test]
    async fn test_coinbase_shape_has_no_volume() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/prices/ETH-USDC/spot");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"data":{"base":"ETH","currency":"USDC","amount":"1646.68"}}"#);
            })
            .await;

        let source = make_source("coinbase_cex", TickerShape::CoinbaseSpot, &server.base_url());
        let http = Client::new();
        let point = fetch_ticker(&http, &source, &make_ctx("ETH", "USDC"))
            .await
            .unwrap();

        assert_eq!(point.price, 1646.68);
        assert_eq!(point.volume, 0.0);
    }

    #[tokio::test]
    async fn test_kraken_shape_applies_symbol_override() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/0/public/Ticker")
                    .query_param("pair", "XBTUSDC");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(
                        r#"{"error":[],"result":{"XXBTZUSD":{"c":["50123.4","0.02"],"v":["12.5","98.7"]}}}"#,
                    );
            })
            .await;

        let mut source = make_source("kraken_cex", TickerShape::KrakenTicker, &server.base_url());
        source
            .symbol_overrides
            .insert("BTC".to_string(), "XBT".to_string());
        let http = Client::new();
        let point = fetch_ticker(&http, &source, &make_ctx("BTC", "USDC"))
            .await
            .unwrap();

        assert_eq!(point.price, 50123.4);
        assert_eq!(point.volume, 12.5);
        mock.assert();
    }

    #[tokio::test]
    async fn test_custom_symbol_template() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/ticker/24hr")
                    .query_param("symbol", "ETH_USDC");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"lastPrice":"1646.0","volume":"1.0"}"#);
            })
            .await;

        let mut source = make_source("custom_cex", TickerShape::Binance24h, &server.base_url());
        source.symbol_template = Some("{base}_{quote}".to_string());
        let http = Client::new();
        fetch_ticker(&http, &source, &make_ctx("ETH", "USDC"))
            .await
            .unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_non_2xx_is_a_fetch_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/ticker/24hr");
                then.status(500).body("upstream exploded");
            })
            .await;

        let source = make_source("binance_cex", TickerShape::Binance24h, &server.base_url());
        let http = Client::new();
        let err = fetch_ticker(&http, &source, &make_ctx("ETH", "USDC"))
            .await
            .unwrap_err();

        match err {
            FetchError::Http { status, body } => {
                assert_eq!(status, 500);
                assert!(body.contains("exploded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_numeric_volume_degrades_to_zero() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/ticker/24hr");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"lastPrice":"1646.96","volume":"n/a"}"#);
            })
            .await;

        let source = make_source("binance_cex", TickerShape::Binance24h, &server.base_url());
        let http = Client::new();
        let point = fetch_ticker(&http, &source, &make_ctx("ETH", "USDC"))
            .await
            .unwrap();

        assert_eq!(point.price, 1646.96);
        assert_eq!(point.volume, 0.0);
    }

    #[tokio::test]
    async fn test_non_numeric_price_is_a_fetch_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/ticker/24hr");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"lastPrice":"none","volume":"5"}"#);
            })
            .await;

        let source = make_source("binance_cex", TickerShape::Binance24h, &server.base_url());
        let http = Client::new();
        let err = fetch_ticker(&http, &source, &make_ctx("ETH", "USDC"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ParsePrice(_)));
    }
}
