//! Configuration graph: chains, assets, sources and feeds
//!
//! Loaded once at startup from JSON files, validated, then shared read-only.
//! Resolution turns a feed ID into a fully linked view ready for fetching.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::error::{OracleError, Result};

/// Chain context value used by feeds that are not tied to a single chain.
pub const GLOBAL_CHAIN: &str = "global";

/// A supported blockchain network.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chain {
    pub id: String,
    pub name: String,
    pub native_currency: String,
    #[serde(default)]
    pub rpc_endpoints: Vec<String>,
}

/// A priced asset.
#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub name: String,
    pub decimals: u32,
}

/// Category of a price source. The set is closed; fetch dispatch matches on
/// it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    CexTicker,
    DexSubgraphPool,
    DexSubgraphBundle,
    DexRpc,
}

/// Response shape (and URL scheme) of a CEX ticker endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickerShape {
    Binance24h,
    CoinbaseSpot,
    KrakenTicker,
}

/// A single potential source of price data.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Unique ID, assigned from the map key during loading.
    #[serde(skip)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    /// Required for DEX kinds, forbidden for CEX kinds.
    pub chain_id: Option<String>,
    pub base_url: Option<String>,
    /// The Graph subgraph ID, appended to `base_url` when present.
    pub subgraph_id: Option<String>,
    pub pool_address: Option<String>,
    /// Token vault accounts of an AMM market, for `dex_rpc` sources.
    pub base_vault: Option<String>,
    pub quote_vault: Option<String>,
    /// Environment variable holding the API key, if the source needs one.
    pub api_key_env_var: Option<String>,
    pub ticker_shape: Option<TickerShape>,
    /// Pair-string template, e.g. `"{base}-{quote}"`. Defaults per shape.
    pub symbol_template: Option<String>,
    /// Per-source asset renames applied before templating (e.g. BTC -> XBT).
    #[serde(default)]
    pub symbol_overrides: HashMap<String, String>,
}

/// Aggregation knobs for one feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationParams {
    pub minimum_sources: usize,
    pub max_price_age_seconds: u64,
    pub iqr_multiplier: f64,
}

/// Configuration of one price feed (pair + chain context).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairConfig {
    /// Unique feed ID, assigned from the map key during loading.
    #[serde(skip)]
    pub id: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default = "default_chain")]
    pub chain_id: String,
    pub aggregation: AggregationParams,
    pub sources: Vec<String>,
    pub weights: HashMap<String, f64>,
}

fn default_chain() -> String {
    GLOBAL_CHAIN.to_string()
}

/// A feed source with its references dereferenced.
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub id: String,
    pub source: Source,
    /// The source's own chain, for fetchers that talk to chain RPC.
    pub chain: Option<Chain>,
}

/// A feed with every reference dereferenced, ready for the orchestrator.
#[derive(Debug, Clone)]
pub struct ResolvedFeed {
    pub feed_id: String,
    /// None for `global` feeds.
    pub chain: Option<Chain>,
    pub base: Asset,
    pub quote: Asset,
    /// Ordered, filtered to the sources applicable to this feed's chain.
    pub sources: Vec<ResolvedSource>,
    pub weights: HashMap<String, f64>,
    pub params: AggregationParams,
}

/// All parsed configuration maps. Frozen after `load_config_graph`.
#[derive(Debug, Default)]
pub struct LoadedConfig {
    pub chains: HashMap<String, Chain>,
    pub assets: HashMap<String, Asset>,
    pub sources: HashMap<String, Source>,
    pub pairs: HashMap<String, PairConfig>,
}

impl LoadedConfig {
    /// All configured feed IDs, sorted for stable listings.
    pub fn feed_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pairs.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Resolve a feed ID into a fully linked view. Sources are filtered by
    /// chain context here so downstream components never see a source that
    /// cannot serve the feed: chain-agnostic sources are always included,
    /// DEX sources only when their chain matches (any chain for `global`).
    pub fn resolve(&self, feed_id: &str) -> Result<ResolvedFeed> {
        let pair = self
            .pairs
            .get(feed_id)
            .ok_or_else(|| OracleError::PairNotConfigured(feed_id.to_string()))?;

        let base = self
            .assets
            .get(&pair.base_asset)
            .ok_or_else(|| OracleError::Config(format!("unknown base asset {}", pair.base_asset)))?
            .clone();
        let quote = self
            .assets
            .get(&pair.quote_asset)
            .ok_or_else(|| {
                OracleError::Config(format!("unknown quote asset {}", pair.quote_asset))
            })?
            .clone();

        let chain = if pair.chain_id == GLOBAL_CHAIN {
            None
        } else {
            Some(
                self.chains
                    .get(&pair.chain_id)
                    .ok_or_else(|| {
                        OracleError::Config(format!("unknown chain {}", pair.chain_id))
                    })?
                    .clone(),
            )
        };

        let mut sources = Vec::with_capacity(pair.sources.len());
        for source_id in &pair.sources {
            let source = self
                .sources
                .get(source_id)
                .ok_or_else(|| OracleError::Config(format!("unknown source {source_id}")))?;

            match &source.chain_id {
                None => {}
                Some(c) if pair.chain_id == GLOBAL_CHAIN || *c == pair.chain_id => {}
                Some(_) => continue,
            }

            let source_chain = match &source.chain_id {
                Some(c) => Some(
                    self.chains
                        .get(c)
                        .ok_or_else(|| OracleError::Config(format!("unknown chain {c}")))?
                        .clone(),
                ),
                None => None,
            };

            sources.push(ResolvedSource {
                id: source_id.clone(),
                source: source.clone(),
                chain: source_chain,
            });
        }

        Ok(ResolvedFeed {
            feed_id: feed_id.to_string(),
            chain,
            base,
            quote,
            sources,
            weights: pair.weights.clone(),
            params: pair.aggregation.clone(),
        })
    }

    /// Check the consistency of the loaded graph. Any failure here is fatal:
    /// the service refuses to start on a broken configuration.
    pub fn validate(&self) -> Result<()> {
        if self.assets.is_empty() {
            return Err(OracleError::Config("no assets defined".into()));
        }
        if self.sources.is_empty() {
            return Err(OracleError::Config("no sources defined".into()));
        }
        if self.pairs.is_empty() {
            return Err(OracleError::Config("no feeds defined".into()));
        }

        for (id, source) in &self.sources {
            match source.kind {
                SourceKind::CexTicker => {
                    if source.chain_id.is_some() {
                        return Err(OracleError::Config(format!(
                            "source {id} is a CEX but carries a chainId"
                        )));
                    }
                    if source.base_url.is_none() {
                        return Err(OracleError::Config(format!(
                            "source {id} is missing baseUrl"
                        )));
                    }
                    if source.ticker_shape.is_none() {
                        return Err(OracleError::Config(format!(
                            "source {id} is missing tickerShape"
                        )));
                    }
                }
                SourceKind::DexSubgraphPool | SourceKind::DexSubgraphBundle => {
                    self.require_chain(id, source)?;
                    if source.base_url.is_none() {
                        return Err(OracleError::Config(format!(
                            "source {id} is missing baseUrl"
                        )));
                    }
                    if source.kind == SourceKind::DexSubgraphPool
                        && source.pool_address.is_none()
                    {
                        return Err(OracleError::Config(format!(
                            "source {id} is missing poolAddress"
                        )));
                    }
                }
                SourceKind::DexRpc => {
                    self.require_chain(id, source)?;
                    if source.base_vault.is_none() || source.quote_vault.is_none() {
                        return Err(OracleError::Config(format!(
                            "source {id} is missing baseVault/quoteVault"
                        )));
                    }
                }
            }
        }

        for (id, pair) in &self.pairs {
            if !self.assets.contains_key(&pair.base_asset) {
                return Err(OracleError::Config(format!(
                    "feed {id} references unknown base asset {}",
                    pair.base_asset
                )));
            }
            if !self.assets.contains_key(&pair.quote_asset) {
                return Err(OracleError::Config(format!(
                    "feed {id} references unknown quote asset {}",
                    pair.quote_asset
                )));
            }
            if pair.chain_id != GLOBAL_CHAIN && !self.chains.contains_key(&pair.chain_id) {
                return Err(OracleError::Config(format!(
                    "feed {id} references unknown chain {}",
                    pair.chain_id
                )));
            }
            if pair.sources.is_empty() {
                return Err(OracleError::Config(format!("feed {id} has no sources")));
            }
            if pair.aggregation.minimum_sources == 0 {
                return Err(OracleError::Config(format!(
                    "feed {id} has zero minimumSources"
                )));
            }
            if pair.aggregation.minimum_sources > pair.sources.len() {
                return Err(OracleError::Config(format!(
                    "feed {id} requires {} sources but lists only {}",
                    pair.aggregation.minimum_sources,
                    pair.sources.len()
                )));
            }
            if pair.aggregation.max_price_age_seconds == 0 {
                return Err(OracleError::Config(format!(
                    "feed {id} has zero maxPriceAgeSeconds"
                )));
            }
            if !(pair.aggregation.iqr_multiplier > 0.0) {
                return Err(OracleError::Config(format!(
                    "feed {id} has non-positive iqrMultiplier"
                )));
            }

            let mut any_positive_weight = false;
            for source_id in &pair.sources {
                let source = self.sources.get(source_id).ok_or_else(|| {
                    OracleError::Config(format!("feed {id} references unknown source {source_id}"))
                })?;

                let weight = pair.weights.get(source_id).ok_or_else(|| {
                    OracleError::Config(format!("feed {id} is missing weight for {source_id}"))
                })?;
                if !(*weight >= 0.0) {
                    return Err(OracleError::Config(format!(
                        "feed {id} has negative weight for {source_id}"
                    )));
                }
                if *weight > 0.0 {
                    any_positive_weight = true;
                }

                if let Some(source_chain) = &source.chain_id {
                    if pair.chain_id != GLOBAL_CHAIN && *source_chain != pair.chain_id {
                        return Err(OracleError::Config(format!(
                            "feed {id} on chain {} cannot use source {source_id} on chain {source_chain}",
                            pair.chain_id
                        )));
                    }
                }
            }
            if !any_positive_weight {
                return Err(OracleError::Config(format!(
                    "feed {id} has no positive source weight"
                )));
            }
        }

        Ok(())
    }

    fn require_chain(&self, id: &str, source: &Source) -> Result<()> {
        let chain_id = source.chain_id.as_ref().ok_or_else(|| {
            OracleError::Config(format!("DEX source {id} is missing required chainId"))
        })?;
        if !self.chains.contains_key(chain_id) {
            return Err(OracleError::Config(format!(
                "source {id} references unknown chain {chain_id}"
            )));
        }
        Ok(())
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

/// Load chains, assets, sources and feeds from `dir` and validate the result.
pub fn load_config_graph(dir: &Path) -> anyhow::Result<LoadedConfig> {
    let chains: HashMap<String, Chain> = load_json(&dir.join("chains.json"))?;
    let assets: HashMap<String, Asset> = load_json(&dir.join("assets.json"))?;

    let mut sources: HashMap<String, Source> = load_json(&dir.join("sources.json"))?;
    for (id, source) in sources.iter_mut() {
        source.id = id.clone();
    }

    let mut pairs: HashMap<String, PairConfig> = load_json(&dir.join("pairs.json"))?;
    for (id, pair) in pairs.iter_mut() {
        pair.id = id.clone();
    }

    let graph = LoadedConfig {
        chains,
        assets,
        sources,
        pairs,
    };
    graph.validate().context("configuration validation failed")?;
    Ok(graph)
}
