//! Fetch orchestrator
//!
//! Resolves a feed, fans out one fetch task per source, gathers whatever
//! comes back within the deadline and hands it to the aggregation pipeline.
//! One source failing never cancels the others; it just becomes a
//! `fetch_error` entry in the detail cache.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use reqwest::Client;

use crate::config::{LoadedConfig, OracleSettings, ResolvedSource};
use crate::error::{OracleError, Result};
use crate::oracle::aggregator::aggregate;
use crate::oracle::details::DetailCache;
use crate::oracle::sources::{fetch_observation, FetchError, PairContext};
use crate::types::{AggregateResult, PricePoint};

/// The oracle engine: owns the frozen configuration graph, the shared HTTP
/// client and the detail cache. Cheap to share behind an `Arc`.
pub struct PriceOracle {
    config: Arc<LoadedConfig>,
    http: Client,
    details: DetailCache,
    fetch_timeout: Duration,
    request_deadline: Duration,
}

impl PriceOracle {
    pub fn new(config: Arc<LoadedConfig>, settings: &OracleSettings) -> Result<Self> {
        let fetch_timeout = Duration::from_secs(settings.fetch_timeout_secs);
        let http = Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| OracleError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(PriceOracle {
            config,
            http,
            details: DetailCache::new(),
            fetch_timeout,
            request_deadline: Duration::from_secs(settings.request_deadline_secs),
        })
    }

    /// All configured feed IDs.
    pub fn feed_ids(&self) -> Vec<String> {
        self.config.feed_ids()
    }

    /// Fetch, filter and aggregate one feed. The annotated observation set
    /// is written to the detail cache whether or not aggregation succeeds,
    /// so a failing feed can still be diagnosed through the details
    /// endpoint.
    pub async fn aggregate_feed(&self, feed_id: &str) -> Result<AggregateResult> {
        if feed_id.trim().is_empty() {
            return Err(OracleError::InvalidInput("empty feed id".into()));
        }

        let resolved = self.config.resolve(feed_id)?;
        let ctx = PairContext {
            base: resolved.base.symbol.clone(),
            quote: resolved.quote.symbol.clone(),
        };

        // All fetches start together, so capping each one at the request
        // deadline bounds the whole fan-out.
        let per_fetch = self.fetch_timeout.min(self.request_deadline);
        let fetches = resolved
            .sources
            .iter()
            .map(|source| self.fetch_one(source, &ctx, per_fetch));
        let outcomes = join_all(fetches).await;

        let mut points = Vec::with_capacity(outcomes.len());
        let mut failed = Vec::new();
        for (source, outcome) in resolved.sources.iter().zip(outcomes) {
            match outcome {
                Ok(mut point) => {
                    point.weight = resolved.weights.get(&source.id).copied().unwrap_or(0.0);
                    points.push(point);
                }
                Err(err) => {
                    tracing::warn!(
                        feed = %feed_id,
                        source = %source.id,
                        error = %err,
                        "source fetch failed"
                    );
                    failed.push(PricePoint::fetch_error(&source.id, Utc::now()));
                }
            }
        }

        tracing::debug!(
            feed = %feed_id,
            fetched = points.len(),
            failed = failed.len(),
            "fetch fan-out complete"
        );

        let (result, mut annotated) = aggregate(points, &resolved.params, feed_id);
        annotated.extend(failed);
        self.details.store(feed_id, annotated).await;

        result
    }

    /// Annotated observations from the last aggregation attempt for a feed.
    pub async fn last_aggregation_details(&self, feed_id: &str) -> Result<Vec<PricePoint>> {
        if feed_id.trim().is_empty() {
            return Err(OracleError::InvalidInput("empty feed id".into()));
        }
        if !self.config.pairs.contains_key(feed_id) {
            return Err(OracleError::PairNotConfigured(feed_id.to_string()));
        }
        self.details
            .fetch(feed_id)
            .await
            .ok_or_else(|| OracleError::NoDetails(feed_id.to_string()))
    }

    async fn fetch_one(
        &self,
        source: &ResolvedSource,
        ctx: &PairContext,
        per_fetch: Duration,
    ) -> std::result::Result<PricePoint, FetchError> {
        match tokio::time::timeout(
            per_fetch,
            fetch_observation(&self.http, &source.source, source.chain.as_ref(), ctx),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(FetchError::DeadlineExceeded),
        }
    }
}
