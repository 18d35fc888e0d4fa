//! Core types shared across the oracle
//!
//! Observations flow from the fetchers through the aggregation pipeline into
//! the detail cache; the aggregate result is what feed consumers see.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provenance tag for the normal volume-enhanced weighted-median path.
pub const PROVENANCE_WEIGHTED_MEDIAN: &str = "aggregated_vol_weighted_median";
/// Provenance tag for the degenerate-weights simple-median fallback.
pub const PROVENANCE_FALLBACK_MEDIAN: &str = "aggregated_fallback_median_dyn";

/// Aggregation status of a single observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceStatus {
    /// Fetched but not yet classified by the pipeline.
    Pending,
    Valid,
    Stale,
    Outlier,
    /// The source failed before producing numbers; kept for diagnostics only.
    FetchError,
}

impl fmt::Display for PriceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceStatus::Pending => write!(f, "pending"),
            PriceStatus::Valid => write!(f, "valid"),
            PriceStatus::Stale => write!(f, "stale"),
            PriceStatus::Outlier => write!(f, "outlier"),
            PriceStatus::FetchError => write!(f, "fetch_error"),
        }
    }
}

/// One observation from one source at one moment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    /// Source ID this observation came from (e.g. `binance_cex`).
    pub source: String,
    pub price: f64,
    /// 24h volume as reported by the source, 0.0 when not reported.
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
    /// Static per-feed weight, filled in by the orchestrator.
    #[serde(skip)]
    pub weight: f64,
    pub status: PriceStatus,
}

impl PricePoint {
    /// Observation synthesized for a failed fetch; carries no numeric data
    /// and never participates in aggregation statistics.
    pub fn fetch_error(source_id: &str, at: DateTime<Utc>) -> Self {
        PricePoint {
            source: source_id.to_string(),
            price: 0.0,
            volume: 0.0,
            timestamp: at,
            weight: 0.0,
            status: PriceStatus::FetchError,
        }
    }
}

/// Aggregated price for a feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub feed_id: String,
    pub price: f64,
    /// Sum of volumes across the observations that made it into the result.
    pub volume: f64,
    /// Provenance string identifying the algorithm path taken.
    pub source: String,
    pub timestamp: DateTime<Utc>,
}
