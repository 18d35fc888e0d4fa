//! Error taxonomy for the oracle core
//!
//! Per-source fetch failures live in `oracle::sources::FetchError` and never
//! cross the aggregation boundary; everything here is what callers of the
//! engine can actually observe.

use std::fmt;

use thiserror::Error;

/// Filter stage that left a feed below its minimum source count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsufficientReason {
    Stale,
    Outliers,
}

impl fmt::Display for InsufficientReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsufficientReason::Stale => write!(f, "stale"),
            InsufficientReason::Outliers => write!(f, "outliers"),
        }
    }
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("pair not configured: {0}")]
    PairNotConfigured(String),

    #[error(
        "insufficient sources for {feed_id}: {valid} valid after {reason} filter, need {required}"
    )]
    InsufficientSources {
        feed_id: String,
        reason: InsufficientReason,
        valid: usize,
        required: usize,
    },

    #[error("no aggregation details recorded for {0}")]
    NoDetails(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OracleError {
    /// Stable wire code surfaced by the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            OracleError::InvalidInput(_) => "INVALID_INPUT",
            OracleError::PairNotConfigured(_) => "PAIR_NOT_CONFIGURED",
            OracleError::InsufficientSources { .. } => "PRICE_FETCH_FAILED",
            OracleError::NoDetails(_) => "NO_DETAILS_FOUND",
            OracleError::Config(_) | OracleError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, OracleError>;
