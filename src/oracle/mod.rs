//! Oracle core - multi-source price aggregation
//!
//! Fans out to the configured sources of a feed, filters stale and
//! anomalous observations, and produces a volume-enhanced weighted-median
//! price with a per-observation audit trail.

pub mod aggregator;
mod details;
mod engine;
pub mod sources;

pub use details::DetailCache;
pub use engine::PriceOracle;
