//! Last-aggregation detail cache
//!
//! One entry per feed holding the annotated observation set from the most
//! recent aggregation attempt, successful or not. Reads hand out copies so
//! callers can serialize without holding the lock.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::types::PricePoint;

#[derive(Debug, Default)]
pub struct DetailCache {
    entries: RwLock<HashMap<String, Vec<PricePoint>>>,
}

impl DetailCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the entry for a feed with the latest annotated set.
    pub async fn store(&self, feed_id: &str, points: Vec<PricePoint>) {
        let mut entries = self.entries.write().await;
        entries.insert(feed_id.to_string(), points);
    }

    /// Deep copy of the last annotated set for a feed, if any.
    pub async fn fetch(&self, feed_id: &str) -> Option<Vec<PricePoint>> {
        let entries = self.entries.read().await;
        entries.get(feed_id).cloned()
    }
}
