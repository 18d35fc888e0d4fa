//! Feed watcher - polls one feed and prints the aggregate price
//!
//! Usage: watch <feed_id> [interval_secs]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use priceoracle::config::{load_config_graph, AppConfig};
use priceoracle::oracle::PriceOracle;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let feed_id = match args.next() {
        Some(id) => id,
        None => bail!("usage: watch <feed_id> [interval_secs]"),
    };
    let interval = args
        .next()
        .map(|raw| raw.parse::<u64>())
        .transpose()
        .context("interval_secs must be an integer")?
        .unwrap_or(5);

    let settings = AppConfig::load()?;
    let graph = load_config_graph(Path::new(&settings.oracle.config_dir))
        .context("failed to load configuration graph")?;
    let oracle = PriceOracle::new(Arc::new(graph), &settings.oracle)?;

    loop {
        match oracle.aggregate_feed(&feed_id).await {
            Ok(result) => println!(
                "{} price: {:.4} (volume {:.2}, {})",
                feed_id, result.price, result.volume, result.source
            ),
            Err(err) => eprintln!("error aggregating {feed_id}: {err}"),
        }
        tokio::time::sleep(Duration::from_secs(interval)).await;
    }
}
