//! Configuration management
//!
//! Runtime settings come from TOML files + environment variables via .env;
//! the feed/source/chain/asset graph comes from JSON files in the directory
//! named by `oracle.config_dir` (see `graph`).

mod graph;

pub use graph::*;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub oracle: OracleSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
    /// Listen port
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleSettings {
    /// Directory holding chains.json / assets.json / sources.json / pairs.json
    pub config_dir: String,
    /// Per-source fetch timeout in seconds
    pub fetch_timeout_secs: u64,
    /// Whole-request deadline in seconds
    pub request_deadline_secs: u64,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .set_default("server.bind", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("oracle.config_dir", "./config")?
            .set_default("oracle.fetch_timeout_secs", 10)?
            .set_default("oracle.request_deadline_secs", 15)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (ORACLE_*)
            .add_source(Environment::with_prefix("ORACLE").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// One-line summary of the effective settings for startup logging
    pub fn digest(&self) -> String {
        format!(
            "bind={}:{} config_dir={} fetch_timeout={}s deadline={}s",
            self.server.bind,
            self.server.port,
            self.oracle.config_dir,
            self.oracle.fetch_timeout_secs,
            self.oracle.request_deadline_secs
        )
    }
}
