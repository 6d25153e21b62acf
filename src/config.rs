//! Configuration management for the spot trading bot

use crate::sentiment::FearGreedClient;
use anyhow::Result;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

/// Application configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite database
    pub database_path: String,

    /// Whether running against the simulated demo venue
    pub demo_mode: bool,

    /// Quote-asset funds seeded into the demo venue per quote asset
    pub demo_funds: Decimal,

    /// Sentiment (fear & greed) index endpoint
    pub sentiment_endpoint: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let database_path =
            env::var("DATABASE_PATH").unwrap_or_else(|_| "spotbot.db".to_string());

        let demo_mode = env::var("DEMO_MODE")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true); // Default to the simulated venue for safety

        let demo_funds = env::var("DEMO_FUNDS")
            .ok()
            .and_then(|v| Decimal::from_str(&v).ok())
            .unwrap_or_else(|| Decimal::from(10_000));

        let sentiment_endpoint = env::var("SENTIMENT_ENDPOINT")
            .unwrap_or_else(|_| FearGreedClient::DEFAULT_ENDPOINT.to_string());

        // Live connectivity stays behind the venue trait; this build only
        // ships the simulated venue
        if !demo_mode {
            anyhow::bail!("live trading requires a venue client; set DEMO_MODE=true");
        }

        Ok(Self {
            database_path,
            demo_mode,
            demo_funds,
            sentiment_endpoint,
        })
    }
}
