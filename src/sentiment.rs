//! Sentiment (fear & greed) index source
//!
//! Fetches a 0-100 market sentiment index from an alternative.me-compatible
//! endpoint, caching the value for 24 hours. On fetch failure the last
//! cached value is served, possibly stale; the indicator engine only
//! consumes fresh readings via [`SentimentSource::fresh`].

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// How long a fetched index value stays usable
pub const CACHE_TTL_HOURS: i64 = 24;

/// One sentiment index reading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentReading {
    /// Index value on the 0-100 scale (0 = extreme fear)
    pub value: f64,
    /// Provider classification, e.g. "Fear" or "Extreme Greed"
    pub classification: String,
    pub as_of: DateTime<Utc>,
}

impl SentimentReading {
    pub fn is_stale(&self) -> bool {
        Utc::now() - self.as_of > Duration::hours(CACHE_TTL_HOURS)
    }
}

/// Abstract sentiment provider consumed by the indicator engine
#[async_trait]
pub trait SentimentSource: Send + Sync {
    /// Latest reading when it is fresh (under 24h old); `None` when the
    /// index is stale or unavailable
    async fn fresh(&self) -> Option<SentimentReading>;
}

/// HTTP client for the fear & greed index with an in-process cache
pub struct FearGreedClient {
    http: reqwest::Client,
    endpoint: String,
    cache: RwLock<Option<SentimentReading>>,
}

#[derive(Debug, Deserialize)]
struct FngResponse {
    data: Vec<FngEntry>,
}

#[derive(Debug, Deserialize)]
struct FngEntry {
    value: String,
    value_classification: String,
    timestamp: String,
}

impl FearGreedClient {
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.alternative.me/fng/";

    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(10))
            .build()
            .context("Failed to build sentiment HTTP client")?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            cache: RwLock::new(None),
        })
    }

    /// Latest index value, refreshed from the remote at most once per
    /// 24 hours. Falls back to the last cached value on fetch failure.
    pub async fn fetch_index(&self) -> Result<SentimentReading> {
        if let Some(cached) = self.cache.read().await.clone() {
            if !cached.is_stale() {
                return Ok(cached);
            }
        }

        match self.fetch_remote().await {
            Ok(reading) => {
                debug!(
                    "[Sentiment] index refreshed: {} ({})",
                    reading.value, reading.classification
                );
                *self.cache.write().await = Some(reading.clone());
                Ok(reading)
            }
            Err(e) => {
                if let Some(cached) = self.cache.read().await.clone() {
                    warn!("[Sentiment] fetch failed, serving cached value: {e}");
                    Ok(cached)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Whether the cached value (if any) is older than the TTL
    pub async fn is_stale(&self) -> bool {
        match self.cache.read().await.as_ref() {
            Some(reading) => reading.is_stale(),
            None => true,
        }
    }

    async fn fetch_remote(&self) -> Result<SentimentReading> {
        let response = self
            .http
            .get(&self.endpoint)
            .send()
            .await
            .context("Sentiment index request failed")?
            .error_for_status()
            .context("Sentiment index request rejected")?;

        let body: FngResponse = response
            .json()
            .await
            .context("Failed to parse sentiment index response")?;

        let entry = body
            .data
            .first()
            .ok_or_else(|| anyhow!("Sentiment index response contained no data"))?;

        parse_entry(entry)
    }
}

fn parse_entry(entry: &FngEntry) -> Result<SentimentReading> {
    let value: f64 = entry
        .value
        .parse()
        .context("Sentiment index value is not a number")?;
    if !(0.0..=100.0).contains(&value) {
        anyhow::bail!("Sentiment index value {value} outside the 0-100 scale");
    }

    let secs: i64 = entry
        .timestamp
        .parse()
        .context("Sentiment index timestamp is not a unix epoch")?;
    let as_of = DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| anyhow!("Sentiment index timestamp out of range"))?;

    Ok(SentimentReading {
        value,
        classification: entry.value_classification.clone(),
        as_of,
    })
}

#[async_trait]
impl SentimentSource for FearGreedClient {
    async fn fresh(&self) -> Option<SentimentReading> {
        match self.fetch_index().await {
            Ok(reading) if !reading.is_stale() => Some(reading),
            Ok(_) => {
                debug!("[Sentiment] cached index is stale, excluding from evaluation");
                None
            }
            Err(e) => {
                warn!("[Sentiment] index unavailable: {e}");
                None
            }
        }
    }
}
