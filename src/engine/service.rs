//! Bot service facade
//!
//! The surface consumed by callers (CLI, or an API layer kept out of this
//! crate): bot lifecycle, stats, stateless symbol analysis, and
//! restart-recovery. Validation happens here, before anything is
//! persisted; the cycle engine only ever sees well-formed bots.

use super::cycle::CycleRunner;
use super::scheduler::BotScheduler;
use super::CANDLE_LIMIT;
use crate::db::Database;
use crate::indicators::{Analysis, IndicatorEngine, IndicatorSettings, ValidationError};
use crate::sentiment::SentimentSource;
use crate::types::{Activity, Bot, BotWithStats, Interval, NewBot, Trade};
use crate::venue::{ConnectionManager, Venue};
use anyhow::{Context, Result};
use std::sync::Arc;
use rust_decimal::Decimal;

/// Application-level service owning the engine wiring
pub struct BotService {
    db: Arc<Database>,
    venue: Arc<dyn Venue>,
    connection: Arc<ConnectionManager>,
    engine: Arc<IndicatorEngine>,
    scheduler: BotScheduler,
}

impl BotService {
    pub fn new(
        db: Arc<Database>,
        venue: Arc<dyn Venue>,
        connection: Arc<ConnectionManager>,
        sentiment: Arc<dyn SentimentSource>,
    ) -> Self {
        let engine = Arc::new(IndicatorEngine::new(sentiment));
        let runner = Arc::new(CycleRunner::new(
            db.clone(),
            venue.clone(),
            connection.clone(),
            engine.clone(),
        ));
        let scheduler = BotScheduler::new(db.clone(), connection.clone(), runner);
        Self {
            db,
            venue,
            connection,
            engine,
            scheduler,
        }
    }

    /// Shared venue connection state
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Validate and persist a new bot in the stopped state
    pub async fn create_bot(&self, new_bot: NewBot) -> Result<Bot> {
        validate_new_bot(&new_bot)?;
        new_bot.indicator_settings.validate()?;
        self.db.create_bot(&new_bot).await
    }

    pub async fn start_bot(&self, bot_id: i64) -> Result<Bot> {
        self.scheduler.start_bot(bot_id).await
    }

    pub async fn pause_bot(&self, bot_id: i64) -> Result<Bot> {
        self.scheduler.pause_bot(bot_id).await
    }

    pub async fn stop_bot(&self, bot_id: i64) -> Result<Bot> {
        self.scheduler.stop_bot(bot_id).await
    }

    /// Cancel the bot's timer and delete it together with its history
    pub async fn delete_bot(&self, bot_id: i64) -> Result<()> {
        self.scheduler.cancel_timer(bot_id).await;
        self.db.delete_bot(bot_id).await
    }

    pub async fn get_bot_with_stats(&self, bot_id: i64) -> Result<Option<BotWithStats>> {
        let Some(bot) = self.db.get_bot(bot_id).await? else {
            return Ok(None);
        };
        let stats = self.db.bot_stats(bot_id).await?;
        Ok(Some(BotWithStats { bot, stats }))
    }

    pub async fn get_all_bots_with_stats(&self) -> Result<Vec<BotWithStats>> {
        let bots = self.db.all_bots().await?;
        let mut out = Vec::with_capacity(bots.len());
        for bot in bots {
            let stats = self.db.bot_stats(bot.id).await?;
            out.push(BotWithStats { bot, stats });
        }
        Ok(out)
    }

    /// One-off indicator analysis for a symbol; no position side effects
    pub async fn analyze_symbol(
        &self,
        symbol: &str,
        settings: &IndicatorSettings,
        interval: Interval,
    ) -> Result<Analysis> {
        settings.validate()?;
        let candles = self
            .venue
            .candles(symbol, interval, CANDLE_LIMIT)
            .await
            .with_context(|| format!("Failed to fetch candles for {symbol}"))?;
        Ok(self.engine.evaluate(&candles, settings, None).await)
    }

    /// Restart every bot persisted as active (process startup, or a newly
    /// established venue connection)
    pub async fn resume_active_bots(&self) -> Result<usize> {
        self.scheduler.resume_active_bots().await
    }

    /// Bulk-delete a bot's trades and activities and reset its telemetry
    pub async fn clear_history(&self, bot_id: i64) -> Result<()> {
        self.db.clear_history(bot_id).await
    }

    pub async fn trades_for_bot(&self, bot_id: i64) -> Result<Vec<Trade>> {
        self.db.trades_for_bot(bot_id).await
    }

    pub async fn recent_activities(&self, limit: i64) -> Result<Vec<Activity>> {
        self.db.recent_activities(limit).await
    }
}

fn validate_new_bot(new_bot: &NewBot) -> Result<(), ValidationError> {
    if new_bot.name.trim().is_empty() {
        return Err(ValidationError::Config("bot name must not be empty".to_string()));
    }
    let parts: Vec<&str> = new_bot.symbol.split('/').collect();
    if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
        return Err(ValidationError::Config(format!(
            "symbol must be BASE/QUOTE, got {}",
            new_bot.symbol
        )));
    }
    if new_bot.investment <= Decimal::ZERO {
        return Err(ValidationError::Config(
            "investment target must be positive".to_string(),
        ));
    }
    if new_bot.stop_loss_percent < 0.0
        || new_bot.take_profit_percent < 0.0
        || new_bot.trailing_stop_percent < 0.0
    {
        return Err(ValidationError::Config(
            "risk percents must not be negative".to_string(),
        ));
    }
    if new_bot.cooldown_minutes < 0 {
        return Err(ValidationError::Config(
            "cooldown minutes must not be negative".to_string(),
        ));
    }
    if new_bot.min_signals == 0 {
        return Err(ValidationError::Config(
            "min signals must be at least 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::{
        candles_from_closes, memory_db, new_bot_fixture, rising_closes, StaticSentiment,
    };
    use crate::indicators::Vote;
    use crate::types::BotStatus;
    use crate::venue::PaperVenue;
    use rust_decimal_macros::dec;

    async fn service() -> (BotService, Arc<Database>, Arc<PaperVenue>) {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());
        let connection = Arc::new(ConnectionManager::new(true));
        let service = BotService::new(
            db.clone(),
            venue.clone(),
            connection,
            Arc::new(StaticSentiment(None)),
        );
        (service, db, venue)
    }

    #[tokio::test]
    async fn create_bot_rejects_a_bad_symbol() {
        let (service, _db, _venue) = service().await;
        let mut new_bot = new_bot_fixture();
        new_bot.symbol = "BTCUSDT".to_string();

        let err = service.create_bot(new_bot).await.unwrap_err();
        assert!(err.to_string().contains("BASE/QUOTE"));
    }

    #[tokio::test]
    async fn create_bot_rejects_invalid_indicator_settings() {
        let (service, _db, _venue) = service().await;
        let mut new_bot = new_bot_fixture();
        new_bot.indicator_settings.rsi.oversold = 80.0;
        new_bot.indicator_settings.rsi.overbought = 20.0;

        assert!(service.create_bot(new_bot).await.is_err());
    }

    #[tokio::test]
    async fn create_bot_rejects_zero_min_signals() {
        let (service, _db, _venue) = service().await;
        let mut new_bot = new_bot_fixture();
        new_bot.min_signals = 0;

        assert!(service.create_bot(new_bot).await.is_err());
    }

    #[tokio::test]
    async fn lifecycle_runs_through_the_scheduler() {
        let (service, _db, venue) = service().await;
        venue.set_price("BTC/USDT", dec!(100)).await;
        venue.set_candles("BTC/USDT", vec![]).await;
        service.connection().connect();

        let bot = service.create_bot(new_bot_fixture()).await.unwrap();
        assert_eq!(bot.status, BotStatus::Stopped);

        let started = service.start_bot(bot.id).await.unwrap();
        assert_eq!(started.status, BotStatus::Active);

        let paused = service.pause_bot(bot.id).await.unwrap();
        assert_eq!(paused.status, BotStatus::Paused);

        let stopped = service.stop_bot(bot.id).await.unwrap();
        assert_eq!(stopped.status, BotStatus::Stopped);
    }

    #[tokio::test]
    async fn delete_removes_the_bot_and_history() {
        let (service, db, _venue) = service().await;
        let bot = service.create_bot(new_bot_fixture()).await.unwrap();
        service.delete_bot(bot.id).await.unwrap();
        assert!(db.get_bot(bot.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn analyze_symbol_is_stateless() {
        let (service, db, venue) = service().await;
        venue
            .set_candles("SOL/USDT", candles_from_closes(&rising_closes(40, 20.0)))
            .await;

        let analysis = service
            .analyze_symbol("SOL/USDT", &IndicatorSettings::default(), Interval::OneHour)
            .await
            .unwrap();

        // All four technical indicators had enough history to vote
        assert_eq!(analysis.evaluated_count(), 4);
        // A one-way rally pins the momentum oscillator overbought
        assert!(analysis
            .decisions
            .iter()
            .any(|d| d.indicator == "RSI" && d.vote == Vote::Sell));
        assert!(db.all_trades().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stats_surface_through_the_facade() {
        let (service, _db, _venue) = service().await;
        let bot = service.create_bot(new_bot_fixture()).await.unwrap();

        let with_stats = service.get_bot_with_stats(bot.id).await.unwrap().unwrap();
        assert_eq!(with_stats.stats.total_trades, 0);
        assert_eq!(service.get_all_bots_with_stats().await.unwrap().len(), 1);
    }
}
