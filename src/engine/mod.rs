//! Per-bot trading-cycle engine
//!
//! One scheduler timer per active bot drives the cycle orchestrator, which
//! dispatches to the risk, DCA, and entry evaluators and applies their
//! results to the venue and the database.

pub mod cycle;
pub mod dca;
pub mod entry;
pub mod error;
pub mod risk;
pub mod scheduler;
pub mod service;
pub mod types;

pub use cycle::CycleRunner;
pub use dca::DcaEvaluator;
pub use entry::EntryEvaluator;
pub use error::CycleError;
pub use risk::RiskEvaluator;
pub use scheduler::BotScheduler;
pub use service::BotService;
pub use types::ExitTrigger;

/// Candles requested from the venue per evaluation pass
pub const CANDLE_LIMIT: usize = 100;

/// Minimum candles required before indicator-driven decisions are made
pub const MIN_CANDLES: usize = 30;

#[cfg(test)]
pub(crate) mod testutil {
    use crate::db::Database;
    use crate::indicators::{IndicatorEngine, IndicatorSettings};
    use crate::sentiment::{SentimentReading, SentimentSource};
    use crate::types::{Bot, BotStatus, Candle, Interval, NewBot};
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use uuid::Uuid;

    /// Fresh on-disk database under the system temp dir (a pooled
    /// `sqlite::memory:` would hand each connection its own empty database)
    pub async fn memory_db() -> Database {
        let path = std::env::temp_dir().join(format!("spotbot-test-{}.db", Uuid::new_v4()));
        Database::new(path.to_str().unwrap()).await.unwrap()
    }

    pub fn new_bot_fixture() -> NewBot {
        NewBot {
            name: "test-bot".to_string(),
            symbol: "BTC/USDT".to_string(),
            investment: dec!(1000),
            stop_loss_percent: 5.0,
            take_profit_percent: 10.0,
            trailing_stop_percent: 0.0,
            cooldown_minutes: 0,
            min_signals: 1,
            interval: Interval::OneMinute,
            indicator_settings: IndicatorSettings::default(),
        }
    }

    pub fn bot_fixture() -> Bot {
        Bot {
            id: 1,
            name: "test-bot".to_string(),
            symbol: "BTC/USDT".to_string(),
            status: BotStatus::Active,
            investment: dec!(1000),
            invested_amount: Decimal::ZERO,
            current_balance: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            stop_loss_percent: 5.0,
            take_profit_percent: 10.0,
            trailing_stop_percent: 0.0,
            cooldown_minutes: 0,
            highest_price: None,
            trailing_stop_price: None,
            last_sell_time: None,
            last_sell_reason: None,
            entry_sentiment: None,
            indicator_settings: IndicatorSettings::default(),
            min_signals: 1,
            interval: Interval::OneMinute,
            total_trades: 0,
            winning_trades: 0,
            total_pnl: Decimal::ZERO,
            last_signal: None,
            last_signal_time: None,
            last_indicator_values: None,
            created_at: Utc::now(),
        }
    }

    pub fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .map(|close| Candle {
                open_time: Utc::now(),
                open: *close,
                high: close + 0.5,
                low: close - 0.5,
                close: *close,
                volume: 1.0,
            })
            .collect()
    }

    /// Monotonically falling closes: RSI deep oversold, EMA/MACD bearish
    pub fn falling_closes(len: usize, start: f64) -> Vec<f64> {
        (0..len).map(|i| start - i as f64).collect()
    }

    /// Monotonically rising closes: RSI deep overbought, EMA/MACD bullish
    pub fn rising_closes(len: usize, start: f64) -> Vec<f64> {
        (0..len).map(|i| start + i as f64).collect()
    }

    pub struct StaticSentiment(pub Option<f64>);

    #[async_trait]
    impl SentimentSource for StaticSentiment {
        async fn fresh(&self) -> Option<SentimentReading> {
            self.0.map(|value| SentimentReading {
                value,
                classification: "Fear".to_string(),
                as_of: Utc::now(),
            })
        }
    }

    pub fn indicator_engine() -> Arc<IndicatorEngine> {
        Arc::new(IndicatorEngine::new(Arc::new(StaticSentiment(None))))
    }
}
