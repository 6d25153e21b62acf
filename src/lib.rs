//! Spot Trading Bot Library
//!
//! Automated cryptocurrency spot trading: each bot is bound to one
//! trading pair and runs on its own timer, deciding to buy, hold, or sell
//! from aggregated technical-indicator signals. Open positions are managed
//! with stop-loss, take-profit, trailing-stop, cooldown, and
//! dollar-cost-averaging rules, and every decision and trade is recorded.

pub mod config;
pub mod db;
pub mod engine;
pub mod indicators;
pub mod sentiment;
pub mod types;
pub mod venue;

pub use config::Config;
pub use db::Database;
pub use engine::{BotScheduler, BotService, CycleError, CycleRunner, ExitTrigger};
pub use indicators::{Analysis, IndicatorEngine, IndicatorSettings, Signal, Vote};
pub use sentiment::{FearGreedClient, SentimentReading, SentimentSource};
pub use types::{
    Activity, ActivityKind, Bot, BotStatus, BotWithStats, Candle, Interval, NewBot, Trade,
    TradeSide,
};
pub use venue::{ConnectionManager, PaperVenue, Venue, VenueError};
