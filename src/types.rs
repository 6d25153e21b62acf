//! Core types for the spot trading bot

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::indicators::IndicatorSettings;

/// Lifecycle status of a bot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Stopped,
    Active,
    Paused,
    Error,
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotStatus::Stopped => "stopped",
            BotStatus::Active => "active",
            BotStatus::Paused => "paused",
            BotStatus::Error => "error",
        }
    }
}

impl FromStr for BotStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(BotStatus::Stopped),
            "active" => Ok(BotStatus::Active),
            "paused" => Ok(BotStatus::Paused),
            "error" => Ok(BotStatus::Error),
            other => anyhow::bail!("unknown bot status: {other}"),
        }
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Polling / candle interval for a bot (one minute up to one day)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
            Interval::FourHours => "4h",
            Interval::OneDay => "1d",
        }
    }

    /// Tick period for the bot scheduler
    pub fn period(&self) -> Duration {
        let secs = match self {
            Interval::OneMinute => 60,
            Interval::FiveMinutes => 5 * 60,
            Interval::FifteenMinutes => 15 * 60,
            Interval::ThirtyMinutes => 30 * 60,
            Interval::OneHour => 60 * 60,
            Interval::FourHours => 4 * 60 * 60,
            Interval::OneDay => 24 * 60 * 60,
        };
        Duration::from_secs(secs)
    }
}

impl FromStr for Interval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Interval::OneMinute),
            "5m" => Ok(Interval::FiveMinutes),
            "15m" => Ok(Interval::FifteenMinutes),
            "30m" => Ok(Interval::ThirtyMinutes),
            "1h" => Ok(Interval::OneHour),
            "4h" => Ok(Interval::FourHours),
            "1d" => Ok(Interval::OneDay),
            other => anyhow::bail!("unknown interval: {other}"),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One trading strategy instance bound to a symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: i64,
    pub name: String,
    /// Trading pair as BASE/QUOTE, e.g. "BTC/USDT"
    pub symbol: String,
    pub status: BotStatus,

    /// Target capital to deploy (quote asset)
    pub investment: Decimal,
    /// Capital currently deployed (quote asset)
    pub invested_amount: Decimal,
    /// Base-asset quantity held; > 0 iff a position is open
    pub current_balance: Decimal,
    /// Volume-weighted average cost of the open position; meaningful only
    /// while current_balance > 0
    pub avg_entry_price: Decimal,

    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    pub trailing_stop_percent: f64,
    pub cooldown_minutes: i64,

    /// Peak price since entry, ratchets the trailing stop
    pub highest_price: Option<Decimal>,
    pub trailing_stop_price: Option<Decimal>,
    pub last_sell_time: Option<DateTime<Utc>>,
    pub last_sell_reason: Option<String>,
    /// Sentiment index value captured at entry time (when the sentiment
    /// rule is enabled), cleared on sell
    pub entry_sentiment: Option<f64>,

    pub indicator_settings: IndicatorSettings,
    /// Minimum number of agreeing indicator votes required to act
    pub min_signals: usize,
    pub interval: Interval,

    pub total_trades: i64,
    pub winning_trades: i64,
    pub total_pnl: Decimal,
    pub last_signal: Option<String>,
    pub last_signal_time: Option<DateTime<Utc>>,
    pub last_indicator_values: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Bot {
    /// A position is open iff the bot holds any base asset
    pub fn has_open_position(&self) -> bool {
        self.current_balance > Decimal::ZERO
    }

    /// Base asset of the pair ("BTC" for "BTC/USDT")
    pub fn base_asset(&self) -> &str {
        self.symbol.split('/').next().unwrap_or(&self.symbol)
    }

    /// Quote asset of the pair ("USDT" for "BTC/USDT")
    pub fn quote_asset(&self) -> &str {
        self.symbol.split('/').nth(1).unwrap_or("")
    }
}

/// Parameters for creating a new bot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBot {
    pub name: String,
    pub symbol: String,
    pub investment: Decimal,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    pub trailing_stop_percent: f64,
    pub cooldown_minutes: i64,
    pub min_signals: usize,
    pub interval: Interval,
    pub indicator_settings: IndicatorSettings,
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

impl FromStr for TradeSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(TradeSide::Buy),
            "sell" => Ok(TradeSide::Sell),
            other => anyhow::bail!("unknown trade side: {other}"),
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Execution status of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Completed,
    Failed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Completed => "completed",
            TradeStatus::Failed => "failed",
        }
    }
}

impl FromStr for TradeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(TradeStatus::Completed),
            "failed" => Ok(TradeStatus::Failed),
            other => anyhow::bail!("unknown trade status: {other}"),
        }
    }
}

/// Append-only ledger entry for an executed order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Option<i64>,
    pub bot_id: i64,
    pub symbol: String,
    pub side: TradeSide,
    pub order_type: String,
    /// Executed average price
    pub price: Decimal,
    /// Executed base-asset quantity
    pub quantity: Decimal,
    /// Executed quote-asset notional
    pub total: Decimal,
    /// Realized P&L; present on completed sells, never on buys
    pub pnl: Option<Decimal>,
    pub pnl_percent: Option<f64>,
    /// Names of the indicators that triggered the trade
    pub signals: Option<String>,
    /// Order identifier reported by the venue
    pub order_id: Option<String>,
    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
}

/// Activity feed entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Start,
    Stop,
    Buy,
    Sell,
    Analysis,
    Error,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Start => "start",
            ActivityKind::Stop => "stop",
            ActivityKind::Buy => "buy",
            ActivityKind::Sell => "sell",
            ActivityKind::Analysis => "analysis",
            ActivityKind::Error => "error",
        }
    }
}

impl FromStr for ActivityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(ActivityKind::Start),
            "stop" => Ok(ActivityKind::Stop),
            "buy" => Ok(ActivityKind::Buy),
            "sell" => Ok(ActivityKind::Sell),
            "analysis" => Ok(ActivityKind::Analysis),
            "error" => Ok(ActivityKind::Error),
            other => anyhow::bail!("unknown activity kind: {other}"),
        }
    }
}

/// Append-only diagnostic/audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: Option<i64>,
    pub bot_id: i64,
    pub bot_name: String,
    pub symbol: String,
    pub kind: ActivityKind,
    pub message: String,
    pub buy_signals: Option<i64>,
    pub sell_signals: Option<i64>,
    /// Human-readable indicator snapshot at the time of the event
    pub indicators: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One OHLCV candle
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Aggregate trading statistics for one bot, derived from the ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotStats {
    pub total_trades: i64,
    pub buy_trades: i64,
    pub sell_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub total_pnl: Decimal,
}

impl BotStats {
    pub fn win_rate(&self) -> f64 {
        let closed = self.winning_trades + self.losing_trades;
        if closed == 0 {
            0.0
        } else {
            self.winning_trades as f64 / closed as f64 * 100.0
        }
    }
}

/// A bot together with its ledger-derived statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotWithStats {
    pub bot: Bot,
    pub stats: BotStats,
}
