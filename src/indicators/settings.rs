//! Per-indicator strategy settings
//!
//! Settings are validated once at the bot-creation/update boundary; the
//! cycle engine works with an already well-formed value.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation failure for bot configuration or indicator settings
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("indicator settings: {0}")]
    Settings(&'static str),
    #[error("bot config: {0}")]
    Config(String),
}

/// Independently toggleable indicator configuration for one bot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorSettings {
    pub rsi: RsiSettings,
    pub macd: MacdSettings,
    pub bollinger: BollingerSettings,
    pub ema_cross: EmaCrossSettings,
    pub sentiment: SentimentSettings,
}

/// Momentum oscillator (RSI)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RsiSettings {
    pub enabled: bool,
    pub period: usize,
    pub overbought: f64,
    pub oversold: f64,
}

impl Default for RsiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            period: 14,
            overbought: 70.0,
            oversold: 30.0,
        }
    }
}

/// Trend-convergence oscillator (MACD)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacdSettings {
    pub enabled: bool,
    pub fast_period: usize,
    pub slow_period: usize,
    pub signal_period: usize,
}

impl Default for MacdSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            fast_period: 12,
            slow_period: 26,
            signal_period: 9,
        }
    }
}

/// Volatility bands (Bollinger)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BollingerSettings {
    pub enabled: bool,
    pub period: usize,
    pub std_dev: f64,
}

impl Default for BollingerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            period: 20,
            std_dev: 2.0,
        }
    }
}

/// Dual moving-average crossover
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmaCrossSettings {
    pub enabled: bool,
    pub short_period: usize,
    pub long_period: usize,
}

impl Default for EmaCrossSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            short_period: 9,
            long_period: 21,
        }
    }
}

/// Optional sentiment-index rule (fear & greed, 0-100)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentSettings {
    pub enabled: bool,
    /// Buy when the index is at or below this value
    pub buy_threshold: f64,
    /// Sell when the index has risen this many percent above its entry value
    pub sell_percent: f64,
    /// Sell when the index has fallen this many percent below its entry value
    pub stop_percent: f64,
}

impl Default for SentimentSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            buy_threshold: 30.0,
            sell_percent: 50.0,
            stop_percent: 30.0,
        }
    }
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            rsi: RsiSettings::default(),
            macd: MacdSettings::default(),
            bollinger: BollingerSettings::default(),
            ema_cross: EmaCrossSettings::default(),
            sentiment: SentimentSettings::default(),
        }
    }
}

impl IndicatorSettings {
    /// Strict validation, run before a bot is persisted
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.rsi.period == 0 {
            return Err(ValidationError::Settings("RSI period must be positive"));
        }
        if self.rsi.overbought <= self.rsi.oversold {
            return Err(ValidationError::Settings(
                "RSI overbought threshold must exceed the oversold threshold",
            ));
        }
        if !(0.0..=100.0).contains(&self.rsi.oversold)
            || !(0.0..=100.0).contains(&self.rsi.overbought)
        {
            return Err(ValidationError::Settings("RSI thresholds must be within 0-100"));
        }
        if self.macd.fast_period == 0 || self.macd.slow_period == 0 || self.macd.signal_period == 0 {
            return Err(ValidationError::Settings("MACD periods must be positive"));
        }
        if self.macd.fast_period >= self.macd.slow_period {
            return Err(ValidationError::Settings(
                "MACD fast period must be shorter than the slow period",
            ));
        }
        if self.bollinger.period == 0 {
            return Err(ValidationError::Settings("Bollinger period must be positive"));
        }
        if self.bollinger.std_dev <= 0.0 {
            return Err(ValidationError::Settings(
                "Bollinger deviation multiplier must be positive",
            ));
        }
        if self.ema_cross.short_period == 0 || self.ema_cross.long_period == 0 {
            return Err(ValidationError::Settings("EMA periods must be positive"));
        }
        if self.ema_cross.short_period >= self.ema_cross.long_period {
            return Err(ValidationError::Settings(
                "EMA short period must be shorter than the long period",
            ));
        }
        if !(0.0..=100.0).contains(&self.sentiment.buy_threshold) {
            return Err(ValidationError::Settings(
                "sentiment buy threshold must be within 0-100",
            ));
        }
        if self.sentiment.sell_percent < 0.0 || self.sentiment.stop_percent < 0.0 {
            return Err(ValidationError::Settings(
                "sentiment sell/stop percents must not be negative",
            ));
        }
        Ok(())
    }

    /// Number of indicators currently switched on
    pub fn enabled_count(&self) -> usize {
        [
            self.rsi.enabled,
            self.macd.enabled,
            self.bollinger.enabled,
            self.ema_cross.enabled,
            self.sentiment.enabled,
        ]
        .iter()
        .filter(|on| **on)
        .count()
    }
}
