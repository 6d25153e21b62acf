//! Indicator engine
//!
//! Evaluates the enabled indicators for the latest candle window and
//! aggregates their votes into an overall buy/sell/hold signal. Indicators
//! without enough history (and a stale or unavailable sentiment index) are
//! skipped entirely rather than counted as neutral.

pub mod math;
pub mod settings;

pub use settings::{
    BollingerSettings, EmaCrossSettings, IndicatorSettings, MacdSettings, RsiSettings,
    SentimentSettings, ValidationError,
};

use crate::sentiment::{SentimentReading, SentimentSource};
use crate::types::Candle;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Overall recommendation for the latest candle window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Buy => "buy",
            Signal::Sell => "sell",
            Signal::Hold => "hold",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One indicator's classification of the latest window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Buy,
    Sell,
    Neutral,
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vote::Buy => write!(f, "buy"),
            Vote::Sell => write!(f, "sell"),
            Vote::Neutral => write!(f, "neutral"),
        }
    }
}

/// Structured decision record for one evaluated indicator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorDecision {
    pub indicator: String,
    pub vote: Vote,
    /// The computed indicator value (RSI level, %B, MACD histogram, ...)
    pub value: f64,
    /// Value and thresholds in human-readable form
    pub detail: String,
}

impl IndicatorDecision {
    fn new(indicator: &str, vote: Vote, value: f64, detail: String) -> Self {
        Self {
            indicator: indicator.to_string(),
            vote,
            value,
            detail,
        }
    }
}

/// Aggregated result of one evaluation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub decisions: Vec<IndicatorDecision>,
    pub signal: Signal,
    pub buy_count: usize,
    pub sell_count: usize,
    /// buy_count / evaluated indicators, as a percentage (0 when nothing
    /// was evaluated)
    pub buy_strength: f64,
    pub sell_strength: f64,
    /// Sentiment index value used in this pass, if the rule participated
    pub sentiment: Option<f64>,
}

impl Analysis {
    fn from_decisions(decisions: Vec<IndicatorDecision>, sentiment: Option<f64>) -> Self {
        let buy_count = decisions.iter().filter(|d| d.vote == Vote::Buy).count();
        let sell_count = decisions.iter().filter(|d| d.vote == Vote::Sell).count();
        let evaluated = decisions.len();

        let signal = if buy_count > 0 && buy_count > sell_count {
            Signal::Buy
        } else if sell_count > 0 && sell_count > buy_count {
            Signal::Sell
        } else {
            Signal::Hold
        };

        let (buy_strength, sell_strength) = if evaluated == 0 {
            (0.0, 0.0)
        } else {
            (
                buy_count as f64 / evaluated as f64 * 100.0,
                sell_count as f64 / evaluated as f64 * 100.0,
            )
        };

        Self {
            decisions,
            signal,
            buy_count,
            sell_count,
            buy_strength,
            sell_strength,
            sentiment,
        }
    }

    /// Number of indicators that actually produced a vote this pass
    pub fn evaluated_count(&self) -> usize {
        self.decisions.len()
    }

    /// Names of the indicators that cast the given vote
    pub fn voters(&self, vote: Vote) -> Vec<String> {
        self.decisions
            .iter()
            .filter(|d| d.vote == vote)
            .map(|d| d.indicator.clone())
            .collect()
    }

    /// One-line snapshot for the activity feed and bot telemetry
    pub fn summary(&self) -> String {
        self.decisions
            .iter()
            .map(|d| format!("{} {:.2} [{}]", d.indicator, d.value, d.vote))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Minimum agreeing votes required to act, clamped to the number of
/// indicators that produced a vote. Falls back to the configured value when
/// nothing was evaluated.
pub fn effective_min_signals(configured: usize, evaluated: usize) -> usize {
    if evaluated == 0 {
        configured
    } else {
        configured.clamp(1, evaluated)
    }
}

/// Evaluates enabled indicators against a candle series
pub struct IndicatorEngine {
    sentiment: Arc<dyn SentimentSource>,
}

impl IndicatorEngine {
    pub fn new(sentiment: Arc<dyn SentimentSource>) -> Self {
        Self { sentiment }
    }

    /// Run one evaluation pass over the candle series.
    ///
    /// `entry_sentiment` is the index value captured when the current
    /// position was opened; it arms the sentiment rule's sell triggers.
    pub async fn evaluate(
        &self,
        candles: &[Candle],
        settings: &IndicatorSettings,
        entry_sentiment: Option<f64>,
    ) -> Analysis {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let mut decisions = Vec::new();

        if settings.rsi.enabled {
            if let Some(decision) = evaluate_rsi(&closes, &settings.rsi) {
                decisions.push(decision);
            }
        }
        if settings.macd.enabled {
            if let Some(decision) = evaluate_macd(&closes, &settings.macd) {
                decisions.push(decision);
            }
        }
        if settings.bollinger.enabled {
            if let Some(decision) = evaluate_bollinger(&closes, &settings.bollinger) {
                decisions.push(decision);
            }
        }
        if settings.ema_cross.enabled {
            if let Some(decision) = evaluate_ema_cross(&closes, &settings.ema_cross) {
                decisions.push(decision);
            }
        }

        let mut sentiment_value = None;
        if settings.sentiment.enabled {
            // A stale or unavailable index excludes the rule from this pass
            if let Some(reading) = self.sentiment.fresh().await {
                sentiment_value = Some(reading.value);
                decisions.push(evaluate_sentiment(
                    &reading,
                    &settings.sentiment,
                    entry_sentiment,
                ));
            }
        }

        Analysis::from_decisions(decisions, sentiment_value)
    }
}

fn evaluate_rsi(closes: &[f64], s: &RsiSettings) -> Option<IndicatorDecision> {
    let value = math::rsi(closes, s.period)?;
    let (vote, detail) = if value < s.oversold {
        (Vote::Buy, format!("RSI {value:.1} below oversold {:.1}", s.oversold))
    } else if value > s.overbought {
        (Vote::Sell, format!("RSI {value:.1} above overbought {:.1}", s.overbought))
    } else {
        (Vote::Neutral, format!("RSI {value:.1} inside {:.1}-{:.1}", s.oversold, s.overbought))
    };
    Some(IndicatorDecision::new("RSI", vote, value, detail))
}

fn evaluate_macd(closes: &[f64], s: &MacdSettings) -> Option<IndicatorDecision> {
    let points = math::macd(closes, s.fast_period, s.slow_period, s.signal_period);
    if points.len() < 2 {
        return None;
    }
    let prev = points[points.len() - 2];
    let curr = points[points.len() - 1];

    let (vote, detail) = if prev.macd <= prev.signal && curr.macd > curr.signal {
        (Vote::Buy, format!("MACD {:.4} crossed above signal {:.4}", curr.macd, curr.signal))
    } else if prev.macd >= prev.signal && curr.macd < curr.signal {
        (Vote::Sell, format!("MACD {:.4} crossed below signal {:.4}", curr.macd, curr.signal))
    } else if curr.macd > curr.signal && curr.histogram > 0.0 {
        (Vote::Buy, format!("MACD {:.4} above signal, histogram {:.4}", curr.macd, curr.histogram))
    } else if curr.macd < curr.signal && curr.histogram < 0.0 {
        (Vote::Sell, format!("MACD {:.4} below signal, histogram {:.4}", curr.macd, curr.histogram))
    } else {
        (Vote::Neutral, format!("MACD {:.4} on signal {:.4}", curr.macd, curr.signal))
    };
    Some(IndicatorDecision::new("MACD", vote, curr.histogram, detail))
}

fn evaluate_bollinger(closes: &[f64], s: &BollingerSettings) -> Option<IndicatorDecision> {
    let bands = math::bollinger(closes, s.period, s.std_dev)?;
    let close = *closes.last()?;
    let percent_b = bands.percent_b(close);

    let (vote, detail) = if close <= bands.lower || percent_b <= 0.05 {
        (Vote::Buy, format!("close {close:.4} at lower band {:.4}", bands.lower))
    } else if close >= bands.upper || percent_b >= 0.95 {
        (Vote::Sell, format!("close {close:.4} at upper band {:.4}", bands.upper))
    } else if percent_b <= 0.20 {
        (Vote::Neutral, format!("close {close:.4} near lower band {:.4}", bands.lower))
    } else if percent_b >= 0.80 {
        (Vote::Neutral, format!("close {close:.4} near upper band {:.4}", bands.upper))
    } else {
        (Vote::Neutral, format!("close {close:.4} inside bands"))
    };
    Some(IndicatorDecision::new("BB", vote, percent_b, detail))
}

fn evaluate_ema_cross(closes: &[f64], s: &EmaCrossSettings) -> Option<IndicatorDecision> {
    let short = math::ema(closes, s.short_period)?;
    let long = math::ema(closes, s.long_period)?;
    let close = *closes.last()?;

    // Cross detection needs the previous pair as well; with exactly
    // long_period candles only the continuation branches can fire.
    let prev = if closes.len() > s.long_period {
        let window = &closes[..closes.len() - 1];
        math::ema(window, s.short_period).zip(math::ema(window, s.long_period))
    } else {
        None
    };

    let (vote, detail) = match prev {
        Some((prev_short, prev_long)) if prev_short <= prev_long && short > long => {
            (Vote::Buy, format!("EMA{} {short:.4} crossed above EMA{} {long:.4}", s.short_period, s.long_period))
        }
        Some((prev_short, prev_long)) if prev_short >= prev_long && short < long => {
            (Vote::Sell, format!("EMA{} {short:.4} crossed below EMA{} {long:.4}", s.short_period, s.long_period))
        }
        _ if short > long && close > short => {
            (Vote::Buy, format!("EMA{} {short:.4} above EMA{} {long:.4}, price trending up", s.short_period, s.long_period))
        }
        _ if short < long && close < short => {
            (Vote::Sell, format!("EMA{} {short:.4} below EMA{} {long:.4}, price trending down", s.short_period, s.long_period))
        }
        _ => (Vote::Neutral, format!("EMA{} {short:.4} vs EMA{} {long:.4}", s.short_period, s.long_period)),
    };
    Some(IndicatorDecision::new("EMA", vote, short - long, detail))
}

fn evaluate_sentiment(
    reading: &SentimentReading,
    s: &SentimentSettings,
    entry: Option<f64>,
) -> IndicatorDecision {
    let value = reading.value;

    if let Some(entry) = entry.filter(|e| *e > 0.0) {
        let change_percent = (value - entry) / entry * 100.0;
        if s.sell_percent > 0.0 && change_percent >= s.sell_percent {
            return IndicatorDecision::new(
                "Sentiment",
                Vote::Sell,
                value,
                format!("index {value:.0} up {change_percent:.1}% from entry {entry:.0}"),
            );
        }
        if s.stop_percent > 0.0 && -change_percent >= s.stop_percent {
            return IndicatorDecision::new(
                "Sentiment",
                Vote::Sell,
                value,
                format!("index {value:.0} down {:.1}% from entry {entry:.0}", -change_percent),
            );
        }
    }

    if value <= s.buy_threshold {
        IndicatorDecision::new(
            "Sentiment",
            Vote::Buy,
            value,
            format!("index {value:.0} ({}) at or below buy threshold {:.0}", reading.classification, s.buy_threshold),
        )
    } else {
        IndicatorDecision::new(
            "Sentiment",
            Vote::Neutral,
            value,
            format!("index {value:.0} ({}) above buy threshold {:.0}", reading.classification, s.buy_threshold),
        )
    }
}
