//! Types shared across the cycle evaluators

use rust_decimal::Decimal;
use serde::Serialize;

/// Why a position is being exited
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ExitTrigger {
    StopLoss {
        price: Decimal,
        pnl_percent: Decimal,
    },
    TakeProfit {
        price: Decimal,
        pnl_percent: Decimal,
    },
    TrailingStop {
        peak: Decimal,
        stop: Decimal,
        price: Decimal,
    },
    IndicatorSell {
        sell_votes: usize,
        indicators: Vec<String>,
    },
}

impl ExitTrigger {
    /// Short name persisted as the bot's last sell reason
    pub fn action_name(&self) -> &'static str {
        match self {
            ExitTrigger::StopLoss { .. } => "stop_loss",
            ExitTrigger::TakeProfit { .. } => "take_profit",
            ExitTrigger::TrailingStop { .. } => "trailing_stop",
            ExitTrigger::IndicatorSell { .. } => "indicator_sell",
        }
    }

    /// Human-readable reason for the activity feed
    pub fn reason(&self) -> String {
        match self {
            ExitTrigger::StopLoss { pnl_percent, .. } => {
                format!("Stop loss triggered at {pnl_percent:.2}%")
            }
            ExitTrigger::TakeProfit { pnl_percent, .. } => {
                format!("Take profit triggered at +{pnl_percent:.2}%")
            }
            ExitTrigger::TrailingStop { peak, stop, price } => {
                format!("Trailing stop: price {price} fell to stop {stop} (peak {peak})")
            }
            ExitTrigger::IndicatorSell { sell_votes, indicators } => {
                format!(
                    "Indicator exit: {} sell vote(s) from {}",
                    sell_votes,
                    indicators.join(", ")
                )
            }
        }
    }

    /// Indicator names that voted for this exit, if indicator-driven
    pub fn indicators(&self) -> Option<&[String]> {
        match self {
            ExitTrigger::IndicatorSell { indicators, .. } => Some(indicators),
            _ => None,
        }
    }
}
