//! Dollar-cost-averaging evaluator
//!
//! Adds to an open position while the investment target is not yet fully
//! deployed and the indicators signal a fresh buying opportunity. The
//! average entry price is updated by volume weighting, never replaced.

use super::error::CycleError;
use super::CANDLE_LIMIT;
use crate::db::Database;
use crate::indicators::{effective_min_signals, IndicatorEngine, Signal, Vote};
use crate::types::{Activity, ActivityKind, Bot, Trade, TradeSide, TradeStatus};
use crate::venue::{quantize, SymbolConstraints, Venue};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

/// Volume-weighted average of an existing position and a new fill
pub(crate) fn weighted_average_price(
    old_price: Decimal,
    old_qty: Decimal,
    fill_price: Decimal,
    fill_qty: Decimal,
) -> Decimal {
    let total_qty = old_qty + fill_qty;
    if total_qty <= Decimal::ZERO {
        return fill_price;
    }
    (old_price * old_qty + fill_price * fill_qty) / total_qty
}

/// Evaluates add-to-position opportunities
pub struct DcaEvaluator {
    db: Arc<Database>,
    venue: Arc<dyn Venue>,
    engine: Arc<IndicatorEngine>,
}

impl DcaEvaluator {
    pub fn new(db: Arc<Database>, venue: Arc<dyn Venue>, engine: Arc<IndicatorEngine>) -> Self {
        Self { db, venue, engine }
    }

    /// Consider one DCA buy. Invoked only while a position is open and no
    /// exit triggered this cycle. Returns the recorded trade when a buy
    /// was executed.
    pub async fn check_dca(
        &self,
        bot: &mut Bot,
        price: Decimal,
        constraints: &SymbolConstraints,
    ) -> Result<Option<Trade>, CycleError> {
        let remaining = bot.investment - bot.invested_amount;
        if remaining <= Decimal::ZERO {
            debug!(
                "[DCA] bot {} ({}): investment target fully deployed",
                bot.id, bot.symbol
            );
            return Ok(None);
        }
        if remaining < constraints.min_notional {
            debug!(
                "[DCA] bot {} ({}): remaining {} below min notional {}",
                bot.id, bot.symbol, remaining, constraints.min_notional
            );
            return Ok(None);
        }

        // A fresh buy signal is required for every tranche
        let candles = self
            .venue
            .candles(&bot.symbol, bot.interval, CANDLE_LIMIT)
            .await?;
        let analysis = self
            .engine
            .evaluate(&candles, &bot.indicator_settings, bot.entry_sentiment)
            .await;

        let needed = effective_min_signals(bot.min_signals, analysis.evaluated_count());
        if analysis.signal != Signal::Buy || analysis.buy_count < needed {
            debug!(
                "[DCA] bot {} ({}): no buy signal ({} buy / {} sell, need {})",
                bot.id, bot.symbol, analysis.buy_count, analysis.sell_count, needed
            );
            return Ok(None);
        }

        let available = self.venue.asset_balance(bot.quote_asset()).await?;
        let invest = remaining.min(available);
        if invest < constraints.min_notional {
            debug!(
                "[DCA] bot {} ({}): investable {} below min notional {}",
                bot.id, bot.symbol, invest, constraints.min_notional
            );
            return Ok(None);
        }

        let qty = quantize(invest / price, constraints.step_size);
        if qty < constraints.min_qty || qty * price < constraints.min_notional {
            return Ok(None);
        }

        let fill = self
            .venue
            .market_order(&bot.symbol, TradeSide::Buy, qty)
            .await
            .map_err(CycleError::from_order)?;

        info!(
            "[DCA] bot {} ({}): bought {} at {} ({} deployed of {})",
            bot.id,
            bot.symbol,
            fill.executed_qty,
            fill.avg_price,
            bot.invested_amount + fill.cumulative_quote_qty,
            bot.investment
        );

        bot.avg_entry_price = weighted_average_price(
            bot.avg_entry_price,
            bot.current_balance,
            fill.avg_price,
            fill.executed_qty,
        );
        bot.current_balance += fill.executed_qty;
        bot.invested_amount += fill.cumulative_quote_qty;
        bot.total_trades += 1;
        self.db.update_bot(bot).await?;

        let buyers = analysis.voters(Vote::Buy).join(",");
        let trade = Trade {
            id: None,
            bot_id: bot.id,
            symbol: bot.symbol.clone(),
            side: TradeSide::Buy,
            order_type: "market".to_string(),
            price: fill.avg_price,
            quantity: fill.executed_qty,
            total: fill.cumulative_quote_qty,
            pnl: None,
            pnl_percent: None,
            signals: Some(buyers.clone()),
            order_id: Some(fill.order_id.clone()),
            status: TradeStatus::Completed,
            created_at: Utc::now(),
        };
        self.db.record_trade(&trade).await?;

        let activity = Activity {
            id: None,
            bot_id: bot.id,
            bot_name: bot.name.clone(),
            symbol: bot.symbol.clone(),
            kind: ActivityKind::Buy,
            message: format!(
                "DCA buy: {} at {} (avg entry now {}, {} of {} deployed) on {}",
                fill.executed_qty,
                fill.avg_price,
                bot.avg_entry_price,
                bot.invested_amount,
                bot.investment,
                buyers
            ),
            buy_signals: Some(analysis.buy_count as i64),
            sell_signals: Some(analysis.sell_count as i64),
            indicators: Some(analysis.summary()),
            created_at: Utc::now(),
        };
        self.db.add_activity(&activity).await?;

        Ok(Some(trade))
    }
}
