//! Position risk evaluator
//!
//! Decides whether an open position should be exited: stop-loss,
//! take-profit, trailing stop, or an indicator-driven sell. Before any
//! threshold check the stored average entry price is reconciled against
//! the trade ledger to guard against drift from partial fills, manual
//! intervention, or restart races.

use super::error::CycleError;
use super::types::ExitTrigger;
use super::{CANDLE_LIMIT, MIN_CANDLES};
use crate::db::Database;
use crate::indicators::{effective_min_signals, Analysis, IndicatorEngine, Signal, Vote};
use crate::types::{Activity, ActivityKind, Bot, Trade, TradeSide, TradeStatus};
use crate::venue::Venue;
use anyhow::Context;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{debug, warn};

/// Relative deviation between stored and ledger-derived entry price that
/// forces a correction
const DRIFT_TOLERANCE: Decimal = dec!(0.005);

/// Outcome of one double-checked threshold comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Triggered,
    Clear,
    /// The percent check and the absolute-price cross-check disagree;
    /// treated as a data-quality signal and no action is taken this cycle
    Inconsistent,
}

/// Stop-loss check: percent threshold verified against the absolute floor
pub(crate) fn check_stop_loss(
    entry: Decimal,
    price: Decimal,
    pnl_percent: Decimal,
    threshold: Decimal,
) -> Verdict {
    if pnl_percent > -threshold {
        return Verdict::Clear;
    }
    let floor = entry * (Decimal::ONE - threshold / dec!(100));
    if price <= floor {
        Verdict::Triggered
    } else {
        Verdict::Inconsistent
    }
}

/// Take-profit check: symmetric positive-side double verification
pub(crate) fn check_take_profit(
    entry: Decimal,
    price: Decimal,
    pnl_percent: Decimal,
    threshold: Decimal,
) -> Verdict {
    if pnl_percent < threshold {
        return Verdict::Clear;
    }
    let ceiling = entry * (Decimal::ONE + threshold / dec!(100));
    if price >= ceiling {
        Verdict::Triggered
    } else {
        Verdict::Inconsistent
    }
}

/// Volume-weighted average price of the completed buys strictly after the
/// most recent completed sell (all buys when no sell exists)
pub(crate) fn entry_vwap(trades: &[Trade]) -> Option<Decimal> {
    let completed = |t: &&Trade| t.status == TradeStatus::Completed;
    let after = trades
        .iter()
        .rposition(|t| t.side == TradeSide::Sell && t.status == TradeStatus::Completed)
        .map_or(0, |i| i + 1);

    let mut quantity = Decimal::ZERO;
    let mut notional = Decimal::ZERO;
    for trade in trades[after..]
        .iter()
        .filter(|t| t.side == TradeSide::Buy)
        .filter(completed)
    {
        quantity += trade.quantity;
        notional += trade.price * trade.quantity;
    }

    if quantity > Decimal::ZERO {
        Some(notional / quantity)
    } else {
        None
    }
}

/// Evaluates exit conditions for an open position
pub struct RiskEvaluator {
    db: Arc<Database>,
    venue: Arc<dyn Venue>,
    engine: Arc<IndicatorEngine>,
}

impl RiskEvaluator {
    pub fn new(db: Arc<Database>, venue: Arc<dyn Venue>, engine: Arc<IndicatorEngine>) -> Self {
        Self { db, venue, engine }
    }

    /// Check the open position against all exit rules, first match wins.
    ///
    /// Always refreshes the bot's last-signal snapshot (when indicators
    /// ran) and logs an analysis activity, even when no exit triggers.
    /// Mutations to `bot` are persisted before returning.
    pub async fn check_exit(
        &self,
        bot: &mut Bot,
        price: Decimal,
    ) -> Result<Option<ExitTrigger>, CycleError> {
        if bot.avg_entry_price <= Decimal::ZERO {
            return Ok(None);
        }

        self.reconcile_entry_price(bot).await?;

        let entry = bot.avg_entry_price;
        let pnl_percent = (price - entry) / entry * dec!(100);

        let mut trigger = None;
        let mut inconsistent = false;

        // 1. Stop loss
        if bot.stop_loss_percent > 0.0 {
            let threshold = Decimal::try_from(bot.stop_loss_percent)
                .context("Bad stop-loss percent")?;
            match check_stop_loss(entry, price, pnl_percent, threshold) {
                Verdict::Triggered => {
                    trigger = Some(ExitTrigger::StopLoss { price, pnl_percent });
                }
                Verdict::Inconsistent => {
                    warn!(
                        "[Risk] bot {} ({}): stop-loss checks disagree (pnl {:.2}% vs price {} above floor), holding off this cycle",
                        bot.id, bot.symbol, pnl_percent, price
                    );
                    inconsistent = true;
                }
                Verdict::Clear => {}
            }
        }

        // 2. Take profit
        if trigger.is_none() && !inconsistent && bot.take_profit_percent > 0.0 {
            let threshold = Decimal::try_from(bot.take_profit_percent)
                .context("Bad take-profit percent")?;
            match check_take_profit(entry, price, pnl_percent, threshold) {
                Verdict::Triggered => {
                    trigger = Some(ExitTrigger::TakeProfit { price, pnl_percent });
                }
                Verdict::Inconsistent => {
                    warn!(
                        "[Risk] bot {} ({}): take-profit checks disagree (pnl {:.2}% vs price {} below ceiling), holding off this cycle",
                        bot.id, bot.symbol, pnl_percent, price
                    );
                    inconsistent = true;
                }
                Verdict::Clear => {}
            }
        }

        // 3. Trailing stop, evaluated only while the position is in profit
        if trigger.is_none()
            && !inconsistent
            && bot.trailing_stop_percent > 0.0
            && pnl_percent > Decimal::ZERO
        {
            let trail = Decimal::try_from(bot.trailing_stop_percent)
                .context("Bad trailing-stop percent")?;
            let highest = bot.highest_price.unwrap_or(entry);

            if price > highest {
                // New peak: ratchet the stop upwards, never trigger
                let stop = price * (Decimal::ONE - trail / dec!(100));
                debug!(
                    "[Risk] bot {} ({}): new peak {}, trailing stop moves to {}",
                    bot.id, bot.symbol, price, stop
                );
                bot.highest_price = Some(price);
                bot.trailing_stop_price = Some(stop);
            } else if let Some(stop) = bot.trailing_stop_price {
                if price <= stop {
                    trigger = Some(ExitTrigger::TrailingStop {
                        peak: highest,
                        stop,
                        price,
                    });
                }
            }
        }

        // 4. Indicator-driven exit; skipped entirely on short candle history
        let mut analysis = None;
        if trigger.is_none() && !inconsistent {
            let candles = self
                .venue
                .candles(&bot.symbol, bot.interval, CANDLE_LIMIT)
                .await?;
            if candles.len() >= MIN_CANDLES {
                let result = self
                    .engine
                    .evaluate(&candles, &bot.indicator_settings, bot.entry_sentiment)
                    .await;

                bot.last_signal = Some(result.signal.as_str().to_string());
                bot.last_signal_time = Some(Utc::now());
                bot.last_indicator_values = Some(result.summary());

                if result.signal == Signal::Sell {
                    let needed =
                        effective_min_signals(bot.min_signals, result.evaluated_count());
                    if result.sell_count >= needed {
                        trigger = Some(ExitTrigger::IndicatorSell {
                            sell_votes: result.sell_count,
                            indicators: result.voters(Vote::Sell),
                        });
                    }
                }
                analysis = Some(result);
            } else {
                debug!(
                    "[Risk] bot {} ({}): {} candles, skipping indicator exit check",
                    bot.id,
                    bot.symbol,
                    candles.len()
                );
            }
        }

        self.db.update_bot(bot).await?;
        self.log_analysis(bot, pnl_percent, analysis.as_ref()).await?;

        Ok(trigger)
    }

    /// Recompute the average entry price from the ledger and correct the
    /// stored value when it has drifted more than [`DRIFT_TOLERANCE`]
    async fn reconcile_entry_price(&self, bot: &mut Bot) -> Result<(), CycleError> {
        let trades = self.db.trades_for_bot(bot.id).await?;
        let Some(ledger_price) = entry_vwap(&trades) else {
            return Ok(());
        };
        if ledger_price <= Decimal::ZERO {
            return Ok(());
        }

        let drift = ((bot.avg_entry_price - ledger_price) / ledger_price).abs();
        if drift > DRIFT_TOLERANCE {
            warn!(
                "[Risk] bot {} ({}): stored avg entry {} drifted {:.2}% from ledger {}, correcting",
                bot.id,
                bot.symbol,
                bot.avg_entry_price,
                drift * dec!(100),
                ledger_price
            );
            bot.avg_entry_price = ledger_price;
        }

        Ok(())
    }

    async fn log_analysis(
        &self,
        bot: &Bot,
        pnl_percent: Decimal,
        analysis: Option<&Analysis>,
    ) -> Result<(), CycleError> {
        let pnl = pnl_percent.to_f64().unwrap_or(0.0);
        let message = format!(
            "Holding {}: PnL {:+.2}% (stop -{:.1}%, target +{:.1}%)",
            bot.symbol, pnl, bot.stop_loss_percent, bot.take_profit_percent
        );

        let activity = Activity {
            id: None,
            bot_id: bot.id,
            bot_name: bot.name.clone(),
            symbol: bot.symbol.clone(),
            kind: ActivityKind::Analysis,
            message,
            buy_signals: analysis.map(|a| a.buy_count as i64),
            sell_signals: analysis.map(|a| a.sell_count as i64),
            indicators: analysis.map(|a| a.summary()),
            created_at: Utc::now(),
        };
        self.db.add_activity(&activity).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::{
        bot_fixture, candles_from_closes, indicator_engine, memory_db, new_bot_fixture,
        rising_closes,
    };
    use crate::venue::PaperVenue;

    async fn holding_bot(db: &Database) -> Bot {
        let mut bot = db.create_bot(&new_bot_fixture()).await.unwrap();
        bot.status = crate::types::BotStatus::Active;
        bot.current_balance = dec!(10);
        bot.invested_amount = dec!(1000);
        bot.avg_entry_price = dec!(100);
        db.update_bot(&bot).await.unwrap();
        bot
    }

    async fn evaluator(db: Arc<Database>, venue: Arc<PaperVenue>) -> RiskEvaluator {
        RiskEvaluator::new(db, venue, indicator_engine())
    }

    fn ledger_buy(bot_id: i64, price: Decimal, qty: Decimal) -> Trade {
        Trade {
            id: None,
            bot_id,
            symbol: "BTC/USDT".to_string(),
            side: TradeSide::Buy,
            order_type: "market".to_string(),
            price,
            quantity: qty,
            total: price * qty,
            pnl: None,
            pnl_percent: None,
            signals: None,
            order_id: None,
            status: TradeStatus::Completed,
            created_at: Utc::now(),
        }
    }

    fn ledger_sell(bot_id: i64, price: Decimal, qty: Decimal) -> Trade {
        Trade {
            side: TradeSide::Sell,
            pnl: Some(Decimal::ZERO),
            pnl_percent: Some(0.0),
            ..ledger_buy(bot_id, price, qty)
        }
    }

    #[test]
    fn stop_loss_triggers_at_scenario_a() {
        // entry 100, stop 5%, price 94: pnl -6% <= -5% and 94 <= 95
        let verdict = check_stop_loss(dec!(100), dec!(94), dec!(-6), dec!(5));
        assert_eq!(verdict, Verdict::Triggered);
    }

    #[test]
    fn stop_loss_stays_clear_above_threshold() {
        let verdict = check_stop_loss(dec!(100), dec!(96), dec!(-4), dec!(5));
        assert_eq!(verdict, Verdict::Clear);
    }

    #[test]
    fn stop_loss_flags_disagreeing_inputs() {
        // Percent says breach, but the price itself sits above the floor
        let verdict = check_stop_loss(dec!(100), dec!(98), dec!(-6), dec!(5));
        assert_eq!(verdict, Verdict::Inconsistent);
    }

    #[test]
    fn take_profit_triggers_at_scenario_b() {
        // entry 100, target 10%, price 111
        let verdict = check_take_profit(dec!(100), dec!(111), dec!(11), dec!(10));
        assert_eq!(verdict, Verdict::Triggered);
    }

    #[test]
    fn vwap_uses_only_buys_after_the_last_sell() {
        let trades = vec![
            ledger_buy(1, dec!(90), dec!(1)),
            ledger_sell(1, dec!(95), dec!(1)),
            ledger_buy(1, dec!(100), dec!(1)),
            ledger_buy(1, dec!(110), dec!(3)),
        ];
        // (100*1 + 110*3) / 4 = 107.5
        assert_eq!(entry_vwap(&trades), Some(dec!(107.5)));
    }

    #[test]
    fn vwap_covers_all_buys_when_no_sell_exists() {
        let trades = vec![
            ledger_buy(1, dec!(100), dec!(2)),
            ledger_buy(1, dec!(200), dec!(2)),
        ];
        assert_eq!(entry_vwap(&trades), Some(dec!(150)));
    }

    #[test]
    fn vwap_is_none_when_flat_since_last_sell() {
        let trades = vec![
            ledger_buy(1, dec!(100), dec!(1)),
            ledger_sell(1, dec!(110), dec!(1)),
        ];
        assert_eq!(entry_vwap(&trades), None);
    }

    #[tokio::test]
    async fn stop_loss_exit_fires_through_the_evaluator() {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());
        let mut bot = holding_bot(&db).await;
        venue.set_candles("BTC/USDT", vec![]).await;

        let trigger = evaluator(db.clone(), venue)
            .await
            .check_exit(&mut bot, dec!(94))
            .await
            .unwrap();

        assert!(matches!(trigger, Some(ExitTrigger::StopLoss { .. })));
        // Analysis activity was logged even though an exit triggered
        let activities = db.activities_for_bot(bot.id, 10).await.unwrap();
        assert_eq!(activities[0].kind, ActivityKind::Analysis);
    }

    #[tokio::test]
    async fn take_profit_exit_fires_through_the_evaluator() {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());
        let mut bot = holding_bot(&db).await;
        venue.set_candles("BTC/USDT", vec![]).await;

        let trigger = evaluator(db.clone(), venue)
            .await
            .check_exit(&mut bot, dec!(111))
            .await
            .unwrap();

        assert!(matches!(trigger, Some(ExitTrigger::TakeProfit { .. })));
    }

    #[tokio::test]
    async fn trailing_stop_ratchets_then_triggers() {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());
        venue.set_candles("BTC/USDT", vec![]).await;

        let mut bot = holding_bot(&db).await;
        bot.stop_loss_percent = 0.0;
        bot.take_profit_percent = 0.0;
        bot.trailing_stop_percent = 5.0;
        db.update_bot(&bot).await.unwrap();

        let eval = evaluator(db.clone(), venue).await;

        // Price rises to 120: new peak, stop moves to 114, no trigger
        let trigger = eval.check_exit(&mut bot, dec!(120)).await.unwrap();
        assert!(trigger.is_none());
        assert_eq!(bot.highest_price, Some(dec!(120)));
        assert_eq!(bot.trailing_stop_price, Some(dec!(114.00)));

        // Dip to 115: above the stop, peak unchanged, no trigger
        let trigger = eval.check_exit(&mut bot, dec!(115)).await.unwrap();
        assert!(trigger.is_none());
        assert_eq!(bot.highest_price, Some(dec!(120)));

        // Fall to 113: at or below the stop
        let trigger = eval.check_exit(&mut bot, dec!(113)).await.unwrap();
        assert!(matches!(trigger, Some(ExitTrigger::TrailingStop { .. })));
    }

    #[tokio::test]
    async fn drift_correction_overwrites_a_stale_entry_price() {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());
        venue.set_candles("BTC/USDT", vec![]).await;

        let mut bot = holding_bot(&db).await;
        // Ledger says the position was built at 110, stored value says 100
        db.record_trade(&ledger_buy(bot.id, dec!(110), dec!(10)))
            .await
            .unwrap();

        let eval = evaluator(db.clone(), venue).await;
        let trigger = eval.check_exit(&mut bot, dec!(109)).await.unwrap();

        // Against the corrected entry of 110 the position is roughly flat
        assert!(trigger.is_none());
        assert_eq!(bot.avg_entry_price, dec!(110));
        let stored = db.get_bot(bot.id).await.unwrap().unwrap();
        assert_eq!(stored.avg_entry_price, dec!(110));
    }

    #[tokio::test]
    async fn small_drift_keeps_the_stored_entry_price() {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());
        venue.set_candles("BTC/USDT", vec![]).await;

        let mut bot = holding_bot(&db).await;
        // 0.3% off: within tolerance
        db.record_trade(&ledger_buy(bot.id, dec!(100.3), dec!(10)))
            .await
            .unwrap();

        let eval = evaluator(db.clone(), venue).await;
        eval.check_exit(&mut bot, dec!(101)).await.unwrap();

        assert_eq!(bot.avg_entry_price, dec!(100));
    }

    #[tokio::test]
    async fn indicator_sell_exit_collects_voter_names() {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());
        // Straight rally: RSI overbought votes sell
        venue
            .set_candles(
                "BTC/USDT",
                candles_from_closes(&rising_closes(40, 100.0)),
            )
            .await;

        let mut bot = holding_bot(&db).await;
        bot.stop_loss_percent = 0.0;
        bot.take_profit_percent = 0.0;
        bot.indicator_settings.macd.enabled = false;
        bot.indicator_settings.bollinger.enabled = false;
        bot.indicator_settings.ema_cross.enabled = false;
        db.update_bot(&bot).await.unwrap();

        let eval = evaluator(db.clone(), venue).await;
        let trigger = eval.check_exit(&mut bot, dec!(139)).await.unwrap();

        match trigger {
            Some(ExitTrigger::IndicatorSell { indicators, .. }) => {
                assert_eq!(indicators, vec!["RSI"]);
            }
            other => panic!("expected indicator exit, got {other:?}"),
        }
        assert_eq!(bot.last_signal.as_deref(), Some("sell"));
        assert!(bot.last_indicator_values.is_some());
    }

    #[tokio::test]
    async fn short_candle_history_skips_the_indicator_check() {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());
        venue
            .set_candles("BTC/USDT", candles_from_closes(&rising_closes(10, 100.0)))
            .await;

        let mut bot = holding_bot(&db).await;
        bot.stop_loss_percent = 0.0;
        bot.take_profit_percent = 0.0;
        db.update_bot(&bot).await.unwrap();

        let eval = evaluator(db.clone(), venue).await;
        let trigger = eval.check_exit(&mut bot, dec!(109)).await.unwrap();

        assert!(trigger.is_none());
        // Snapshot untouched: indicators never ran
        assert!(bot.last_signal.is_none());
    }

    #[tokio::test]
    async fn flat_bot_is_ignored() {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());
        let mut bot = bot_fixture();

        let eval = evaluator(db, venue).await;
        let trigger = eval.check_exit(&mut bot, dec!(100)).await.unwrap();
        assert!(trigger.is_none());
    }
}
