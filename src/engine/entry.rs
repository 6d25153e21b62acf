//! Entry evaluator
//!
//! Opens a new position from a flat state when the indicators agree on a
//! buy. Position state is always initialized from the executed fill
//! reported by the venue, never from the pre-trade estimate.

use super::error::CycleError;
use super::{CANDLE_LIMIT, MIN_CANDLES};
use crate::db::Database;
use crate::indicators::{effective_min_signals, IndicatorEngine, Signal, Vote};
use crate::types::{Activity, ActivityKind, Bot, Trade, TradeSide, TradeStatus};
use crate::venue::{quantize, SymbolConstraints, Venue};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{debug, info};

/// Time left in the post-sell cooldown window, `None` when entries are
/// allowed. The very first entry is never gated.
pub(crate) fn cooldown_remaining(bot: &Bot, now: DateTime<Utc>) -> Option<Duration> {
    if bot.cooldown_minutes <= 0 {
        return None;
    }
    let last_sell = bot.last_sell_time?;
    let window = Duration::minutes(bot.cooldown_minutes);
    let elapsed = now - last_sell;
    if elapsed < window {
        Some(window - elapsed)
    } else {
        None
    }
}

/// Evaluates new-position entries
pub struct EntryEvaluator {
    db: Arc<Database>,
    venue: Arc<dyn Venue>,
    engine: Arc<IndicatorEngine>,
}

impl EntryEvaluator {
    pub fn new(db: Arc<Database>, venue: Arc<dyn Venue>, engine: Arc<IndicatorEngine>) -> Self {
        Self { db, venue, engine }
    }

    /// Consider opening a position. Invoked only when flat and outside the
    /// cooldown window. Returns the recorded trade when a buy was executed.
    pub async fn check_entry(
        &self,
        bot: &mut Bot,
        price: Decimal,
        constraints: &SymbolConstraints,
    ) -> Result<Option<Trade>, CycleError> {
        let candles = self
            .venue
            .candles(&bot.symbol, bot.interval, CANDLE_LIMIT)
            .await?;
        if candles.len() < MIN_CANDLES {
            return Err(CycleError::InsufficientData {
                have: candles.len(),
                need: MIN_CANDLES,
            });
        }

        let analysis = self
            .engine
            .evaluate(&candles, &bot.indicator_settings, None)
            .await;

        bot.last_signal = Some(analysis.signal.as_str().to_string());
        bot.last_signal_time = Some(Utc::now());
        bot.last_indicator_values = Some(analysis.summary());
        self.db.update_bot(bot).await?;

        let needed = effective_min_signals(bot.min_signals, analysis.evaluated_count());
        if analysis.signal != Signal::Buy || analysis.buy_count < needed {
            debug!(
                "[Entry] bot {} ({}): no entry, signal {} ({} buy / {} sell, need {})",
                bot.id,
                bot.symbol,
                analysis.signal,
                analysis.buy_count,
                analysis.sell_count,
                needed
            );
            self.log_no_entry(bot, &analysis).await?;
            return Ok(None);
        }

        // Size against the investment target, reduced to the available
        // quote balance when the account cannot cover the full target
        let quote = bot.quote_asset().to_string();
        let available = self.venue.asset_balance(&quote).await?;
        let mut invest = bot.investment;
        if available < invest {
            if available >= constraints.min_notional {
                info!(
                    "[Entry] bot {} ({}): partial entry, {} available of {} target",
                    bot.id, bot.symbol, available, invest
                );
                invest = available;
            } else {
                return Err(CycleError::InsufficientBalance {
                    asset: quote,
                    available,
                    required: constraints.min_notional,
                });
            }
        }

        let qty = quantize(invest / price, constraints.step_size);
        if qty < constraints.min_qty || qty * price < constraints.min_notional {
            return Err(CycleError::InsufficientBalance {
                asset: quote,
                available: invest,
                required: constraints.min_notional,
            });
        }

        let fill = self
            .venue
            .market_order(&bot.symbol, TradeSide::Buy, qty)
            .await
            .map_err(CycleError::from_order)?;

        info!(
            "[Entry] bot {} ({}): opened position, {} at {} for {}",
            bot.id, bot.symbol, fill.executed_qty, fill.avg_price, fill.cumulative_quote_qty
        );

        // Position state comes from the actual fill
        bot.current_balance = fill.executed_qty;
        bot.invested_amount = fill.cumulative_quote_qty;
        bot.avg_entry_price = fill.avg_price;
        bot.highest_price = Some(fill.avg_price);
        bot.trailing_stop_price = if bot.trailing_stop_percent > 0.0 {
            let trail = Decimal::try_from(bot.trailing_stop_percent)
                .map_err(|e| CycleError::Internal(e.into()))?;
            Some(fill.avg_price * (Decimal::ONE - trail / dec!(100)))
        } else {
            None
        };
        bot.entry_sentiment = analysis.sentiment;
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
                "Opened position: {} at {} for {} on {}",
                fill.executed_qty, fill.avg_price, fill.cumulative_quote_qty, buyers
            ),
            buy_signals: Some(analysis.buy_count as i64),
            sell_signals: Some(analysis.sell_count as i64),
            indicators: Some(analysis.summary()),
            created_at: Utc::now(),
        };
        self.db.add_activity(&activity).await?;

        Ok(Some(trade))
    }

    async fn log_no_entry(
        &self,
        bot: &Bot,
        analysis: &crate::indicators::Analysis,
    ) -> Result<(), CycleError> {
        let activity = Activity {
            id: None,
            bot_id: bot.id,
            bot_name: bot.name.clone(),
            symbol: bot.symbol.clone(),
            kind: ActivityKind::Analysis,
            message: format!(
                "No entry: signal {} ({} buy / {} sell)",
                analysis.signal, analysis.buy_count, analysis.sell_count
            ),
            buy_signals: Some(analysis.buy_count as i64),
            sell_signals: Some(analysis.sell_count as i64),
            indicators: Some(analysis.summary()),
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
        bot_fixture, candles_from_closes, falling_closes, indicator_engine, memory_db,
        new_bot_fixture, rising_closes,
    };
    use crate::venue::PaperVenue;

    fn constraints() -> SymbolConstraints {
        SymbolConstraints {
            min_qty: dec!(0.00001),
            step_size: dec!(0.00001),
            min_notional: dec!(10),
        }
    }

    async fn flat_bot(db: &Database) -> Bot {
        let mut bot = db.create_bot(&new_bot_fixture()).await.unwrap();
        bot.status = crate::types::BotStatus::Active;
        // Only RSI votes in these tests
        bot.indicator_settings.macd.enabled = false;
        bot.indicator_settings.bollinger.enabled = false;
        bot.indicator_settings.ema_cross.enabled = false;
        db.update_bot(&bot).await.unwrap();
        bot
    }

    #[test]
    fn cooldown_blocks_entries_inside_the_window() {
        // Scenario: cooldown 5 minutes, sold 2 minutes ago -> 3 remaining
        let mut bot = bot_fixture();
        bot.cooldown_minutes = 5;
        let now = Utc::now();
        bot.last_sell_time = Some(now - Duration::minutes(2));

        let remaining = cooldown_remaining(&bot, now).expect("cooldown should gate");
        assert_eq!(remaining.num_minutes(), 3);
    }

    #[test]
    fn cooldown_expires_after_the_window() {
        let mut bot = bot_fixture();
        bot.cooldown_minutes = 5;
        let now = Utc::now();
        bot.last_sell_time = Some(now - Duration::minutes(6));
        assert!(cooldown_remaining(&bot, now).is_none());
    }

    #[test]
    fn first_entry_is_never_gated() {
        let mut bot = bot_fixture();
        bot.cooldown_minutes = 5;
        bot.last_sell_time = None;
        assert!(cooldown_remaining(&bot, Utc::now()).is_none());

        // Zero cooldown disables the gate entirely
        bot.cooldown_minutes = 0;
        bot.last_sell_time = Some(Utc::now());
        assert!(cooldown_remaining(&bot, Utc::now()).is_none());
    }

    #[tokio::test]
    async fn buy_signal_opens_a_position_from_the_fill() {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());
        venue.set_price("BTC/USDT", dec!(100)).await;
        venue
            .set_candles("BTC/USDT", candles_from_closes(&falling_closes(40, 200.0)))
            .await;
        venue.deposit("USDT", dec!(5000)).await;

        let mut bot = flat_bot(&db).await;
        bot.trailing_stop_percent = 5.0;

        let eval = EntryEvaluator::new(db.clone(), venue, indicator_engine());
        let trade = eval
            .check_entry(&mut bot, dec!(100), &constraints())
            .await
            .unwrap()
            .expect("expected an entry");

        assert_eq!(trade.side, TradeSide::Buy);
        assert_eq!(trade.quantity, dec!(10));
        assert_eq!(trade.total, dec!(1000));
        assert_eq!(trade.pnl, None);

        assert_eq!(bot.current_balance, dec!(10));
        assert_eq!(bot.invested_amount, dec!(1000));
        assert_eq!(bot.avg_entry_price, dec!(100));
        assert_eq!(bot.highest_price, Some(dec!(100)));
        assert_eq!(bot.trailing_stop_price, Some(dec!(95.00)));
        assert_eq!(bot.total_trades, 1);
    }

    #[tokio::test]
    async fn min_signals_gate_respects_agreeing_votes() {
        // Scenario: minSignals 2, RSI and Bollinger vote buy on a crash
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());
        venue.set_price("BTC/USDT", dec!(100)).await;
        // Quiet market, then a plunge through the lower band
        let mut closes = vec![100.0; 35];
        closes.extend([99.0, 98.0, 97.0, 96.0, 70.0]);
        venue
            .set_candles("BTC/USDT", candles_from_closes(&closes))
            .await;
        venue.deposit("USDT", dec!(5000)).await;

        let mut bot = flat_bot(&db).await;
        bot.min_signals = 2;
        bot.indicator_settings.bollinger.enabled = true;

        let eval = EntryEvaluator::new(db.clone(), venue, indicator_engine());
        let trade = eval
            .check_entry(&mut bot, dec!(100), &constraints())
            .await
            .unwrap();

        assert!(trade.is_some(), "RSI + BB agreement should clear minSignals=2");
    }

    #[tokio::test]
    async fn hold_signal_logs_analysis_and_skips() {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());
        venue.set_price("BTC/USDT", dec!(100)).await;
        // Gentle alternation keeps RSI balanced -> hold
        let closes: Vec<f64> = (0..40)
            .map(|i| if i % 2 == 0 { 100.0 } else { 100.1 })
            .collect();
        venue
            .set_candles("BTC/USDT", candles_from_closes(&closes))
            .await;
        venue.deposit("USDT", dec!(5000)).await;

        let mut bot = flat_bot(&db).await;
        let eval = EntryEvaluator::new(db.clone(), venue, indicator_engine());
        let trade = eval
            .check_entry(&mut bot, dec!(100), &constraints())
            .await
            .unwrap();

        assert!(trade.is_none());
        assert_eq!(bot.last_signal.as_deref(), Some("hold"));
        let activities = db.activities_for_bot(bot.id, 5).await.unwrap();
        assert_eq!(activities[0].kind, ActivityKind::Analysis);
    }

    #[tokio::test]
    async fn short_history_is_an_insufficient_data_error() {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());
        venue
            .set_candles("BTC/USDT", candles_from_closes(&rising_closes(10, 100.0)))
            .await;

        let mut bot = flat_bot(&db).await;
        let eval = EntryEvaluator::new(db.clone(), venue, indicator_engine());
        let err = eval
            .check_entry(&mut bot, dec!(100), &constraints())
            .await
            .unwrap_err();

        assert!(matches!(err, CycleError::InsufficientData { have: 10, need: 30 }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn low_balance_shrinks_the_entry() {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());
        venue.set_price("BTC/USDT", dec!(100)).await;
        venue
            .set_candles("BTC/USDT", candles_from_closes(&falling_closes(40, 200.0)))
            .await;
        // Less than the 1000 target, still above min notional
        venue.deposit("USDT", dec!(250)).await;

        let mut bot = flat_bot(&db).await;
        let eval = EntryEvaluator::new(db.clone(), venue, indicator_engine());
        let trade = eval
            .check_entry(&mut bot, dec!(100), &constraints())
            .await
            .unwrap()
            .expect("expected a partial entry");

        assert_eq!(trade.total, dec!(250));
        assert_eq!(bot.invested_amount, dec!(250));
    }

    #[tokio::test]
    async fn dust_balance_is_an_insufficient_balance_error() {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());
        venue.set_price("BTC/USDT", dec!(100)).await;
        venue
            .set_candles("BTC/USDT", candles_from_closes(&falling_closes(40, 200.0)))
            .await;
        venue.deposit("USDT", dec!(5)).await;

        let mut bot = flat_bot(&db).await;
        let eval = EntryEvaluator::new(db.clone(), venue, indicator_engine());
        let err = eval
            .check_entry(&mut bot, dec!(100), &constraints())
            .await
            .unwrap_err();

        assert!(matches!(err, CycleError::InsufficientBalance { .. }));
        assert!(!bot.has_open_position());
    }
}
