//! Cycle orchestrator
//!
//! One invocation per scheduler tick: read the bot, fetch price and symbol
//! constraints, then dispatch to the risk, DCA, and entry evaluators.
//! Recoverable errors are logged to the activity feed and the bot retries
//! next tick; anything else propagates to the scheduler, which escalates
//! the bot to the error status.

use super::dca::DcaEvaluator;
use super::entry::{cooldown_remaining, EntryEvaluator};
use super::error::CycleError;
use super::risk::RiskEvaluator;
use super::types::ExitTrigger;
use crate::db::Database;
use crate::indicators::IndicatorEngine;
use crate::types::{Activity, ActivityKind, Bot, BotStatus, Trade, TradeSide, TradeStatus};
use crate::venue::{quantize, ConnectionManager, SymbolConstraints, Venue};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs one full trading cycle for a bot
pub struct CycleRunner {
    db: Arc<Database>,
    venue: Arc<dyn Venue>,
    connection: Arc<ConnectionManager>,
    risk: RiskEvaluator,
    dca: DcaEvaluator,
    entry: EntryEvaluator,
}

impl CycleRunner {
    pub fn new(
        db: Arc<Database>,
        venue: Arc<dyn Venue>,
        connection: Arc<ConnectionManager>,
        engine: Arc<IndicatorEngine>,
    ) -> Self {
        let risk = RiskEvaluator::new(db.clone(), venue.clone(), engine.clone());
        let dca = DcaEvaluator::new(db.clone(), venue.clone(), engine.clone());
        let entry = EntryEvaluator::new(db.clone(), venue.clone(), engine);
        Self {
            db,
            venue,
            connection,
            risk,
            dca,
            entry,
        }
    }

    /// One tick. Recoverable failures are absorbed here; a returned error
    /// means the bot must be escalated to the error status.
    pub async fn run_cycle(&self, bot_id: i64) -> Result<(), CycleError> {
        let Some(mut bot) = self.db.get_bot(bot_id).await? else {
            return Ok(());
        };
        // Stale timer guard
        if bot.status != BotStatus::Active {
            return Ok(());
        }

        match self.cycle(&mut bot).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_recoverable() => {
                warn!("[Cycle] bot {} ({}): {}", bot.id, bot.symbol, e);
                self.log_error(&bot, &e.to_string()).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn cycle(&self, bot: &mut Bot) -> Result<(), CycleError> {
        if !self.connection.is_connected() {
            return Err(CycleError::NotConnected);
        }

        let price = self.venue.price(&bot.symbol).await?;
        let constraints = self.venue.symbol_constraints(&bot.symbol).await?;

        if bot.has_open_position() {
            if let Some(trigger) = self.risk.check_exit(bot, price).await? {
                self.execute_sell(bot, &trigger, &constraints).await?;
                return Ok(());
            }
            self.dca.check_dca(bot, price, &constraints).await?;
            return Ok(());
        }

        if let Some(remaining) = cooldown_remaining(bot, Utc::now()) {
            let minutes = (remaining.num_seconds() + 59) / 60;
            info!(
                "[Cycle] bot {} ({}): cooldown active, {} min remaining",
                bot.id, bot.symbol, minutes
            );
            let activity = Activity {
                id: None,
                bot_id: bot.id,
                bot_name: bot.name.clone(),
                symbol: bot.symbol.clone(),
                kind: ActivityKind::Analysis,
                message: format!("Cooldown active: {minutes} min remaining before next entry"),
                buy_signals: None,
                sell_signals: None,
                indicators: None,
                created_at: Utc::now(),
            };
            self.db.add_activity(&activity).await?;
            return Ok(());
        }

        self.entry.check_entry(bot, price, &constraints).await?;
        Ok(())
    }

    /// Execute the exit decided by the risk evaluator: sell the full
    /// position, realize P&L against the average entry price, and reset
    /// the position fields.
    async fn execute_sell(
        &self,
        bot: &mut Bot,
        trigger: &ExitTrigger,
        constraints: &SymbolConstraints,
    ) -> Result<(), CycleError> {
        let qty = quantize(bot.current_balance, constraints.step_size);
        if qty <= Decimal::ZERO {
            return Err(CycleError::OrderExecution(format!(
                "position {} below one step size {}",
                bot.current_balance, constraints.step_size
            )));
        }

        let fill = self
            .venue
            .market_order(&bot.symbol, TradeSide::Sell, qty)
            .await
            .map_err(CycleError::from_order)?;

        let entry_price = bot.avg_entry_price;
        let pnl = (fill.avg_price - entry_price) * fill.executed_qty;
        let pnl_percent = if entry_price > Decimal::ZERO {
            ((fill.avg_price - entry_price) / entry_price * dec!(100)).to_f64()
        } else {
            None
        };

        let trade = Trade {
            id: None,
            bot_id: bot.id,
            symbol: bot.symbol.clone(),
            side: TradeSide::Sell,
            order_type: "market".to_string(),
            price: fill.avg_price,
            quantity: fill.executed_qty,
            total: fill.cumulative_quote_qty,
            pnl: Some(pnl),
            pnl_percent,
            signals: trigger.indicators().map(|names| names.join(",")),
            order_id: Some(fill.order_id.clone()),
            status: TradeStatus::Completed,
            created_at: Utc::now(),
        };
        self.db.record_trade(&trade).await?;

        let now = Utc::now();
        bot.total_trades += 1;
        if pnl > Decimal::ZERO {
            bot.winning_trades += 1;
        }
        bot.total_pnl += pnl;
        bot.current_balance = Decimal::ZERO;
        bot.invested_amount = Decimal::ZERO;
        bot.avg_entry_price = Decimal::ZERO;
        bot.highest_price = None;
        bot.trailing_stop_price = None;
        bot.entry_sentiment = None;
        bot.last_sell_time = Some(now);
        bot.last_sell_reason = Some(trigger.action_name().to_string());
        self.db.update_bot(bot).await?;

        info!(
            "[Cycle] bot {} ({}): sold {} at {} (PnL {}) - {}",
            bot.id,
            bot.symbol,
            fill.executed_qty,
            fill.avg_price,
            pnl,
            trigger.reason()
        );

        let activity = Activity {
            id: None,
            bot_id: bot.id,
            bot_name: bot.name.clone(),
            symbol: bot.symbol.clone(),
            kind: ActivityKind::Sell,
            message: format!(
                "Sold {} at {} (PnL {}): {}",
                fill.executed_qty,
                fill.avg_price,
                pnl,
                trigger.reason()
            ),
            buy_signals: None,
            sell_signals: trigger.indicators().map(|names| names.len() as i64),
            indicators: None,
            created_at: now,
        };
        self.db.add_activity(&activity).await?;

        Ok(())
    }

    /// Log a cycle failure to the activity feed
    pub(crate) async fn log_error(&self, bot: &Bot, message: &str) -> Result<(), CycleError> {
        let activity = Activity {
            id: None,
            bot_id: bot.id,
            bot_name: bot.name.clone(),
            symbol: bot.symbol.clone(),
            kind: ActivityKind::Error,
            message: message.to_string(),
            buy_signals: None,
            sell_signals: None,
            indicators: None,
            created_at: Utc::now(),
        };
        self.db.add_activity(&activity).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::{indicator_engine, memory_db, new_bot_fixture};
    use crate::venue::PaperVenue;

    async fn runner(
        db: Arc<Database>,
        venue: Arc<PaperVenue>,
        connected: bool,
    ) -> (CycleRunner, Arc<ConnectionManager>) {
        let connection = Arc::new(ConnectionManager::new(true));
        if connected {
            connection.connect();
        }
        let runner = CycleRunner::new(db, venue, connection.clone(), indicator_engine());
        (runner, connection)
    }

    fn loose_constraints() -> SymbolConstraints {
        SymbolConstraints {
            min_qty: dec!(0.00001),
            step_size: dec!(0.00001),
            min_notional: dec!(0.01),
        }
    }

    async fn holding_bot(db: &Database, qty: Decimal, entry: Decimal) -> Bot {
        let mut bot = db.create_bot(&new_bot_fixture()).await.unwrap();
        bot.status = BotStatus::Active;
        bot.current_balance = qty;
        bot.invested_amount = qty * entry;
        bot.avg_entry_price = entry;
        db.update_bot(&bot).await.unwrap();
        db.set_bot_status(bot.id, BotStatus::Active).await.unwrap();
        bot
    }

    #[tokio::test]
    async fn stop_loss_cycle_realizes_exact_pnl() {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());
        venue.set_price("BTC/USDT", dec!(94)).await;
        venue.set_candles("BTC/USDT", vec![]).await;
        venue.set_constraints("BTC/USDT", loose_constraints()).await;
        venue.deposit("BTC", dec!(0.037)).await;

        let bot = holding_bot(&db, dec!(0.037), dec!(100)).await;
        let (runner, _conn) = runner(db.clone(), venue, true).await;
        runner.run_cycle(bot.id).await.unwrap();

        let trades = db.trades_for_bot(bot.id).await.unwrap();
        let sell = trades.iter().find(|t| t.side == TradeSide::Sell).unwrap();
        // (94 - 100) * 0.037, exactly
        assert_eq!(sell.pnl, Some(dec!(-0.222)));

        let after = db.get_bot(bot.id).await.unwrap().unwrap();
        assert_eq!(after.status, BotStatus::Active);
        assert!(!after.has_open_position());
        assert_eq!(after.invested_amount, Decimal::ZERO);
        assert_eq!(after.avg_entry_price, Decimal::ZERO);
        assert_eq!(after.last_sell_reason.as_deref(), Some("stop_loss"));
        assert!(after.last_sell_time.is_some());
        assert_eq!(after.total_trades, 1);
        assert_eq!(after.winning_trades, 0);
        assert_eq!(after.total_pnl, dec!(-0.222));
    }

    #[tokio::test]
    async fn take_profit_cycle_counts_the_win() {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());
        venue.set_price("ETH/USDT", dec!(150.10)).await;
        venue.set_candles("ETH/USDT", vec![]).await;
        venue.set_constraints("ETH/USDT", loose_constraints()).await;
        venue.deposit("ETH", dec!(2)).await;

        let mut bot = db.create_bot(&new_bot_fixture()).await.unwrap();
        bot.symbol = "ETH/USDT".to_string();
        bot.status = BotStatus::Active;
        bot.current_balance = dec!(2);
        bot.invested_amount = dec!(246.90);
        bot.avg_entry_price = dec!(123.45);
        db.update_bot(&bot).await.unwrap();
        db.set_bot_status(bot.id, BotStatus::Active).await.unwrap();

        let (runner, _conn) = runner(db.clone(), venue, true).await;
        runner.run_cycle(bot.id).await.unwrap();

        let trades = db.trades_for_bot(bot.id).await.unwrap();
        let sell = trades.iter().find(|t| t.side == TradeSide::Sell).unwrap();
        // (150.10 - 123.45) * 2, exactly
        assert_eq!(sell.pnl, Some(dec!(53.30)));

        let after = db.get_bot(bot.id).await.unwrap().unwrap();
        assert_eq!(after.winning_trades, 1);
        assert_eq!(after.last_sell_reason.as_deref(), Some("take_profit"));
    }

    #[tokio::test]
    async fn recoverable_errors_keep_the_bot_active() {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());
        venue.set_price("BTC/USDT", dec!(100)).await;
        // Only a handful of candles: entry evaluation cannot run yet
        venue
            .set_candles(
                "BTC/USDT",
                crate::engine::testutil::candles_from_closes(&[100.0, 101.0]),
            )
            .await;

        let mut bot = db.create_bot(&new_bot_fixture()).await.unwrap();
        bot.status = BotStatus::Active;
        db.update_bot(&bot).await.unwrap();
        db.set_bot_status(bot.id, BotStatus::Active).await.unwrap();

        let (runner, _conn) = runner(db.clone(), venue, true).await;
        runner.run_cycle(bot.id).await.unwrap();

        let after = db.get_bot(bot.id).await.unwrap().unwrap();
        assert_eq!(after.status, BotStatus::Active);
        let activities = db.activities_for_bot(bot.id, 5).await.unwrap();
        assert_eq!(activities[0].kind, ActivityKind::Error);
        assert!(activities[0].message.contains("insufficient candle data"));
    }

    #[tokio::test]
    async fn lost_connection_is_fatal() {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());

        let mut bot = db.create_bot(&new_bot_fixture()).await.unwrap();
        bot.status = BotStatus::Active;
        db.update_bot(&bot).await.unwrap();
        db.set_bot_status(bot.id, BotStatus::Active).await.unwrap();

        let (runner, _conn) = runner(db.clone(), venue, false).await;
        let err = runner.run_cycle(bot.id).await.unwrap_err();
        assert!(matches!(err, CycleError::NotConnected));
    }

    #[tokio::test]
    async fn inactive_bot_is_a_no_op() {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());

        let bot = db.create_bot(&new_bot_fixture()).await.unwrap();
        // Bot stays stopped; no price or candles are seeded, so any real
        // cycle work would error out
        let (runner, _conn) = runner(db.clone(), venue, true).await;
        runner.run_cycle(bot.id).await.unwrap();
        assert!(db.activities_for_bot(bot.id, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cooldown_blocks_the_entry_path() {
        let db = Arc::new(memory_db().await);
        let venue = Arc::new(PaperVenue::new());
        venue.set_price("BTC/USDT", dec!(100)).await;
        venue.set_candles("BTC/USDT", vec![]).await;

        let mut bot = db.create_bot(&new_bot_fixture()).await.unwrap();
        bot.status = BotStatus::Active;
        bot.cooldown_minutes = 5;
        bot.last_sell_time = Some(Utc::now() - chrono::Duration::minutes(2));
        db.update_bot(&bot).await.unwrap();
        db.set_bot_status(bot.id, BotStatus::Active).await.unwrap();

        let (runner, _conn) = runner(db.clone(), venue, true).await;
        runner.run_cycle(bot.id).await.unwrap();

        let activities = db.activities_for_bot(bot.id, 5).await.unwrap();
        assert_eq!(activities.len(), 1);
        assert!(activities[0].message.contains("Cooldown active: 3 min"));
    }
}
