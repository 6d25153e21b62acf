//! SQLite database for bots, the trade ledger, and the activity feed

use crate::indicators::IndicatorSettings;
use crate::types::{
    Activity, ActivityKind, Bot, BotStats, BotStatus, Interval, NewBot, Trade, TradeSide,
    TradeStatus,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

/// Oldest activity rows beyond this cap are pruned after each insert
pub const ACTIVITY_CAP: i64 = 100;

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.initialize().await?;

        Ok(db)
    }

    /// Run additive migrations for older database files
    async fn run_migrations(&self) -> Result<()> {
        let table_info: Vec<(i64, String, String, i64, Option<String>, i64)> =
            sqlx::query_as("PRAGMA table_info(bots)")
                .fetch_all(&self.pool)
                .await
                .unwrap_or_default();

        let has_entry_sentiment = table_info
            .iter()
            .any(|(_, name, _, _, _, _)| name == "entry_sentiment");
        if !table_info.is_empty() && !has_entry_sentiment {
            info!("Migrating bots table: adding entry_sentiment column");
            sqlx::query("ALTER TABLE bots ADD COLUMN entry_sentiment REAL")
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    /// Initialize database schema
    async fn initialize(&self) -> Result<()> {
        self.run_migrations().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                symbol TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'stopped',
                investment TEXT NOT NULL,
                invested_amount TEXT NOT NULL DEFAULT '0',
                current_balance TEXT NOT NULL DEFAULT '0',
                avg_entry_price TEXT NOT NULL DEFAULT '0',
                stop_loss_percent REAL NOT NULL DEFAULT 0,
                take_profit_percent REAL NOT NULL DEFAULT 0,
                trailing_stop_percent REAL NOT NULL DEFAULT 0,
                cooldown_minutes INTEGER NOT NULL DEFAULT 0,
                highest_price TEXT,
                trailing_stop_price TEXT,
                last_sell_time TEXT,
                last_sell_reason TEXT,
                entry_sentiment REAL,
                indicator_settings TEXT NOT NULL,
                min_signals INTEGER NOT NULL DEFAULT 1,
                interval TEXT NOT NULL,
                total_trades INTEGER NOT NULL DEFAULT 0,
                winning_trades INTEGER NOT NULL DEFAULT 0,
                total_pnl TEXT NOT NULL DEFAULT '0',
                last_signal TEXT,
                last_signal_time TEXT,
                last_indicator_values TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                bot_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                order_type TEXT NOT NULL DEFAULT 'market',
                price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                total TEXT NOT NULL,
                pnl TEXT,
                pnl_percent REAL,
                signals TEXT,
                order_id TEXT,
                status TEXT NOT NULL DEFAULT 'completed',
                created_at TEXT NOT NULL,
                FOREIGN KEY (bot_id) REFERENCES bots(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_bot ON trades(bot_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_bot_created ON trades(bot_id, created_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS activities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                bot_id INTEGER NOT NULL,
                bot_name TEXT NOT NULL,
                symbol TEXT NOT NULL,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                buy_signals INTEGER,
                sell_signals INTEGER,
                indicators TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_activities_bot ON activities(bot_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== BOTS ====================

    /// Create a new bot in the stopped state
    pub async fn create_bot(&self, new_bot: &NewBot) -> Result<Bot> {
        let now = Utc::now();
        let settings_json = serde_json::to_string(&new_bot.indicator_settings)
            .context("Failed to serialize indicator settings")?;

        let result = sqlx::query(
            r#"
            INSERT INTO bots (
                name, symbol, status, investment,
                stop_loss_percent, take_profit_percent, trailing_stop_percent,
                cooldown_minutes, indicator_settings, min_signals, interval,
                created_at
            )
            VALUES (?, ?, 'stopped', ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new_bot.name)
        .bind(&new_bot.symbol)
        .bind(new_bot.investment.to_string())
        .bind(new_bot.stop_loss_percent)
        .bind(new_bot.take_profit_percent)
        .bind(new_bot.trailing_stop_percent)
        .bind(new_bot.cooldown_minutes)
        .bind(settings_json)
        .bind(new_bot.min_signals as i64)
        .bind(new_bot.interval.as_str())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_bot(id)
            .await?
            .context("Bot disappeared right after insert")
    }

    /// Get a bot by id
    pub async fn get_bot(&self, id: i64) -> Result<Option<Bot>> {
        let row = sqlx::query("SELECT * FROM bots WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_bot(&r)?)),
            None => Ok(None),
        }
    }

    /// All bots, oldest first
    pub async fn all_bots(&self) -> Result<Vec<Bot>> {
        let rows = sqlx::query("SELECT * FROM bots ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_bot).collect()
    }

    /// Bots currently persisted with the given status
    pub async fn bots_with_status(&self, status: BotStatus) -> Result<Vec<Bot>> {
        let rows = sqlx::query("SELECT * FROM bots WHERE status = ? ORDER BY id")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_bot).collect()
    }

    /// Persist a bot's configuration, capital, and telemetry fields.
    ///
    /// The lifecycle status is deliberately excluded: it flows through
    /// [`Database::set_bot_status`] only, so an in-flight cycle persisting
    /// its result cannot overwrite a concurrent pause or stop.
    pub async fn update_bot(&self, bot: &Bot) -> Result<()> {
        let settings_json = serde_json::to_string(&bot.indicator_settings)
            .context("Failed to serialize indicator settings")?;

        sqlx::query(
            r#"
            UPDATE bots SET
                name = ?, symbol = ?, investment = ?,
                invested_amount = ?, current_balance = ?, avg_entry_price = ?,
                stop_loss_percent = ?, take_profit_percent = ?, trailing_stop_percent = ?,
                cooldown_minutes = ?, highest_price = ?, trailing_stop_price = ?,
                last_sell_time = ?, last_sell_reason = ?, entry_sentiment = ?,
                indicator_settings = ?, min_signals = ?, interval = ?,
                total_trades = ?, winning_trades = ?, total_pnl = ?,
                last_signal = ?, last_signal_time = ?, last_indicator_values = ?
            WHERE id = ?
            "#,
        )
        .bind(&bot.name)
        .bind(&bot.symbol)
        .bind(bot.investment.to_string())
        .bind(bot.invested_amount.to_string())
        .bind(bot.current_balance.to_string())
        .bind(bot.avg_entry_price.to_string())
        .bind(bot.stop_loss_percent)
        .bind(bot.take_profit_percent)
        .bind(bot.trailing_stop_percent)
        .bind(bot.cooldown_minutes)
        .bind(bot.highest_price.map(|v| v.to_string()))
        .bind(bot.trailing_stop_price.map(|v| v.to_string()))
        .bind(bot.last_sell_time.map(|t| t.to_rfc3339()))
        .bind(bot.last_sell_reason.as_deref())
        .bind(bot.entry_sentiment)
        .bind(settings_json)
        .bind(bot.min_signals as i64)
        .bind(bot.interval.as_str())
        .bind(bot.total_trades)
        .bind(bot.winning_trades)
        .bind(bot.total_pnl.to_string())
        .bind(bot.last_signal.as_deref())
        .bind(bot.last_signal_time.map(|t| t.to_rfc3339()))
        .bind(bot.last_indicator_values.as_deref())
        .bind(bot.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Update only a bot's lifecycle status
    pub async fn set_bot_status(&self, id: i64, status: BotStatus) -> Result<()> {
        sqlx::query("UPDATE bots SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a bot together with its history
    pub async fn delete_bot(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM trades WHERE bot_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM activities WHERE bot_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM bots WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== TRADES ====================

    /// Append a trade to the ledger
    pub async fn record_trade(&self, trade: &Trade) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades (
                bot_id, symbol, side, order_type, price, quantity, total,
                pnl, pnl_percent, signals, order_id, status, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(trade.bot_id)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(&trade.order_type)
        .bind(trade.price.to_string())
        .bind(trade.quantity.to_string())
        .bind(trade.total.to_string())
        .bind(trade.pnl.map(|v| v.to_string()))
        .bind(trade.pnl_percent)
        .bind(trade.signals.as_deref())
        .bind(trade.order_id.as_deref())
        .bind(trade.status.as_str())
        .bind(trade.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Full ledger for one bot, oldest first
    pub async fn trades_for_bot(&self, bot_id: i64) -> Result<Vec<Trade>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE bot_id = ? ORDER BY created_at, id")
            .bind(bot_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_trade).collect()
    }

    /// Full ledger across all bots, oldest first
    pub async fn all_trades(&self) -> Result<Vec<Trade>> {
        let rows = sqlx::query("SELECT * FROM trades ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_trade).collect()
    }

    // ==================== ACTIVITIES ====================

    /// Append an activity entry, then prune the feed to [`ACTIVITY_CAP`] rows
    pub async fn add_activity(&self, activity: &Activity) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO activities (
                bot_id, bot_name, symbol, kind, message,
                buy_signals, sell_signals, indicators, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(activity.bot_id)
        .bind(&activity.bot_name)
        .bind(&activity.symbol)
        .bind(activity.kind.as_str())
        .bind(&activity.message)
        .bind(activity.buy_signals)
        .bind(activity.sell_signals)
        .bind(activity.indicators.as_deref())
        .bind(activity.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "DELETE FROM activities WHERE id NOT IN (SELECT id FROM activities ORDER BY id DESC LIMIT ?)",
        )
        .bind(ACTIVITY_CAP)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Newest activity entries first
    pub async fn recent_activities(&self, limit: i64) -> Result<Vec<Activity>> {
        let rows = sqlx::query("SELECT * FROM activities ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_activity).collect()
    }

    /// Newest activity entries for one bot
    pub async fn activities_for_bot(&self, bot_id: i64, limit: i64) -> Result<Vec<Activity>> {
        let rows = sqlx::query("SELECT * FROM activities WHERE bot_id = ? ORDER BY id DESC LIMIT ?")
            .bind(bot_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_activity).collect()
    }

    // ==================== HISTORY / STATS ====================

    /// Bulk-delete a bot's trades and activities and reset its telemetry
    pub async fn clear_history(&self, bot_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM trades WHERE bot_id = ?")
            .bind(bot_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM activities WHERE bot_id = ?")
            .bind(bot_id)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"
            UPDATE bots SET
                total_trades = 0, winning_trades = 0, total_pnl = '0',
                last_signal = NULL, last_signal_time = NULL, last_indicator_values = NULL
            WHERE id = ?
            "#,
        )
        .bind(bot_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Ledger-derived statistics for one bot
    pub async fn bot_stats(&self, bot_id: i64) -> Result<BotStats> {
        let trades = self.trades_for_bot(bot_id).await?;

        let mut stats = BotStats::default();
        for trade in &trades {
            stats.total_trades += 1;
            match trade.side {
                TradeSide::Buy => stats.buy_trades += 1,
                TradeSide::Sell => {
                    stats.sell_trades += 1;
                    if let Some(pnl) = trade.pnl {
                        stats.total_pnl += pnl;
                        if pnl > Decimal::ZERO {
                            stats.winning_trades += 1;
                        } else {
                            stats.losing_trades += 1;
                        }
                    }
                }
            }
        }

        Ok(stats)
    }
}

fn parse_decimal(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let raw: String = row.get(column);
    Decimal::from_str(&raw).with_context(|| format!("Bad decimal in column {column}: {raw}"))
}

fn parse_opt_decimal(row: &SqliteRow, column: &str) -> Option<Decimal> {
    let raw: Option<String> = row.get(column);
    raw.and_then(|s| Decimal::from_str(&s).ok())
}

fn parse_datetime(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.get(column);
    Ok(DateTime::parse_from_rfc3339(&raw)
        .with_context(|| format!("Bad timestamp in column {column}: {raw}"))?
        .with_timezone(&Utc))
}

fn parse_opt_datetime(row: &SqliteRow, column: &str) -> Option<DateTime<Utc>> {
    let raw: Option<String> = row.get(column);
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn row_to_bot(row: &SqliteRow) -> Result<Bot> {
    let status: BotStatus = row.get::<String, _>("status").parse()?;
    let interval: Interval = row.get::<String, _>("interval").parse()?;
    let settings_json: String = row.get("indicator_settings");
    let indicator_settings: IndicatorSettings = serde_json::from_str(&settings_json)
        .context("Failed to deserialize indicator settings")?;

    Ok(Bot {
        id: row.get("id"),
        name: row.get("name"),
        symbol: row.get("symbol"),
        status,
        investment: parse_decimal(row, "investment")?,
        invested_amount: parse_decimal(row, "invested_amount")?,
        current_balance: parse_decimal(row, "current_balance")?,
        avg_entry_price: parse_decimal(row, "avg_entry_price")?,
        stop_loss_percent: row.get("stop_loss_percent"),
        take_profit_percent: row.get("take_profit_percent"),
        trailing_stop_percent: row.get("trailing_stop_percent"),
        cooldown_minutes: row.get("cooldown_minutes"),
        highest_price: parse_opt_decimal(row, "highest_price"),
        trailing_stop_price: parse_opt_decimal(row, "trailing_stop_price"),
        last_sell_time: parse_opt_datetime(row, "last_sell_time"),
        last_sell_reason: row.get("last_sell_reason"),
        entry_sentiment: row.get("entry_sentiment"),
        indicator_settings,
        min_signals: row.get::<i64, _>("min_signals").max(0) as usize,
        interval,
        total_trades: row.get("total_trades"),
        winning_trades: row.get("winning_trades"),
        total_pnl: parse_decimal(row, "total_pnl")?,
        last_signal: row.get("last_signal"),
        last_signal_time: parse_opt_datetime(row, "last_signal_time"),
        last_indicator_values: row.get("last_indicator_values"),
        created_at: parse_datetime(row, "created_at")?,
    })
}

fn row_to_trade(row: &SqliteRow) -> Result<Trade> {
    let side: TradeSide = row.get::<String, _>("side").parse()?;
    let status: TradeStatus = row.get::<String, _>("status").parse()?;

    Ok(Trade {
        id: Some(row.get("id")),
        bot_id: row.get("bot_id"),
        symbol: row.get("symbol"),
        side,
        order_type: row.get("order_type"),
        price: parse_decimal(row, "price")?,
        quantity: parse_decimal(row, "quantity")?,
        total: parse_decimal(row, "total")?,
        pnl: parse_opt_decimal(row, "pnl"),
        pnl_percent: row.get("pnl_percent"),
        signals: row.get("signals"),
        order_id: row.get("order_id"),
        status,
        created_at: parse_datetime(row, "created_at")?,
    })
}

fn row_to_activity(row: &SqliteRow) -> Result<Activity> {
    let kind: ActivityKind = row.get::<String, _>("kind").parse()?;

    Ok(Activity {
        id: Some(row.get("id")),
        bot_id: row.get("bot_id"),
        bot_name: row.get("bot_name"),
        symbol: row.get("symbol"),
        kind,
        message: row.get("message"),
        buy_signals: row.get("buy_signals"),
        sell_signals: row.get("sell_signals"),
        indicators: row.get("indicators"),
        created_at: parse_datetime(row, "created_at")?,
    })
}
