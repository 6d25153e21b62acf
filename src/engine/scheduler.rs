//! Bot scheduler
//!
//! Owns one cancelable timer task per active bot. Timers live only in
//! memory; the persisted `active` status is the durable source of truth,
//! and `resume_active_bots` rebuilds the registry after a process restart
//! or a newly established venue connection.

use super::cycle::CycleRunner;
use crate::db::Database;
use crate::types::{Activity, ActivityKind, Bot, BotStatus};
use crate::venue::ConnectionManager;
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Registered timer for one bot
struct TimerHandle {
    handle: JoinHandle<()>,
    /// Cancellation signal; the timer task only listens between cycles,
    /// so a cycle already in flight always completes and persists
    stop: Arc<Notify>,
}

impl TimerHandle {
    fn cancel(&self) {
        self.stop.notify_one();
    }

    fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Per-bot timer registry
pub struct BotScheduler {
    db: Arc<Database>,
    connection: Arc<ConnectionManager>,
    runner: Arc<CycleRunner>,
    timers: RwLock<HashMap<i64, TimerHandle>>,
}

impl BotScheduler {
    pub fn new(
        db: Arc<Database>,
        connection: Arc<ConnectionManager>,
        runner: Arc<CycleRunner>,
    ) -> Self {
        Self {
            db,
            connection,
            runner,
            timers: RwLock::new(HashMap::new()),
        }
    }

    /// Start (or restart) a bot: mark it active, replace any existing
    /// timer for the same id, and schedule the first cycle immediately.
    /// Fails fast when the venue connection is not live.
    pub async fn start_bot(&self, bot_id: i64) -> Result<Bot> {
        anyhow::ensure!(
            self.connection.is_connected(),
            "venue connection is not live"
        );

        let mut bot = self
            .db
            .get_bot(bot_id)
            .await?
            .with_context(|| format!("bot {bot_id} not found"))?;

        bot.status = BotStatus::Active;
        self.db.set_bot_status(bot_id, BotStatus::Active).await?;
        self.log_lifecycle(&bot, ActivityKind::Start, "Bot started")
            .await?;

        let stop = Arc::new(Notify::new());
        let handle = tokio::spawn(run_bot_loop(
            self.db.clone(),
            self.runner.clone(),
            bot_id,
            bot.interval.period(),
            stop.clone(),
        ));

        // Idempotent restart: at most one timer per bot id
        let timer = TimerHandle { handle, stop };
        if let Some(old) = self.timers.write().await.insert(bot_id, timer) {
            debug!("[Scheduler] bot {bot_id}: replacing existing timer");
            old.cancel();
        }

        info!(
            "[Scheduler] bot {} ({}) started on a {} interval",
            bot.id,
            bot.symbol,
            bot.interval.as_str()
        );
        Ok(bot)
    }

    /// Pause a bot: cancel its timer, keep the last-signal snapshot
    pub async fn pause_bot(&self, bot_id: i64) -> Result<Bot> {
        let mut bot = self
            .db
            .get_bot(bot_id)
            .await?
            .with_context(|| format!("bot {bot_id} not found"))?;

        self.cancel_timer(bot_id).await;
        bot.status = BotStatus::Paused;
        self.db.set_bot_status(bot_id, BotStatus::Paused).await?;
        self.log_lifecycle(&bot, ActivityKind::Stop, "Bot paused")
            .await?;

        info!("[Scheduler] bot {} ({}) paused", bot.id, bot.symbol);
        Ok(bot)
    }

    /// Stop a bot: cancel its timer and clear the last-signal snapshot
    pub async fn stop_bot(&self, bot_id: i64) -> Result<Bot> {
        let mut bot = self
            .db
            .get_bot(bot_id)
            .await?
            .with_context(|| format!("bot {bot_id} not found"))?;

        self.cancel_timer(bot_id).await;
        bot.status = BotStatus::Stopped;
        bot.last_signal = None;
        bot.last_signal_time = None;
        self.db.update_bot(&bot).await?;
        self.db.set_bot_status(bot_id, BotStatus::Stopped).await?;
        self.log_lifecycle(&bot, ActivityKind::Stop, "Bot stopped")
            .await?;

        info!("[Scheduler] bot {} ({}) stopped", bot.id, bot.symbol);
        Ok(bot)
    }

    /// Cancel a bot's timer if one is registered. A cycle already in
    /// flight completes and persists its result; it is not interrupted.
    pub async fn cancel_timer(&self, bot_id: i64) -> bool {
        match self.timers.write().await.remove(&bot_id) {
            Some(timer) => {
                timer.cancel();
                true
            }
            None => false,
        }
    }

    /// Restart every bot persisted as active. Called on process startup
    /// and whenever a venue connection is newly established.
    pub async fn resume_active_bots(&self) -> Result<usize> {
        let bots = self.db.bots_with_status(BotStatus::Active).await?;
        let mut resumed = 0;
        for bot in bots {
            match self.start_bot(bot.id).await {
                Ok(_) => resumed += 1,
                Err(e) => warn!("[Scheduler] failed to resume bot {}: {e}", bot.id),
            }
        }
        if resumed > 0 {
            info!("[Scheduler] resumed {resumed} active bot(s)");
        }
        Ok(resumed)
    }

    /// Number of live timers
    pub async fn timer_count(&self) -> usize {
        self.timers
            .read()
            .await
            .values()
            .filter(|t| t.is_live())
            .count()
    }

    /// Whether a live timer is registered for this bot
    pub async fn is_scheduled(&self, bot_id: i64) -> bool {
        self.timers
            .read()
            .await
            .get(&bot_id)
            .map(|t| t.is_live())
            .unwrap_or(false)
    }

    async fn log_lifecycle(&self, bot: &Bot, kind: ActivityKind, message: &str) -> Result<()> {
        let activity = Activity {
            id: None,
            bot_id: bot.id,
            bot_name: bot.name.clone(),
            symbol: bot.symbol.clone(),
            kind,
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

/// Timer task for one bot. The first tick fires immediately so a freshly
/// started bot acts without waiting a full interval; awaiting the cycle
/// inside the loop serializes cycles per bot.
async fn run_bot_loop(
    db: Arc<Database>,
    runner: Arc<CycleRunner>,
    bot_id: i64,
    period: Duration,
    stop: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.notified() => {
                debug!("[Scheduler] bot {bot_id}: timer canceled");
                break;
            }
        }

        let bot = match db.get_bot(bot_id).await {
            Ok(Some(bot)) => bot,
            Ok(None) => {
                debug!("[Scheduler] bot {bot_id} deleted, timer exiting");
                break;
            }
            Err(e) => {
                error!("[Scheduler] bot {bot_id}: failed to load state: {e}");
                break;
            }
        };
        if bot.status != BotStatus::Active {
            debug!("[Scheduler] bot {bot_id} no longer active, timer exiting");
            break;
        }

        if let Err(e) = runner.run_cycle(bot_id).await {
            error!("[Scheduler] bot {bot_id} ({}): cycle failed: {e}", bot.symbol);
            if let Err(log_err) = runner.log_error(&bot, &format!("Cycle failed: {e}")).await {
                error!("[Scheduler] bot {bot_id}: failed to log cycle error: {log_err}");
            }
            if let Err(status_err) = db.set_bot_status(bot_id, BotStatus::Error).await {
                error!("[Scheduler] bot {bot_id}: failed to mark error status: {status_err}");
            }
            break;
        }
    }
}
