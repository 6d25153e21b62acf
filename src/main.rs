//! Spot Trading Bot CLI
//!
//! Operator interface for the indicator-driven spot trading bot.

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use rust_decimal::Decimal;
use spotbot::{
    BotService, BotStatus, Candle, Config, ConnectionManager, Database, FearGreedClient,
    IndicatorSettings, Interval, NewBot, PaperVenue,
};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "spotbot")]
#[command(about = "Indicator-driven cryptocurrency spot trading bot")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler, resuming every bot persisted as active
    Run,

    /// Create a new bot (stopped until started)
    Create {
        /// Bot name
        #[arg(long)]
        name: String,

        /// Trading pair as BASE/QUOTE, e.g. BTC/USDT
        #[arg(long)]
        symbol: String,

        /// Target capital to deploy (quote asset)
        #[arg(long)]
        investment: String,

        /// Polling interval: 1m 5m 15m 30m 1h 4h 1d
        #[arg(long, default_value = "1h")]
        interval: String,

        /// Stop-loss percent (0 disables)
        #[arg(long, default_value = "5")]
        stop_loss: f64,

        /// Take-profit percent (0 disables)
        #[arg(long, default_value = "10")]
        take_profit: f64,

        /// Trailing-stop percent (0 disables)
        #[arg(long, default_value = "0")]
        trailing_stop: f64,

        /// Cooldown minutes after a sell (0 disables)
        #[arg(long, default_value = "0")]
        cooldown: i64,

        /// Minimum agreeing indicator votes required to act
        #[arg(long, default_value = "1")]
        min_signals: usize,

        /// Enable the sentiment-index rule
        #[arg(long)]
        sentiment: bool,
    },

    /// Mark a bot active; cycles run under `spotbot run`
    Start {
        /// Bot id
        id: i64,
    },

    /// Pause a bot (keeps its last-signal snapshot)
    Pause {
        /// Bot id
        id: i64,
    },

    /// Stop a bot and clear its last-signal snapshot
    Stop {
        /// Bot id
        id: i64,
    },

    /// Delete a bot together with its history
    Delete {
        /// Bot id
        id: i64,
    },

    /// List all bots with their statistics
    Bots,

    /// Show one bot's details and recent trades
    Stats {
        /// Bot id
        id: i64,
    },

    /// Show the recent activity feed
    Activity {
        /// Maximum entries to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Run a one-off indicator analysis for a symbol (demo market data)
    Analyze {
        /// Trading pair as BASE/QUOTE
        symbol: String,

        /// Candle interval
        #[arg(long, default_value = "1h")]
        interval: String,
    },

    /// Delete a bot's trades and activities and reset its telemetry
    ClearHistory {
        /// Bot id
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    // Load configuration
    let config = Config::from_env()?;

    match cli.command {
        Commands::Run => run_scheduler(&config).await?,
        Commands::Create {
            name,
            symbol,
            investment,
            interval,
            stop_loss,
            take_profit,
            trailing_stop,
            cooldown,
            min_signals,
            sentiment,
        } => {
            let mut settings = IndicatorSettings::default();
            settings.sentiment.enabled = sentiment;
            let new_bot = NewBot {
                name,
                symbol,
                investment: Decimal::from_str(&investment)?,
                stop_loss_percent: stop_loss,
                take_profit_percent: take_profit,
                trailing_stop_percent: trailing_stop,
                cooldown_minutes: cooldown,
                min_signals,
                interval: interval.parse()?,
                indicator_settings: settings,
            };
            let service = build_service(&config).await?;
            let bot = service.create_bot(new_bot).await?;
            println!(
                "Created bot {} \"{}\" on {} ({} interval)",
                bot.id, bot.name, bot.symbol, bot.interval
            );
        }
        Commands::Start { id } => {
            let (service, db, venue) = build_stack(&config).await?;
            // Seed market data first so the immediate first cycle has a
            // price to work with
            if let Some(bot) = db.get_bot(id).await? {
                seed_demo_market(&venue, &bot.symbol).await;
                venue.deposit(bot.quote_asset(), config.demo_funds).await;
            }
            service.connection().connect();
            let bot = service.start_bot(id).await?;
            println!(
                "Bot {} \"{}\" marked {}; cycles run under `spotbot run`",
                bot.id,
                bot.name,
                status_label(bot.status)
            );
        }
        Commands::Pause { id } => {
            let service = build_service(&config).await?;
            let bot = service.pause_bot(id).await?;
            println!("Bot {} \"{}\" paused", bot.id, bot.name);
        }
        Commands::Stop { id } => {
            let service = build_service(&config).await?;
            let bot = service.stop_bot(id).await?;
            println!("Bot {} \"{}\" stopped", bot.id, bot.name);
        }
        Commands::Delete { id } => {
            let service = build_service(&config).await?;
            service.delete_bot(id).await?;
            println!("Bot {id} deleted");
        }
        Commands::Bots => list_bots(&config).await?,
        Commands::Stats { id } => show_stats(&config, id).await?,
        Commands::Activity { limit } => show_activity(&config, limit).await?,
        Commands::Analyze { symbol, interval } => {
            analyze_symbol(&config, &symbol, interval.parse()?).await?
        }
        Commands::ClearHistory { id } => {
            let service = build_service(&config).await?;
            service.clear_history(id).await?;
            println!("History cleared for bot {id}");
        }
    }

    Ok(())
}

/// Wire the service against the demo venue
async fn build_stack(config: &Config) -> Result<(BotService, Arc<Database>, Arc<PaperVenue>)> {
    let db = Arc::new(Database::new(&config.database_path).await?);
    let venue = Arc::new(PaperVenue::new());
    let connection = Arc::new(ConnectionManager::new(config.demo_mode));
    let sentiment = Arc::new(FearGreedClient::new(&config.sentiment_endpoint)?);
    let service = BotService::new(db.clone(), venue.clone(), connection, sentiment);
    Ok((service, db, venue))
}

async fn build_service(config: &Config) -> Result<BotService> {
    let (service, _db, _venue) = build_stack(config).await?;
    Ok(service)
}

async fn run_scheduler(config: &Config) -> Result<()> {
    let db = Arc::new(Database::new(&config.database_path).await?);
    let venue = Arc::new(PaperVenue::new());
    let connection = Arc::new(ConnectionManager::new(config.demo_mode));
    let sentiment = Arc::new(FearGreedClient::new(&config.sentiment_endpoint)?);
    let service = BotService::new(db.clone(), venue.clone(), connection.clone(), sentiment);

    println!();
    println!("{}", "=".repeat(60));
    println!("  SPOT TRADING BOT");
    println!(
        "  Mode: {} | Database: {}",
        if config.demo_mode { "DEMO (simulated venue)" } else { "LIVE" },
        config.database_path
    );
    println!("{}", "=".repeat(60));
    println!();

    // Seed the demo market for every configured symbol and quote asset
    let bots = db.all_bots().await?;
    let symbols: BTreeSet<String> = bots.iter().map(|b| b.symbol.clone()).collect();
    let quotes: BTreeSet<String> = bots
        .iter()
        .map(|b| b.quote_asset().to_string())
        .filter(|q| !q.is_empty())
        .collect();
    for symbol in &symbols {
        seed_demo_market(&venue, symbol).await;
    }
    for quote in &quotes {
        venue.deposit(quote, config.demo_funds).await;
    }

    connection.connect();
    let resumed = service.resume_active_bots().await?;
    info!("Scheduler running, {resumed} bot(s) resumed (Ctrl+C to stop)");

    // Keep the simulated market moving while the scheduler runs
    let market_venue = venue.clone();
    let market_symbols: Vec<String> = symbols.into_iter().collect();
    tokio::spawn(async move {
        drive_demo_market(market_venue, market_symbols).await;
    });

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down");
    Ok(())
}

/// Deterministic oscillating close series for the demo venue
fn demo_closes(len: usize, phase: usize) -> Vec<f64> {
    (0..len)
        .map(|i| {
            let t = (phase + i) as f64;
            100.0 + 6.0 * (t * 0.35).sin() + 2.0 * (t * 0.08).cos()
        })
        .collect()
}

fn closes_to_candles(closes: &[f64]) -> Vec<Candle> {
    let now = chrono::Utc::now();
    closes
        .iter()
        .enumerate()
        .map(|(i, close)| Candle {
            open_time: now - chrono::Duration::minutes((closes.len() - i) as i64),
            open: *close,
            high: close + 0.5,
            low: close - 0.5,
            close: *close,
            volume: 1.0,
        })
        .collect()
}

async fn seed_demo_market(venue: &PaperVenue, symbol: &str) {
    let closes = demo_closes(120, 0);
    let last = *closes.last().unwrap_or(&100.0);
    venue.set_candles(symbol, closes_to_candles(&closes)).await;
    if let Ok(price) = Decimal::try_from(last) {
        venue.set_price(symbol, price).await;
    }
}

/// Advance the simulated market one step at a time
async fn drive_demo_market(venue: Arc<PaperVenue>, symbols: Vec<String>) {
    let mut phase = 0usize;
    loop {
        tokio::time::sleep(Duration::from_secs(20)).await;
        phase += 1;
        for symbol in &symbols {
            let closes = demo_closes(120, phase);
            let last = *closes.last().unwrap_or(&100.0);
            venue.set_candles(symbol, closes_to_candles(&closes)).await;
            if let Ok(price) = Decimal::try_from(last) {
                venue.set_price(symbol, price).await;
            }
        }
    }
}

fn status_label(status: BotStatus) -> colored::ColoredString {
    match status {
        BotStatus::Active => "active".green(),
        BotStatus::Paused => "paused".yellow(),
        BotStatus::Stopped => "stopped".normal(),
        BotStatus::Error => "error".red(),
    }
}

async fn list_bots(config: &Config) -> Result<()> {
    let service = build_service(config).await?;
    let bots = service.get_all_bots_with_stats().await?;

    if bots.is_empty() {
        println!("No bots configured. Create one with `spotbot create`.");
        return Ok(());
    }

    println!("\n{:<4} {:<16} {:<10} {:<8} {:>10} {:>8} {:>10}", "ID", "NAME", "SYMBOL", "STATUS", "INVESTED", "TRADES", "PNL");
    println!("{}", "-".repeat(72));
    for entry in bots {
        let bot = &entry.bot;
        println!(
            "{:<4} {:<16} {:<10} {:<8} {:>10} {:>8} {:>10}",
            bot.id,
            bot.name,
            bot.symbol,
            status_label(bot.status),
            bot.invested_amount,
            entry.stats.total_trades,
            entry.stats.total_pnl,
        );
    }
    println!();
    Ok(())
}

async fn show_stats(config: &Config, id: i64) -> Result<()> {
    let service = build_service(config).await?;
    let Some(entry) = service.get_bot_with_stats(id).await? else {
        println!("Bot {id} not found");
        return Ok(());
    };
    let bot = &entry.bot;

    println!("\nBot {} \"{}\" ({})", bot.id, bot.name, bot.symbol);
    println!("  Status:      {}", status_label(bot.status));
    println!("  Interval:    {}", bot.interval);
    println!("  Investment:  {} ({} deployed)", bot.investment, bot.invested_amount);
    if bot.has_open_position() {
        println!("  Position:    {} at avg {}", bot.current_balance, bot.avg_entry_price);
    } else {
        println!("  Position:    flat");
    }
    println!(
        "  Risk:        stop {:.1}% / target {:.1}% / trail {:.1}% / cooldown {}m",
        bot.stop_loss_percent, bot.take_profit_percent, bot.trailing_stop_percent, bot.cooldown_minutes
    );
    println!(
        "  Trades:      {} total, {} wins ({:.1}% win rate), PnL {}",
        entry.stats.total_trades,
        entry.stats.winning_trades,
        entry.stats.win_rate(),
        entry.stats.total_pnl
    );
    if let Some(signal) = &bot.last_signal {
        println!("  Last signal: {signal}");
    }
    if let Some(values) = &bot.last_indicator_values {
        println!("  Indicators:  {values}");
    }

    let trades = service.trades_for_bot(id).await?;
    if !trades.is_empty() {
        println!("\nRecent trades:");
        for trade in trades.iter().rev().take(10) {
            let pnl = trade
                .pnl
                .map(|p| format!(" (PnL {p})"))
                .unwrap_or_default();
            println!(
                "  {} {} {} at {}{}",
                trade.created_at.format("%Y-%m-%d %H:%M"),
                trade.side,
                trade.quantity,
                trade.price,
                pnl
            );
        }
    }
    println!();
    Ok(())
}

async fn show_activity(config: &Config, limit: i64) -> Result<()> {
    let service = build_service(config).await?;
    let activities = service.recent_activities(limit).await?;

    if activities.is_empty() {
        println!("No activity yet.");
        return Ok(());
    }

    for activity in activities {
        println!(
            "{} [{:<8}] {} ({}): {}",
            activity.created_at.format("%Y-%m-%d %H:%M:%S"),
            activity.kind.as_str(),
            activity.bot_name,
            activity.symbol,
            activity.message
        );
    }
    Ok(())
}

async fn analyze_symbol(config: &Config, symbol: &str, interval: Interval) -> Result<()> {
    let db = Arc::new(Database::new(&config.database_path).await?);
    let venue = Arc::new(PaperVenue::new());
    let connection = Arc::new(ConnectionManager::new(config.demo_mode));
    let sentiment = Arc::new(FearGreedClient::new(&config.sentiment_endpoint)?);
    seed_demo_market(&venue, symbol).await;
    let service = BotService::new(db, venue, connection, sentiment);

    let analysis = service
        .analyze_symbol(symbol, &IndicatorSettings::default(), interval)
        .await?;

    println!("\nAnalysis for {symbol} ({interval})");
    println!("{}", "-".repeat(60));
    for decision in &analysis.decisions {
        println!(
            "  {:<10} {:<8} {}",
            decision.indicator, decision.vote.to_string(), decision.detail
        );
    }
    println!("{}", "-".repeat(60));
    println!(
        "  Signal: {} ({} buy / {} sell, strength {:.0}% / {:.0}%)\n",
        analysis.signal,
        analysis.buy_count,
        analysis.sell_count,
        analysis.buy_strength,
        analysis.sell_strength
    );
    Ok(())
}
