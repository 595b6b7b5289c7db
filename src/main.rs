//! Multi-strategy spot trading bot.
//!
//! Runs momentum and MA-cross strategies over one symbol with ATR
//! volatility gating, per-strategy capital, and a shared position
//! lifecycle engine used identically by the backtester and the live
//! polling loop.

mod api;
mod backtest;
mod bot;
mod db;
mod metrics;
mod models;
mod trading;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::backtest::{BacktestConfig, Backtester};
use crate::bot::{Bot, BotConfig};
use crate::db::Database;
use crate::trading::{EngineConfig, SymbolFilters};

/// Trading bot CLI.
#[derive(Parser)]
#[command(name = "stratbot")]
#[command(about = "Multi-strategy spot trading bot with backtesting", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./stratbot.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the live trading loop (paper fills at polled prices)
    Run {
        /// Symbol to trade
        #[arg(short, long, default_value = "BTCUSDT")]
        symbol: String,

        /// Kline interval for the signal window
        #[arg(long, default_value = "1h")]
        interval: String,

        /// Polling interval in seconds
        #[arg(short, long, default_value = "60")]
        poll: u64,

        /// Starting capital on a fresh database
        #[arg(short, long, default_value = "10000")]
        balance: f64,
    },

    /// Replay historical bars through the engine
    Backtest {
        /// Symbol to backtest
        #[arg(short, long, default_value = "BTCUSDT")]
        symbol: String,

        /// Kline interval
        #[arg(long, default_value = "1h")]
        interval: String,

        /// Number of historical bars to fetch
        #[arg(long, default_value = "1000")]
        bars: u32,

        /// Initial capital for simulation
        #[arg(short, long, default_value = "10000")]
        capital: f64,

        /// Print the summary as JSON instead of the full report
        #[arg(long)]
        json: bool,

        /// Write the JSON summary to this file as well
        #[arg(long)]
        output: Option<std::path::PathBuf>,
    },

    /// Show bot status and statistics
    Status,

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            symbol,
            interval,
            poll,
            balance,
        } => {
            info!(
                symbol = %symbol,
                poll_interval = poll,
                "Starting trading bot"
            );

            let bot_config = BotConfig {
                symbol: symbol.clone(),
                interval,
                poll_interval_secs: poll,
                initial_balance: Decimal::try_from(balance)?,
                engine: EngineConfig::default(),
                database_url: cli.database.clone(),
                ..Default::default()
            };

            let mut bot = Bot::new(bot_config).await?;
            bot.initialize().await?;

            println!("\n=== Trading Bot ===");
            println!("Symbol: {}", symbol);
            println!("Polling interval: {}s", poll);
            println!("Mode: PAPER FILLS (no real orders)");
            println!("\nPress Ctrl+C to stop.\n");

            if let Err(e) = bot.run().await {
                tracing::error!(error = %e, "Bot error");
            }

            match bot.get_stats().await {
                Ok(stats) => println!("\n{}", stats),
                Err(e) => tracing::warn!(error = %e, "Stats unavailable"),
            }
        }

        Commands::Backtest {
            symbol,
            interval,
            bars,
            capital,
            json,
            output,
        } => {
            info!(
                symbol = %symbol,
                bars = bars,
                capital = capital,
                "Starting backtest"
            );

            let config = BacktestConfig {
                symbol: symbol.clone(),
                interval,
                lookback_bars: bars,
                initial_balance: Decimal::try_from(capital)?,
                engine: EngineConfig::default(),
                filters: SymbolFilters::default(),
                ..Default::default()
            };

            let results = Backtester::new(config).run_from_exchange().await?;

            if let Some(path) = &output {
                let summary = serde_json::to_string_pretty(&results.summary())?;
                std::fs::write(path, summary)
                    .with_context(|| format!("Failed to write summary to {}", path.display()))?;
                info!(path = %path.display(), "Wrote backtest summary");
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&results.summary())?);
            } else {
                println!("{}", results);

                // Trade breakdown by exit reason
                let mut by_reason: std::collections::HashMap<String, (usize, Decimal)> =
                    std::collections::HashMap::new();
                for trade in &results.trades {
                    let entry = by_reason
                        .entry(trade.reason.to_string())
                        .or_insert((0, Decimal::ZERO));
                    entry.0 += 1;
                    entry.1 += trade.pnl;
                }

                if !by_reason.is_empty() {
                    println!("\n--- Trades by Exit Reason ---");
                    for (reason, (count, pnl)) in by_reason {
                        println!("  {:<8} {:>3} trades  ${:.2}", reason, count, pnl);
                    }
                }
            }
        }

        Commands::Status => {
            let db = Database::new(&cli.database).await?;
            let bot_state = match db.get_bot_state().await {
                Ok(state) => state,
                Err(_) => {
                    println!("No bot session found. Run 'stratbot run' to start the bot.");
                    return Ok(());
                }
            };

            let max_dd = db.calculate_max_drawdown().await.unwrap_or(0.0);
            let balances = db.get_balances().await?;
            let positions = db.get_open_positions().await?;
            let trades = db.trade_counts().await?;

            println!("\n=== Bot Status ===");
            println!(
                "Running:          {}",
                if bot_state.is_running { "Yes" } else { "No" }
            );
            println!("Symbol:           {}", bot_state.symbol);
            println!("Started:          {}", bot_state.started_at);
            println!(
                "Last Poll:        {}",
                bot_state.last_poll_at.unwrap_or_else(|| "Never".to_string())
            );
            println!("Tick Counter:     {}", bot_state.tick_counter);

            println!("\n=== Capital ===");
            let total: Decimal = balances.values().copied().sum();
            println!("Cash Total:       ${:.2}", total);
            for (strategy, balance) in &balances {
                println!("  {:<12} ${:.2}", strategy.as_str(), balance);
            }
            println!("Max Drawdown:     {:.2}%", max_dd * 100.0);

            println!("\n=== Trading ===");
            println!("Open Positions:   {}", positions.len());
            for (strategy, count) in &trades {
                println!("Trades ({}): {}", strategy, count)
            }

            if !positions.is_empty() {
                println!("\n=== Open Positions ===");
                for pos in &positions {
                    println!(
                        "  {} {} {} @ {} (high {}, tp {}, sl {})",
                        pos.symbol,
                        pos.strategy,
                        pos.qty,
                        pos.entry_price,
                        pos.highest_price_seen,
                        pos.tp_price,
                        pos.sl_price,
                    );
                }
            }

            let recent = db.get_trades(5).await?;
            if !recent.is_empty() {
                println!("\n=== Recent Trades ===");
                for t in &recent {
                    println!(
                        "  {} {} {} {} @ {} -> {} ({}) pnl {}",
                        t.exit_time,
                        t.symbol,
                        t.strategy,
                        t.qty,
                        t.entry_price,
                        t.exit_price,
                        t.reason,
                        t.pnl,
                    );
                }
            }
        }

        Commands::Config => {
            let config = EngineConfig::default();
            let hundred = Decimal::from(100);

            println!("\n=== Exit Rules ===");
            println!("  Take Profit:        {}%", config.trade.take_profit_pct * hundred);
            println!("  Stop Loss:          {}%", config.trade.stop_loss_pct * hundred);
            println!("  Trailing Stop:      {}%", config.trade.trailing_stop_pct * hundred);
            println!("  Taker Fee:          {}%", config.trade.taker_fee_pct * hundred);
            println!("  Slippage:           {}%", config.trade.slippage_pct * hundred);

            println!("\n=== Risk ===");
            println!("  Allocation:         {}%", config.risk.allocation_pct * hundred);
            println!("  Risk per Trade:     {}%", config.risk.risk_per_trade_pct * hundred);
            println!(
                "  Max Daily Drawdown: {}",
                if config.risk.max_daily_drawdown_pct > Decimal::ZERO {
                    format!("{}%", config.risk.max_daily_drawdown_pct * hundred)
                } else {
                    "disabled".to_string()
                }
            );
            println!("  Min ATR:            {:.4}%", config.risk.min_atr_pct * 100.0);
            println!("  Cooldown:           {} bars", config.risk.cooldown_bars);

            println!("\n=== Signals ===");
            println!(
                "  Momentum:           {} bars, {:.1}% threshold",
                config.signals.momentum_lookback, config.signals.momentum_threshold_pct
            );
            println!(
                "  MA Cross:           {}/{}",
                config.signals.ma_fast, config.signals.ma_slow
            );
            println!(
                "  RSI Filter:         {} (period {}, buy >= {})",
                if config.signals.rsi_filter_enabled { "on" } else { "off" },
                config.signals.rsi_period,
                config.signals.rsi_buy_threshold
            );
            println!(
                "  MACD Filter:        {} ({}/{}/{})",
                if config.signals.macd_filter_enabled { "on" } else { "off" },
                config.signals.macd_fast,
                config.signals.macd_slow,
                config.signals.macd_signal
            );
            println!("  ATR Period:         {}", config.signals.atr_period);

            println!("\n=== Strategy Weights ===");
            for (strategy, weight) in &config.strategy_weights {
                println!("  {:<12} {}%", strategy.as_str(), *weight * hundred);
            }
        }
    }

    Ok(())
}
