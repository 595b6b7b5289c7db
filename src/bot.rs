//! Bot runner: the live polling loop around the lifecycle engine.
//!
//! Handles:
//! - Polling price and bar data on a fixed interval
//! - Running the engine's per-tick procedure (same code the backtest runs)
//! - Paper order fills at the polled price
//! - Persisting ledger state for crash recovery
//!
//! Positions persist across restarts; there is no forced liquidation in
//! live operation. Ticks are serialized by the loop, and a shutdown
//! request is honored between ticks so an in-flight tick always runs to
//! completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::api::ExchangeClient;
use crate::db::Database;
use crate::models::StrategyKind;
use crate::trading::{
    EngineConfig, LifecycleEngine, PositionLedger, SimExecution, TickObservation,
};

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Symbol to trade
    pub symbol: String,

    /// Kline interval for the signal window (e.g. "1h")
    pub interval: String,

    /// Polling interval (seconds)
    pub poll_interval_secs: u64,

    /// Starting capital on a fresh database, split by strategy weights
    pub initial_balance: Decimal,

    /// Bars of history handed to the signal evaluator each tick
    pub window_bars: usize,

    /// Engine configuration
    pub engine: EngineConfig,

    /// Database URL
    pub database_url: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            interval: "1h".to_string(),
            poll_interval_secs: 60,
            initial_balance: dec!(10000),
            window_bars: 120,
            engine: EngineConfig::default(),
            database_url: "sqlite:stratbot.db?mode=rwc".to_string(),
        }
    }
}

/// Main bot runner.
pub struct Bot {
    config: BotConfig,
    db: Database,
    exchange: ExchangeClient,
    engine: Option<LifecycleEngine>,
    exec: SimExecution,
    tick_counter: u64,

    // Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl Bot {
    /// Create a new bot instance.
    pub async fn new(config: BotConfig) -> Result<Self> {
        let db = Database::new(&config.database_url).await?;
        let exchange = ExchangeClient::new()?;
        let exec = SimExecution::new(config.engine.trade.slippage_pct);

        Ok(Self {
            config,
            db,
            exchange,
            engine: None,
            exec,
            tick_counter: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Initialize bot state from database or fresh start.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing bot...");

        let state = self.db.init_bot_state(&self.config.symbol).await?;
        self.tick_counter = state.tick_counter as u64;

        // Seed balances on a fresh database, otherwise restore them.
        let mut balances = self.db.get_balances().await?;
        if balances.is_empty() {
            balances = self.config.engine.capital_split(self.config.initial_balance);
            for (strategy, balance) in &balances {
                self.db.save_balance(*strategy, *balance).await?;
            }
            info!(initial = %self.config.initial_balance, "Seeded fresh strategy balances");
        }

        let positions = self.db.get_open_positions().await?;
        let last_entries = self.db.get_last_entries().await?;

        if !positions.is_empty() || self.tick_counter > 0 {
            info!(
                positions = positions.len(),
                tick = self.tick_counter,
                "Resuming from previous session"
            );
        }

        let filters = self
            .exchange
            .get_symbol_filters(&self.config.symbol)
            .await
            .context("Failed to fetch symbol filters")?;

        let ledger = PositionLedger::restore(balances, positions, last_entries);
        self.engine = Some(LifecycleEngine::new(
            self.config.engine.clone(),
            ledger,
            filters,
        ));

        info!(symbol = %self.config.symbol, "Bot initialized");
        Ok(())
    }

    /// Main run loop.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            symbol = %self.config.symbol,
            poll_interval = self.config.poll_interval_secs,
            "Starting bot run loop"
        );

        let mut poll_interval = interval(Duration::from_secs(self.config.poll_interval_secs));

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            poll_interval.tick().await;

            if let Err(e) = self.tick().await {
                // Recoverable: ledger state is unchanged for a failed
                // poll, so resume on the next tick.
                error!(error = %e, "Error in bot tick");
            }
        }

        self.shutdown().await?;
        Ok(())
    }

    /// Single iteration of the main loop.
    async fn tick(&mut self) -> Result<()> {
        debug!(tick = self.tick_counter, "Bot tick");

        let price = self
            .exchange
            .get_price(&self.config.symbol)
            .await
            .context("Price poll failed")?;
        let bars = self
            .exchange
            .get_klines(
                &self.config.symbol,
                &self.config.interval,
                self.config.window_bars as u32,
            )
            .await
            .context("Kline poll failed")?;

        self.tick_counter += 1;
        let obs = TickObservation {
            symbol: self.config.symbol.clone(),
            ts: Utc::now(),
            tick: self.tick_counter,
            price,
            bars,
        };

        let engine = self.engine.as_mut().context("Bot not initialized")?;
        self.exec.set_price(price);
        let report = engine.process_tick(&obs, &mut self.exec).await?;

        self.persist_tick(&obs, &report).await?;

        if !report.exits.is_empty() || !report.entries.is_empty() {
            info!(
                tick = self.tick_counter,
                exits = report.exits.len(),
                entries = report.entries.len(),
                equity = %report.equity,
                "Tick complete"
            );
        }
        Ok(())
    }

    /// Write the tick's ledger changes through to the database.
    async fn persist_tick(
        &mut self,
        obs: &TickObservation,
        report: &crate::trading::TickReport,
    ) -> Result<()> {
        let engine = self.engine.as_mut().context("Bot not initialized")?;

        for trade in &report.exits {
            self.db.record_trade(trade).await?;
        }

        // Upsert every touched position: closed ones flip status, open
        // ones refresh the high-water mark.
        for trade in &report.exits {
            if let Some(position) = engine.ledger().position(trade.position_id) {
                self.db.upsert_position(position).await?;
            }
        }
        let open: Vec<_> = engine
            .ledger()
            .open_positions()
            .into_iter()
            .cloned()
            .collect();
        for position in &open {
            self.db.upsert_position(position).await?;
            let tick = engine
                .ledger()
                .last_entry_tick(&position.symbol, position.strategy)
                .unwrap_or(self.tick_counter);
            self.db
                .save_last_entry(&position.symbol, position.strategy, tick)
                .await?;
        }

        let balances = engine.ledger().balances().clone();
        for (strategy, balance) in balances {
            self.db.save_balance(strategy, balance).await?;
        }

        for event in engine.ledger_mut().take_events() {
            self.db.append_event(&event).await?;
        }

        self.db
            .record_equity_point(obs.ts, report.equity.to_f64().unwrap_or(0.0))
            .await?;
        self.db.save_tick_counter(self.tick_counter).await?;
        Ok(())
    }

    /// Graceful shutdown.
    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down bot...");
        self.db.mark_bot_stopped().await?;
        info!("Bot shutdown complete");
        Ok(())
    }

    /// Get current stats.
    pub async fn get_stats(&self) -> Result<BotStats> {
        let engine = self.engine.as_ref().context("Bot not initialized")?;
        let max_dd = self.db.calculate_max_drawdown().await.unwrap_or(0.0);
        let trades = self.db.trade_counts().await.unwrap_or_default();

        let cash: Decimal = engine.ledger().balances().values().copied().sum();
        let open = engine.ledger().open_positions();

        Ok(BotStats {
            symbol: self.config.symbol.clone(),
            cash_balance: cash,
            open_positions: open.len(),
            momentum_balance: engine.ledger().balance(StrategyKind::Momentum),
            ma_cross_balance: engine.ledger().balance(StrategyKind::MaCross),
            max_drawdown: Decimal::try_from(max_dd).unwrap_or(Decimal::ZERO),
            trades_per_strategy: trades,
            is_running: !self.shutdown.load(Ordering::SeqCst),
        })
    }
}

/// Bot statistics.
#[derive(Debug, Clone)]
pub struct BotStats {
    pub symbol: String,
    pub cash_balance: Decimal,
    pub open_positions: usize,
    pub momentum_balance: Decimal,
    pub ma_cross_balance: Decimal,
    pub max_drawdown: Decimal,
    pub trades_per_strategy: Vec<(String, i64)>,
    pub is_running: bool,
}

impl std::fmt::Display for BotStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Bot Statistics ===")?;
        writeln!(f, "Symbol:          {}", self.symbol)?;
        writeln!(f, "Cash Balance:    ${:.2}", self.cash_balance)?;
        writeln!(f, "  momentum:      ${:.2}", self.momentum_balance)?;
        writeln!(f, "  ma_cross:      ${:.2}", self.ma_cross_balance)?;
        writeln!(f, "Open Positions:  {}", self.open_positions)?;
        writeln!(f, "Max Drawdown:    {:.2}%", self.max_drawdown * dec!(100))?;
        for (strategy, count) in &self.trades_per_strategy {
            writeln!(f, "Trades ({}): {}", strategy, count)?;
        }
        writeln!(
            f,
            "Status:          {}",
            if self.is_running { "Running" } else { "Stopped" }
        )?;
        Ok(())
    }
}
