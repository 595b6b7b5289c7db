//! Backtest driver: replays a historical bar sequence through the
//! lifecycle engine with simulated fills.
//!
//! The decision path is the same code the live bot runs. The only
//! driver-specific behavior is the tick source (array iteration) and the
//! forced liquidation once the bar sequence is exhausted, which
//! guarantees a completed run ends with zero open positions.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, info};

use crate::api::ExchangeClient;
use crate::metrics::{MetricsCalculator, RunMetrics};
use crate::models::{Bar, ClosedTrade, StrategyKind};
use crate::trading::{
    EngineConfig, LifecycleEngine, PositionLedger, SimExecution, SymbolFilters, TickObservation,
};

/// Backtesting configuration.
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    /// Symbol to replay
    pub symbol: String,

    /// Kline interval (e.g. "1h")
    pub interval: String,

    /// Number of bars to fetch when pulling history from the exchange
    pub lookback_bars: u32,

    /// Starting capital, split across strategies by their weights
    pub initial_balance: Decimal,

    /// Bars of history handed to the signal evaluator each tick
    pub window_bars: usize,

    /// Engine configuration
    pub engine: EngineConfig,

    /// Exchange order constraints used by the sizer
    pub filters: SymbolFilters,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            interval: "1h".to_string(),
            lookback_bars: 1000,
            initial_balance: dec!(10000),
            window_bars: 120,
            engine: EngineConfig::default(),
            filters: SymbolFilters::default(),
        }
    }
}

/// Backtest results summary.
#[derive(Debug, Clone)]
pub struct BacktestResults {
    pub symbol: String,
    pub initial_balance: Decimal,
    pub final_balance: Decimal,
    pub total_pnl: Decimal,
    pub metrics: RunMetrics,
    pub trades_per_strategy: HashMap<StrategyKind, usize>,
    pub trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<(DateTime<Utc>, Decimal)>,
    pub halted_ticks: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Compact summary for machine consumption.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestSummary {
    pub symbol: String,
    pub initial_balance: Decimal,
    pub final_balance: Decimal,
    pub total_pnl: Decimal,
    pub max_drawdown_pct: f64,
    pub trades_per_strategy: HashMap<String, usize>,
}

impl BacktestResults {
    pub fn summary(&self) -> BacktestSummary {
        BacktestSummary {
            symbol: self.symbol.clone(),
            initial_balance: self.initial_balance,
            final_balance: self.final_balance,
            total_pnl: self.total_pnl,
            max_drawdown_pct: self.metrics.max_drawdown_pct,
            trades_per_strategy: self
                .trades_per_strategy
                .iter()
                .map(|(s, n)| (s.as_str().to_string(), *n))
                .collect(),
        }
    }
}

impl std::fmt::Display for BacktestResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n{:=^60}", " BACKTEST RESULTS ")?;
        writeln!(f)?;
        writeln!(
            f,
            "Symbol: {}  Period: {} to {}",
            self.symbol,
            self.start_time.format("%Y-%m-%d"),
            self.end_time.format("%Y-%m-%d")
        )?;
        writeln!(f)?;
        writeln!(f, "--- Capital ---")?;
        writeln!(f, "Initial:     ${:.2}", self.initial_balance)?;
        writeln!(f, "Final:       ${:.2}", self.final_balance)?;
        writeln!(f, "P&L:         ${:.2}", self.total_pnl)?;
        writeln!(f)?;
        writeln!(f, "--- Trades ---")?;
        writeln!(f, "Total:       {}", self.metrics.total_trades)?;
        for (strategy, count) in &self.trades_per_strategy {
            writeln!(f, "  {:<10} {}", strategy, count)?;
        }
        writeln!(
            f,
            "Winners:     {} ({:.1}%)",
            self.metrics.winning_trades,
            self.metrics.win_rate * 100.0
        )?;
        writeln!(f, "Losers:      {}", self.metrics.losing_trades)?;
        writeln!(f, "Avg Win:     ${:.2}", self.metrics.avg_win)?;
        writeln!(f, "Avg Loss:    ${:.2}", self.metrics.avg_loss)?;
        writeln!(f, "Profit Factor: {:.2}", self.metrics.profit_factor)?;
        writeln!(f)?;
        writeln!(f, "--- Risk Metrics ---")?;
        writeln!(f, "Max Drawdown: {:.2}%", self.metrics.max_drawdown_pct * 100.0)?;
        writeln!(f, "Sharpe Ratio: {:.2}", self.metrics.sharpe_ratio)?;
        writeln!(f, "Sortino Ratio: {:.2}", self.metrics.sortino_ratio)?;
        writeln!(f, "Halted Ticks: {}", self.halted_ticks)?;
        writeln!(f, "{:=^60}", "")?;
        Ok(())
    }
}

/// Backtesting engine.
pub struct Backtester {
    config: BacktestConfig,
}

impl Backtester {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    /// Fetch history from the exchange and replay it.
    pub async fn run_from_exchange(&self) -> Result<BacktestResults> {
        let client = ExchangeClient::new()?;
        let bars = client
            .get_klines(
                &self.config.symbol,
                &self.config.interval,
                self.config.lookback_bars,
            )
            .await
            .context("Failed to fetch historical bars")?;

        info!(
            symbol = %self.config.symbol,
            bars = bars.len(),
            "Fetched historical bars"
        );
        self.run(&bars).await
    }

    /// Replay a bar sequence, oldest first.
    pub async fn run(&self, bars: &[Bar]) -> Result<BacktestResults> {
        if bars.is_empty() {
            anyhow::bail!("No bars to backtest");
        }

        let balances = self
            .config
            .engine
            .capital_split(self.config.initial_balance);

        let mut engine = LifecycleEngine::new(
            self.config.engine.clone(),
            PositionLedger::new(balances),
            self.config.filters.clone(),
        );
        let mut exec = SimExecution::new(self.config.engine.trade.slippage_pct);

        let mut halted_ticks = 0usize;
        for (tick, bar) in bars.iter().enumerate() {
            let window_start = (tick + 1).saturating_sub(self.config.window_bars);
            let obs = TickObservation {
                symbol: self.config.symbol.clone(),
                ts: bar.close_time,
                tick: tick as u64,
                price: bar.close,
                bars: bars[window_start..=tick].to_vec(),
            };

            exec.set_price(bar.close);
            let report = engine.process_tick(&obs, &mut exec).await?;
            if report.halted {
                halted_ticks += 1;
            }
            if !report.exits.is_empty() || !report.entries.is_empty() {
                debug!(
                    tick,
                    exits = report.exits.len(),
                    entries = report.entries.len(),
                    equity = %report.equity,
                    "tick complete"
                );
            }
        }

        // Termination: flatten the book at the final price.
        let last = bars.last().context("bar sequence is empty")?;
        exec.set_price(last.close);
        engine
            .force_liquidate(&self.config.symbol, last.close_time, &mut exec)
            .await?;

        let trades = engine.ledger().closed_trades().to_vec();
        let equity_curve = engine.equity_curve().to_vec();
        let equity_values: Vec<Decimal> = equity_curve.iter().map(|(_, e)| *e).collect();
        let metrics = MetricsCalculator::calculate(&trades, &equity_values);

        let final_balance: Decimal = engine.ledger().balances().values().copied().sum();
        let mut trades_per_strategy: HashMap<StrategyKind, usize> = HashMap::new();
        for trade in &trades {
            *trades_per_strategy.entry(trade.strategy).or_default() += 1;
        }

        Ok(BacktestResults {
            symbol: self.config.symbol.clone(),
            initial_balance: self.config.initial_balance,
            final_balance,
            total_pnl: final_balance - self.config.initial_balance,
            metrics,
            trades_per_strategy,
            trades,
            equity_curve,
            halted_ticks,
            start_time: bars[0].open_time,
            end_time: last.close_time,
        })
    }
}
