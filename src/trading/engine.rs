//! Position lifecycle engine.
//!
//! One engine instance owns one ledger and runs the same fixed per-tick
//! procedure for both drivers: exit checks, equity snapshot, drawdown
//! guard, volatility gate, then per-strategy entries. Drivers supply
//! prices and order execution; the engine performs no I/O of its own and
//! expects ticks to be serialized by the caller.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{Bar, ClosedTrade, ExitReason, StrategyKind};
use crate::trading::config::EngineConfig;
use crate::trading::guard::DailyGuard;
use crate::trading::ledger::PositionLedger;
use crate::trading::signals::SignalEvaluator;
use crate::trading::sizer::{RiskSizer, SymbolFilters};

/// Result of a market order.
#[derive(Debug, Clone)]
pub struct Fill {
    pub price: Decimal,
    pub qty: Decimal,
}

/// Order execution supplied by the driver. The simulator fills
/// synthetically; a live driver routes to an exchange.
pub trait Execution {
    async fn market_buy(&mut self, symbol: &str, qty: Decimal) -> Result<Fill>;
    async fn market_sell(&mut self, symbol: &str, qty: Decimal) -> Result<Fill>;
}

/// Deterministic fill simulator: fills at the posted price moved against
/// the taker by the configured slippage.
#[derive(Debug, Clone)]
pub struct SimExecution {
    slippage_pct: Decimal,
    price: Decimal,
}

impl SimExecution {
    pub fn new(slippage_pct: Decimal) -> Self {
        Self {
            slippage_pct,
            price: Decimal::ZERO,
        }
    }

    /// Post the price simulated fills will be marked from.
    pub fn set_price(&mut self, price: Decimal) {
        self.price = price;
    }
}

impl Execution for SimExecution {
    async fn market_buy(&mut self, _symbol: &str, qty: Decimal) -> Result<Fill> {
        Ok(Fill {
            price: self.price * (Decimal::ONE + self.slippage_pct),
            qty,
        })
    }

    async fn market_sell(&mut self, _symbol: &str, qty: Decimal) -> Result<Fill> {
        Ok(Fill {
            price: self.price * (Decimal::ONE - self.slippage_pct),
            qty,
        })
    }
}

/// One tick's market input: the latest price and the closed-bar window
/// ending at that tick, most recent last.
#[derive(Debug, Clone)]
pub struct TickObservation {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub tick: u64,
    pub price: Decimal,
    pub bars: Vec<Bar>,
}

/// What a tick did, for logging and reporting.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub exits: Vec<ClosedTrade>,
    pub entries: Vec<Uuid>,
    pub equity: Decimal,
    pub halted: bool,
    pub volatility_blocked: bool,
}

pub struct LifecycleEngine {
    config: EngineConfig,
    signals: SignalEvaluator,
    sizer: RiskSizer,
    guard: DailyGuard,
    ledger: PositionLedger,
    filters: SymbolFilters,
    equity_curve: Vec<(DateTime<Utc>, Decimal)>,
}

impl LifecycleEngine {
    pub fn new(config: EngineConfig, ledger: PositionLedger, filters: SymbolFilters) -> Self {
        let signals = SignalEvaluator::new(config.signals.clone());
        let sizer = RiskSizer::new(config.risk.clone());
        let guard = DailyGuard::new(config.risk.max_daily_drawdown_pct);
        Self {
            config,
            signals,
            sizer,
            guard,
            ledger,
            filters,
            equity_curve: Vec::new(),
        }
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut PositionLedger {
        &mut self.ledger
    }

    pub fn equity_curve(&self) -> &[(DateTime<Utc>, Decimal)] {
        &self.equity_curve
    }

    /// Run one tick: exits, equity snapshot, drawdown guard, volatility
    /// gate, entries. Identical in backtest and live operation.
    pub async fn process_tick<E: Execution>(
        &mut self,
        obs: &TickObservation,
        exec: &mut E,
    ) -> Result<TickReport> {
        let mut report = TickReport::default();

        report.exits = self.run_exits(obs, exec).await?;

        // Snapshot after exits so freed capital is reflected immediately.
        let equity = self.ledger.equity(|_| obs.price);
        self.equity_curve.push((obs.ts, equity));
        report.equity = equity;

        let was_halted = self.guard.is_halted();
        report.halted = self.guard.check(obs.ts, equity);
        if report.halted {
            if !was_halted {
                self.ledger.record_halt(
                    obs.ts,
                    serde_json::json!({
                        "equity": equity,
                        "day_start_equity": self.guard.day_start_equity(),
                    }),
                );
            }
            return Ok(report);
        }

        let (highs, lows, closes) = split_ohlc(&obs.bars);
        let atr_pct = self.signals.atr_pct(&highs, &lows, &closes);
        let volatility_ok = atr_pct.is_some_and(|v| v >= self.config.risk.min_atr_pct);
        if !volatility_ok {
            debug!(symbol = %obs.symbol, ?atr_pct, "volatility gate closed, skipping entries");
            report.volatility_blocked = true;
            return Ok(report);
        }

        for strategy in self.config.enabled_strategies() {
            if let Some(id) = self.try_enter(obs, exec, strategy, &closes).await? {
                report.entries.push(id);
            }
        }

        Ok(report)
    }

    /// Exit phase: raise the high-water mark, then test TP, SL, and the
    /// trailing stop in that precedence. First match closes the position.
    async fn run_exits<E: Execution>(
        &mut self,
        obs: &TickObservation,
        exec: &mut E,
    ) -> Result<Vec<ClosedTrade>> {
        let mut exits = Vec::new();
        for strategy in StrategyKind::ALL {
            self.ledger.apply_price(&obs.symbol, strategy, obs.price);

            let Some(position) = self.ledger.open_position(&obs.symbol, strategy) else {
                continue;
            };

            let trail_stop = position.trail_stop(self.config.trade.trailing_stop_pct);
            let reason = if obs.price >= position.tp_price {
                ExitReason::TakeProfit
            } else if obs.price <= position.sl_price {
                ExitReason::StopLoss
            } else if obs.price <= trail_stop {
                ExitReason::TrailingStop
            } else {
                continue;
            };

            let (id, qty) = (position.id, position.qty);
            let fill = exec
                .market_sell(&obs.symbol, qty)
                .await
                .with_context(|| format!("sell order for {} failed", obs.symbol))?;

            if let Some(trade) = self.ledger.close(
                id,
                fill.price,
                self.config.trade.taker_fee_pct,
                reason,
                obs.ts,
            ) {
                info!(
                    symbol = %trade.symbol,
                    strategy = %trade.strategy,
                    %reason,
                    exit_price = %trade.exit_price,
                    pnl = %trade.pnl,
                    "position closed"
                );
                exits.push(trade);
            }
        }
        Ok(exits)
    }

    /// Entry phase for one strategy: open-position check, cooldown,
    /// signal plus filters, sizing, then the ledger debit.
    async fn try_enter<E: Execution>(
        &mut self,
        obs: &TickObservation,
        exec: &mut E,
        strategy: StrategyKind,
        closes: &[f64],
    ) -> Result<Option<Uuid>> {
        if self.ledger.open_position(&obs.symbol, strategy).is_some() {
            return Ok(None);
        }
        if !self.ledger.cooldown_elapsed(
            &obs.symbol,
            strategy,
            obs.tick,
            self.config.risk.cooldown_bars,
        ) {
            return Ok(None);
        }
        if !self.signals.entry_signal(strategy, closes) {
            return Ok(None);
        }

        // Size against the slippage-adjusted expected fill so the ledger
        // debit stays within the balance after the simulated fill.
        let expected_entry = obs.price * (Decimal::ONE + self.config.trade.slippage_pct);
        let (sl_hint, _) = RiskSizer::compute_sl_tp(
            expected_entry,
            self.config.trade.stop_loss_pct,
            self.config.trade.take_profit_pct,
        );
        let balance = self.ledger.balance(strategy);
        let qty = self.sizer.compute_quantity(
            balance,
            expected_entry,
            sl_hint,
            self.config.trade.taker_fee_pct,
            &self.filters,
        );
        if qty.is_zero() {
            debug!(symbol = %obs.symbol, %strategy, %balance, "sizer returned zero, not entering");
            return Ok(None);
        }

        let fill = exec
            .market_buy(&obs.symbol, qty)
            .await
            .with_context(|| format!("buy order for {} failed", obs.symbol))?;
        let (sl_price, tp_price) = RiskSizer::compute_sl_tp(
            fill.price,
            self.config.trade.stop_loss_pct,
            self.config.trade.take_profit_pct,
        );
        let fee = fill.price * fill.qty * self.config.trade.taker_fee_pct;

        let id = self.ledger.open(
            &obs.symbol,
            strategy,
            fill.price,
            fill.qty,
            sl_price,
            tp_price,
            fee,
            obs.ts,
            obs.tick,
        );
        if let Some(id) = id {
            info!(
                symbol = %obs.symbol,
                %strategy,
                entry_price = %fill.price,
                qty = %fill.qty,
                %sl_price,
                %tp_price,
                "position opened"
            );
        }
        Ok(id)
    }

    /// Close every remaining open position at the final price, bypassing
    /// threshold checks. Backtest-only termination step.
    pub async fn force_liquidate<E: Execution>(
        &mut self,
        symbol: &str,
        ts: DateTime<Utc>,
        exec: &mut E,
    ) -> Result<Vec<ClosedTrade>> {
        let open: Vec<(Uuid, Decimal)> = self
            .ledger
            .open_positions()
            .iter()
            .filter(|p| p.symbol == symbol)
            .map(|p| (p.id, p.qty))
            .collect();

        let mut closed = Vec::new();
        for (id, qty) in open {
            let fill = exec
                .market_sell(symbol, qty)
                .await
                .with_context(|| format!("liquidation sell for {symbol} failed"))?;
            if let Some(trade) =
                self.ledger
                    .close(id, fill.price, self.config.trade.taker_fee_pct, ExitReason::Forced, ts)
            {
                warn!(
                    %symbol,
                    strategy = %trade.strategy,
                    exit_price = %trade.exit_price,
                    pnl = %trade.pnl,
                    "position force-closed at end of run"
                );
                closed.push(trade);
            }
        }
        Ok(closed)
    }
}

/// Split a bar window into parallel f64 series for the indicator math.
pub fn split_ohlc(bars: &[Bar]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let mut highs = Vec::with_capacity(bars.len());
    let mut lows = Vec::with_capacity(bars.len());
    let mut closes = Vec::with_capacity(bars.len());
    for bar in bars {
        highs.push(bar.high.to_f64().unwrap_or(0.0));
        lows.push(bar.low.to_f64().unwrap_or(0.0));
        closes.push(bar.close.to_f64().unwrap_or(0.0));
    }
    (highs, lows, closes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::config::{RiskConfig, SignalConfig, TradeConfig};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn make_bar(price: Decimal, ts: DateTime<Utc>) -> Bar {
        Bar {
            open_time: ts,
            open: price,
            high: price * dec!(1.001),
            low: price * dec!(0.999),
            close: price,
            volume: dec!(100),
            close_time: ts,
        }
    }

    fn make_config() -> EngineConfig {
        EngineConfig {
            trade: TradeConfig {
                slippage_pct: dec!(0),
                taker_fee_pct: dec!(0),
                ..Default::default()
            },
            risk: RiskConfig {
                min_atr_pct: 0.0,
                cooldown_bars: 10,
                ..Default::default()
            },
            signals: SignalConfig {
                rsi_filter_enabled: false,
                macd_filter_enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn make_engine(config: EngineConfig) -> LifecycleEngine {
        let mut balances = HashMap::new();
        balances.insert(StrategyKind::Momentum, dec!(10000));
        balances.insert(StrategyKind::MaCross, dec!(10000));
        let filters = SymbolFilters {
            step_size: dec!(0.00001),
            min_qty: dec!(0.00001),
            min_notional: dec!(1),
        };
        LifecycleEngine::new(config, PositionLedger::new(balances), filters)
    }

    fn obs(tick: u64, price: Decimal, history: &[Decimal]) -> TickObservation {
        let ts = Utc::now();
        TickObservation {
            symbol: "BTCUSDT".to_string(),
            ts,
            tick,
            price,
            bars: history.iter().map(|p| make_bar(*p, ts)).collect(),
        }
    }

    async fn open_momentum_at(
        engine: &mut LifecycleEngine,
        exec: &mut SimExecution,
        tick: u64,
        price: Decimal,
    ) {
        // Sixteen flat bars then a +4% close trips momentum.
        let mut history = vec![price * dec!(0.96); 16];
        history.push(price);
        exec.set_price(price);
        let report = engine
            .process_tick(&obs(tick, price, &history), exec)
            .await
            .expect("tick");
        assert_eq!(report.entries.len(), 1, "expected an entry fill");
    }

    #[tokio::test]
    async fn test_trailing_stop_scenario() {
        let mut config = make_config();
        config.trade.take_profit_pct = dec!(0.50);
        config.trade.trailing_stop_pct = dec!(0.01);
        config.strategy_weights = vec![(StrategyKind::Momentum, dec!(1))];
        let mut engine = make_engine(config);
        let mut exec = SimExecution::new(dec!(0));

        open_momentum_at(&mut engine, &mut exec, 0, dec!(100)).await;

        let flat = vec![dec!(100); 17];
        exec.set_price(dec!(110));
        let r = engine
            .process_tick(&obs(1, dec!(110), &flat), &mut exec)
            .await
            .unwrap();
        assert!(r.exits.is_empty());

        // 108.9 == 110 * 0.99, the trailing threshold.
        exec.set_price(dec!(108.9));
        let r = engine
            .process_tick(&obs(2, dec!(108.9), &flat), &mut exec)
            .await
            .unwrap();
        assert_eq!(r.exits.len(), 1);
        assert_eq!(r.exits[0].reason, ExitReason::TrailingStop);
        assert_eq!(r.exits[0].exit_price, dec!(108.9));
    }

    #[tokio::test]
    async fn test_take_profit_before_stop_loss() {
        let mut config = make_config();
        config.trade.take_profit_pct = dec!(0.05);
        config.trade.stop_loss_pct = dec!(0.02);
        config.strategy_weights = vec![(StrategyKind::Momentum, dec!(1))];
        let mut engine = make_engine(config);
        let mut exec = SimExecution::new(dec!(0));

        open_momentum_at(&mut engine, &mut exec, 0, dec!(100)).await;
        let pos = engine
            .ledger()
            .open_position("BTCUSDT", StrategyKind::Momentum)
            .expect("open");
        assert_eq!(pos.tp_price, dec!(105));
        assert_eq!(pos.sl_price, dec!(98));

        let flat = vec![dec!(100); 17];
        exec.set_price(dec!(105));
        let r = engine
            .process_tick(&obs(1, dec!(105), &flat), &mut exec)
            .await
            .unwrap();
        assert_eq!(r.exits.len(), 1);
        assert_eq!(r.exits[0].reason, ExitReason::TakeProfit);
    }

    #[tokio::test]
    async fn test_stop_loss_closes() {
        let mut config = make_config();
        config.strategy_weights = vec![(StrategyKind::Momentum, dec!(1))];
        let mut engine = make_engine(config);
        let mut exec = SimExecution::new(dec!(0));

        open_momentum_at(&mut engine, &mut exec, 0, dec!(100)).await;

        let flat = vec![dec!(100); 17];
        exec.set_price(dec!(98));
        let r = engine
            .process_tick(&obs(1, dec!(98), &flat), &mut exec)
            .await
            .unwrap();
        assert_eq!(r.exits.len(), 1);
        assert_eq!(r.exits[0].reason, ExitReason::StopLoss);
    }

    #[tokio::test]
    async fn test_cooldown_blocks_reentry_until_elapsed() {
        let mut config = make_config();
        config.risk.cooldown_bars = 10;
        config.strategy_weights = vec![(StrategyKind::Momentum, dec!(1))];
        let mut engine = make_engine(config);
        let mut exec = SimExecution::new(dec!(0));

        open_momentum_at(&mut engine, &mut exec, 10, dec!(100)).await;

        // Close it out so only the cooldown can block re-entry.
        let flat = vec![dec!(100); 17];
        exec.set_price(dec!(98));
        engine
            .process_tick(&obs(11, dec!(98), &flat), &mut exec)
            .await
            .unwrap();

        // Same qualifying signal at tick 15: blocked by cooldown.
        let mut signal = vec![dec!(96); 16];
        signal.push(dec!(100));
        exec.set_price(dec!(100));
        let r = engine
            .process_tick(&obs(15, dec!(100), &signal), &mut exec)
            .await
            .unwrap();
        assert!(r.entries.is_empty());

        // At tick 20 the 10-bar spacing has elapsed.
        let r = engine
            .process_tick(&obs(20, dec!(100), &signal), &mut exec)
            .await
            .unwrap();
        assert_eq!(r.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_at_most_one_open_position_per_pair() {
        let mut config = make_config();
        config.risk.cooldown_bars = 0;
        config.strategy_weights = vec![(StrategyKind::Momentum, dec!(1))];
        let mut engine = make_engine(config);
        let mut exec = SimExecution::new(dec!(0));

        open_momentum_at(&mut engine, &mut exec, 0, dec!(100)).await;

        // The same signal on the next tick must not open a second one.
        let mut signal = vec![dec!(96); 16];
        signal.push(dec!(100));
        exec.set_price(dec!(100));
        let r = engine
            .process_tick(&obs(1, dec!(100), &signal), &mut exec)
            .await
            .unwrap();
        assert!(r.entries.is_empty());
        assert_eq!(engine.ledger().open_positions().len(), 1);
    }

    #[tokio::test]
    async fn test_volatility_gate_blocks_entries() {
        let mut config = make_config();
        config.risk.min_atr_pct = 0.5; // unreachable
        config.strategy_weights = vec![(StrategyKind::Momentum, dec!(1))];
        let mut engine = make_engine(config);
        let mut exec = SimExecution::new(dec!(0));

        let mut signal = vec![dec!(96); 16];
        signal.push(dec!(100));
        exec.set_price(dec!(100));
        let r = engine
            .process_tick(&obs(0, dec!(100), &signal), &mut exec)
            .await
            .unwrap();
        assert!(r.volatility_blocked);
        assert!(r.entries.is_empty());
    }

    #[tokio::test]
    async fn test_guard_halt_blocks_entries_but_not_exits() {
        let mut config = make_config();
        config.risk.max_daily_drawdown_pct = dec!(0.002);
        config.strategy_weights = vec![(StrategyKind::Momentum, dec!(1))];
        let mut engine = make_engine(config);
        let mut exec = SimExecution::new(dec!(0));

        // First tick anchors the day at 20000 equity.
        open_momentum_at(&mut engine, &mut exec, 0, dec!(100)).await;

        // Crash to the stop: the exit still runs, then the equity drop
        // trips the guard and entries are blocked.
        let mut signal = vec![dec!(90); 16];
        signal.push(dec!(94));
        exec.set_price(dec!(94));
        let r = engine
            .process_tick(&obs(1, dec!(94), &signal), &mut exec)
            .await
            .unwrap();
        assert_eq!(r.exits.len(), 1);
        assert_eq!(r.exits[0].reason, ExitReason::StopLoss);
        assert!(r.halted);
        assert!(r.entries.is_empty());
    }

    #[tokio::test]
    async fn test_force_liquidate_empties_book() {
        let mut config = make_config();
        config.strategy_weights = vec![(StrategyKind::Momentum, dec!(1))];
        let mut engine = make_engine(config);
        let mut exec = SimExecution::new(dec!(0));

        open_momentum_at(&mut engine, &mut exec, 0, dec!(100)).await;
        assert_eq!(engine.ledger().open_positions().len(), 1);

        exec.set_price(dec!(101));
        let closed = engine
            .force_liquidate("BTCUSDT", Utc::now(), &mut exec)
            .await
            .unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].reason, ExitReason::Forced);
        assert!(engine.ledger().open_positions().is_empty());
    }

    #[tokio::test]
    async fn test_sized_entry_fits_balance_with_fees_and_slippage() {
        let mut config = make_config();
        config.trade.slippage_pct = dec!(0.0005);
        config.trade.taker_fee_pct = dec!(0.0004);
        config.risk.allocation_pct = dec!(1.0);
        config.risk.risk_per_trade_pct = dec!(1.0);
        config.strategy_weights = vec![(StrategyKind::Momentum, dec!(1))];
        let mut engine = make_engine(config);
        let mut exec = SimExecution::new(dec!(0.0005));

        let mut signal = vec![dec!(96); 16];
        signal.push(dec!(100));
        exec.set_price(dec!(100));
        let r = engine
            .process_tick(&obs(0, dec!(100), &signal), &mut exec)
            .await
            .unwrap();
        assert_eq!(r.entries.len(), 1);
        assert!(engine.ledger().balance(StrategyKind::Momentum) >= Decimal::ZERO);
    }
}
