//! Capital ledger: per-strategy balances, open positions, and the
//! append-only event log.
//!
//! The ledger is the single shared mutable resource in the engine. Every
//! mutation (`open`, `close`) is applied as one atomic unit: the balance
//! debit/credit and the position record change together or not at all.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use crate::models::{ClosedTrade, ExitReason, Position, PositionStatus, StrategyKind};

/// Kind of event appended to the ledger log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventKind {
    Entry,
    Exit,
    ForcedExit,
    Halt,
}

impl LedgerEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEventKind::Entry => "entry",
            LedgerEventKind::Exit => "exit",
            LedgerEventKind::ForcedExit => "forced_exit",
            LedgerEventKind::Halt => "halt",
        }
    }
}

/// One entry in the ordered event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub ts: DateTime<Utc>,
    pub kind: LedgerEventKind,
    pub details: serde_json::Value,
}

/// Per-strategy balances, positions keyed by id, the event log, and
/// cooldown bookkeeping.
#[derive(Debug, Clone)]
pub struct PositionLedger {
    balances: HashMap<StrategyKind, Decimal>,
    positions: HashMap<Uuid, Position>,
    events: Vec<LedgerEvent>,
    trades: Vec<ClosedTrade>,
    last_entry_tick: HashMap<(String, StrategyKind), u64>,
}

impl PositionLedger {
    pub fn new(balances: HashMap<StrategyKind, Decimal>) -> Self {
        Self {
            balances,
            positions: HashMap::new(),
            events: Vec::new(),
            trades: Vec::new(),
            last_entry_tick: HashMap::new(),
        }
    }

    /// Rebuild a ledger from persisted state.
    pub fn restore(
        balances: HashMap<StrategyKind, Decimal>,
        positions: Vec<Position>,
        last_entry_tick: HashMap<(String, StrategyKind), u64>,
    ) -> Self {
        Self {
            balances,
            positions: positions.into_iter().map(|p| (p.id, p)).collect(),
            events: Vec::new(),
            trades: Vec::new(),
            last_entry_tick,
        }
    }

    pub fn balance(&self, strategy: StrategyKind) -> Decimal {
        self.balances.get(&strategy).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn balances(&self) -> &HashMap<StrategyKind, Decimal> {
        &self.balances
    }

    /// The open position for a (symbol, strategy) pair, if any.
    pub fn open_position(&self, symbol: &str, strategy: StrategyKind) -> Option<&Position> {
        self.positions
            .values()
            .find(|p| p.is_open() && p.symbol == symbol && p.strategy == strategy)
    }

    pub fn open_positions(&self) -> Vec<&Position> {
        self.positions.values().filter(|p| p.is_open()).collect()
    }

    pub fn position(&self, id: Uuid) -> Option<&Position> {
        self.positions.get(&id)
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.trades
    }

    pub fn last_entry_tick(&self, symbol: &str, strategy: StrategyKind) -> Option<u64> {
        self.last_entry_tick
            .get(&(symbol.to_string(), strategy))
            .copied()
    }

    /// Whether enough ticks have elapsed since the last entry for this
    /// (symbol, strategy). Spacing applies whether or not that prior
    /// position is still open.
    pub fn cooldown_elapsed(
        &self,
        symbol: &str,
        strategy: StrategyKind,
        current_tick: u64,
        cooldown_bars: u64,
    ) -> bool {
        match self.last_entry_tick(symbol, strategy) {
            Some(last) => current_tick >= last + cooldown_bars,
            None => true,
        }
    }

    /// Open a position, debiting `qty * entry_price + fee` from the
    /// strategy balance. Refuses when another position is already open for
    /// the pair, and refuses a debit that would drive the balance
    /// negative; the latter is an internal-consistency error because the
    /// sizer's affordability contract should make it unreachable.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &mut self,
        symbol: &str,
        strategy: StrategyKind,
        entry_price: Decimal,
        qty: Decimal,
        sl_price: Decimal,
        tp_price: Decimal,
        fee: Decimal,
        ts: DateTime<Utc>,
        tick: u64,
    ) -> Option<Uuid> {
        if self.open_position(symbol, strategy).is_some() {
            warn!(%symbol, %strategy, "open refused: position already open for pair");
            return None;
        }

        let cost = qty * entry_price + fee;
        let balance = self.balance(strategy);
        if cost > balance {
            error!(
                %symbol, %strategy, %cost, %balance,
                "open refused: debit would drive balance negative"
            );
            return None;
        }

        let position = Position {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            strategy,
            entry_price,
            qty,
            entry_time: ts,
            tp_price,
            sl_price,
            highest_price_seen: entry_price,
            entry_fee: fee,
            status: PositionStatus::Open,
        };
        let id = position.id;

        self.balances.insert(strategy, balance - cost);
        self.positions.insert(id, position);
        self.last_entry_tick.insert((symbol.to_string(), strategy), tick);
        self.events.push(LedgerEvent {
            ts,
            kind: LedgerEventKind::Entry,
            details: serde_json::json!({
                "position_id": id,
                "symbol": symbol,
                "strategy": strategy,
                "entry_price": entry_price,
                "qty": qty,
                "sl_price": sl_price,
                "tp_price": tp_price,
                "fee": fee,
            }),
        });
        Some(id)
    }

    /// Raise `highest_price_seen` on the matching open position. Called
    /// once per tick before exit evaluation; the value never decreases.
    pub fn apply_price(&mut self, symbol: &str, strategy: StrategyKind, price: Decimal) {
        if let Some(position) = self
            .positions
            .values_mut()
            .find(|p| p.is_open() && p.symbol == symbol && p.strategy == strategy)
        {
            if price > position.highest_price_seen {
                position.highest_price_seen = price;
            }
        }
    }

    /// Close a position at `exit_price`, crediting the proceeds net of the
    /// taker fee. Closing an already-closed id is a logged no-op.
    pub fn close(
        &mut self,
        id: Uuid,
        exit_price: Decimal,
        fee_pct: Decimal,
        reason: ExitReason,
        ts: DateTime<Utc>,
    ) -> Option<ClosedTrade> {
        let position = match self.positions.get_mut(&id) {
            Some(p) => p,
            None => {
                warn!(%id, "close refused: unknown position id");
                return None;
            }
        };
        if !position.is_open() {
            warn!(%id, "close refused: position already closed");
            return None;
        }

        let gross = exit_price * position.qty;
        let fee = gross * fee_pct;
        let proceeds = gross - fee;
        let pnl = proceeds - (position.entry_price * position.qty + position.entry_fee);

        position.status = PositionStatus::Closed;
        let trade = ClosedTrade {
            position_id: id,
            symbol: position.symbol.clone(),
            strategy: position.strategy,
            entry_price: position.entry_price,
            exit_price,
            qty: position.qty,
            pnl,
            reason,
            entry_time: position.entry_time,
            exit_time: ts,
        };

        let strategy = position.strategy;
        let balance = self.balance(strategy);
        self.balances.insert(strategy, balance + proceeds);

        let kind = if reason == ExitReason::Forced {
            LedgerEventKind::ForcedExit
        } else {
            LedgerEventKind::Exit
        };
        self.events.push(LedgerEvent {
            ts,
            kind,
            details: serde_json::json!({
                "position_id": id,
                "symbol": trade.symbol,
                "strategy": trade.strategy,
                "exit_price": exit_price,
                "qty": trade.qty,
                "pnl": pnl,
                "reason": reason,
            }),
        });
        self.trades.push(trade.clone());
        Some(trade)
    }

    /// Append a halt marker to the event log.
    pub fn record_halt(&mut self, ts: DateTime<Utc>, details: serde_json::Value) {
        self.events.push(LedgerEvent {
            ts,
            kind: LedgerEventKind::Halt,
            details,
        });
    }

    /// Total equity: cash across strategies plus open positions marked at
    /// the supplied price.
    pub fn equity(&self, mark: impl Fn(&str) -> Decimal) -> Decimal {
        let cash: Decimal = self.balances.values().copied().sum();
        let held: Decimal = self
            .positions
            .values()
            .filter(|p| p.is_open())
            .map(|p| p.market_value(mark(&p.symbol)))
            .sum();
        cash + held
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_ledger() -> PositionLedger {
        let mut balances = HashMap::new();
        balances.insert(StrategyKind::Momentum, dec!(1000));
        balances.insert(StrategyKind::MaCross, dec!(1000));
        PositionLedger::new(balances)
    }

    fn open_default(ledger: &mut PositionLedger) -> Uuid {
        ledger
            .open(
                "BTCUSDT",
                StrategyKind::Momentum,
                dec!(100),
                dec!(2),
                dec!(98),
                dec!(105),
                dec!(0.08),
                Utc::now(),
                10,
            )
            .expect("open succeeds")
    }

    #[test]
    fn test_open_debits_balance_and_records_position() {
        let mut ledger = make_ledger();
        let id = open_default(&mut ledger);

        assert_eq!(ledger.balance(StrategyKind::Momentum), dec!(799.92));
        let pos = ledger.position(id).expect("exists");
        assert_eq!(pos.highest_price_seen, dec!(100));
        assert!(pos.is_open());
        assert_eq!(ledger.events().len(), 1);
        assert_eq!(ledger.events()[0].kind, LedgerEventKind::Entry);
    }

    #[test]
    fn test_second_open_for_pair_refused() {
        let mut ledger = make_ledger();
        open_default(&mut ledger);
        let second = ledger.open(
            "BTCUSDT",
            StrategyKind::Momentum,
            dec!(100),
            dec!(1),
            dec!(98),
            dec!(105),
            dec!(0.04),
            Utc::now(),
            11,
        );
        assert!(second.is_none());
        assert_eq!(ledger.open_positions().len(), 1);
    }

    #[test]
    fn test_other_strategy_can_open_same_symbol() {
        let mut ledger = make_ledger();
        open_default(&mut ledger);
        let other = ledger.open(
            "BTCUSDT",
            StrategyKind::MaCross,
            dec!(100),
            dec!(1),
            dec!(98),
            dec!(105),
            dec!(0.04),
            Utc::now(),
            10,
        );
        assert!(other.is_some());
        assert_eq!(ledger.open_positions().len(), 2);
    }

    #[test]
    fn test_negative_debit_refused() {
        let mut ledger = make_ledger();
        let result = ledger.open(
            "BTCUSDT",
            StrategyKind::Momentum,
            dec!(100),
            dec!(20), // costs 2000 against a 1000 balance
            dec!(98),
            dec!(105),
            dec!(0),
            Utc::now(),
            0,
        );
        assert!(result.is_none());
        assert_eq!(ledger.balance(StrategyKind::Momentum), dec!(1000));
        assert!(ledger.events().is_empty());
    }

    #[test]
    fn test_apply_price_is_monotone() {
        let mut ledger = make_ledger();
        let id = open_default(&mut ledger);

        ledger.apply_price("BTCUSDT", StrategyKind::Momentum, dec!(110));
        assert_eq!(ledger.position(id).unwrap().highest_price_seen, dec!(110));

        ledger.apply_price("BTCUSDT", StrategyKind::Momentum, dec!(105));
        assert_eq!(ledger.position(id).unwrap().highest_price_seen, dec!(110));
    }

    #[test]
    fn test_close_credits_proceeds_and_computes_pnl() {
        let mut ledger = make_ledger();
        let id = open_default(&mut ledger);

        let trade = ledger
            .close(id, dec!(105), dec!(0), ExitReason::TakeProfit, Utc::now())
            .expect("close succeeds");

        // Entry cost 200.08; exit proceeds 210 with no fee.
        assert_eq!(trade.pnl, dec!(9.92));
        assert_eq!(ledger.balance(StrategyKind::Momentum), dec!(1009.92));
        assert!(!ledger.position(id).unwrap().is_open());
    }

    #[test]
    fn test_exit_fee_deducted_from_proceeds() {
        let mut ledger = make_ledger();
        let id = open_default(&mut ledger);

        let trade = ledger
            .close(id, dec!(100), dec!(0.01), ExitReason::StopLoss, Utc::now())
            .expect("close succeeds");

        // Proceeds 200 - 2 fee = 198; entry cost 200.08.
        assert_eq!(trade.pnl, dec!(-2.08));
    }

    #[test]
    fn test_double_close_is_noop() {
        let mut ledger = make_ledger();
        let id = open_default(&mut ledger);

        ledger
            .close(id, dec!(105), dec!(0), ExitReason::TakeProfit, Utc::now())
            .expect("first close");
        let balance_after = ledger.balance(StrategyKind::Momentum);

        let second = ledger.close(id, dec!(200), dec!(0), ExitReason::TakeProfit, Utc::now());
        assert!(second.is_none());
        assert_eq!(ledger.balance(StrategyKind::Momentum), balance_after);
        assert_eq!(ledger.closed_trades().len(), 1);
    }

    #[test]
    fn test_cooldown_spacing() {
        let mut ledger = make_ledger();
        open_default(&mut ledger); // entry at tick 10

        assert!(!ledger.cooldown_elapsed("BTCUSDT", StrategyKind::Momentum, 15, 10));
        assert!(ledger.cooldown_elapsed("BTCUSDT", StrategyKind::Momentum, 20, 10));
        // No prior entry for the other strategy.
        assert!(ledger.cooldown_elapsed("BTCUSDT", StrategyKind::MaCross, 0, 10));
    }

    #[test]
    fn test_equity_marks_open_positions() {
        let mut ledger = make_ledger();
        open_default(&mut ledger);

        let equity = ledger.equity(|_| dec!(110));
        // 799.92 + 1000 cash, plus 2 units at 110.
        assert_eq!(equity, dec!(2019.92));
    }
}
