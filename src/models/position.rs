//! Position model and trade lifecycle types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an independent trading rule-set. Each strategy trades its
/// own capital sub-account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Momentum,
    MaCross,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 2] = [StrategyKind::Momentum, StrategyKind::MaCross];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Momentum => "momentum",
            StrategyKind::MaCross => "ma_cross",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "momentum" => Some(StrategyKind::Momentum),
            "ma_cross" | "ma" => Some(StrategyKind::MaCross),
            _ => None,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    /// End-of-backtest liquidation, bypasses threshold checks.
    Forced,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "TP",
            ExitReason::StopLoss => "SL",
            ExitReason::TrailingStop => "TRAIL",
            ExitReason::Forced => "FORCED",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A long spot position owned by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Ledger-assigned identifier
    pub id: Uuid,

    /// Traded symbol (e.g. "BTCUSDT")
    pub symbol: String,

    /// Strategy that opened the position
    pub strategy: StrategyKind,

    /// Fill price at entry
    pub entry_price: Decimal,

    /// Quantity in base asset
    pub qty: Decimal,

    /// When the position was opened
    pub entry_time: DateTime<Utc>,

    /// Take-profit threshold
    pub tp_price: Decimal,

    /// Stop-loss threshold
    pub sl_price: Decimal,

    /// Highest price observed since entry; never decreases while open
    pub highest_price_seen: Decimal,

    /// Fee paid at entry
    pub entry_fee: Decimal,

    /// Open or closed
    pub status: PositionStatus,
}

impl Position {
    /// Cost basis including the entry fee.
    pub fn cost_basis(&self) -> Decimal {
        self.entry_price * self.qty + self.entry_fee
    }

    /// Mark-to-market value at the given price.
    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.qty * price
    }

    /// Trailing-stop threshold derived from the highest price seen.
    pub fn trail_stop(&self, trailing_pct: Decimal) -> Decimal {
        self.highest_price_seen * (Decimal::ONE - trailing_pct)
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

/// A completed round trip, produced by the ledger on close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub position_id: Uuid,
    pub symbol: String,
    pub strategy: StrategyKind,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub qty: Decimal,
    pub pnl: Decimal,
    pub reason: ExitReason,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
}
