//! Trading logic: signals, sizing, the capital ledger, and the
//! lifecycle engine.

mod config;
mod engine;
mod guard;
mod indicators;
mod ledger;
mod signals;
mod sizer;

pub use config::{EngineConfig, RiskConfig, SignalConfig, TradeConfig};
pub use engine::{
    split_ohlc, Execution, Fill, LifecycleEngine, SimExecution, TickObservation, TickReport,
};
pub use guard::DailyGuard;
pub use ledger::{LedgerEvent, LedgerEventKind, PositionLedger};
pub use signals::SignalEvaluator;
pub use sizer::{truncate_to_step, RiskSizer, SymbolFilters};
