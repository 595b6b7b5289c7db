//! Data models for bars, positions, and trades.

mod bar;
mod position;

pub use bar::Bar;
pub use position::{ClosedTrade, ExitReason, Position, PositionStatus, StrategyKind};
