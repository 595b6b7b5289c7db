//! Performance metrics calculation.

mod calculator;

pub use calculator::{MetricsCalculator, RunMetrics};
