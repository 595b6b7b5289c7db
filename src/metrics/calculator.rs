//! Performance metrics for a run: max drawdown, Sharpe/Sortino, win rate.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

use crate::models::ClosedTrade;

/// Aggregate performance of a sequence of completed trades.
#[derive(Debug, Clone, Default)]
pub struct RunMetrics {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: f64,
    pub total_pnl: Decimal,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub profit_factor: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
}

/// Calculator for run performance metrics.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Compute metrics from completed trades and the equity curve the run
    /// produced. Trades drive the P&L statistics; the equity curve drives
    /// drawdown.
    pub fn calculate(trades: &[ClosedTrade], equity_curve: &[Decimal]) -> RunMetrics {
        let mut metrics = RunMetrics::default();

        if !trades.is_empty() {
            Self::calculate_pnl_metrics(&mut metrics, trades);
        }
        metrics.max_drawdown_pct = Self::max_drawdown_pct(equity_curve);
        metrics
    }

    fn calculate_pnl_metrics(metrics: &mut RunMetrics, trades: &[ClosedTrade]) {
        let pnls: Vec<Decimal> = trades.iter().map(|t| t.pnl).collect();
        // Breakeven trades count toward the total but neither bucket.
        let wins: Vec<Decimal> = pnls.iter().copied().filter(|p| *p > Decimal::ZERO).collect();
        let losses: Vec<Decimal> = pnls.iter().copied().filter(|p| *p < Decimal::ZERO).collect();

        metrics.total_trades = trades.len() as u32;
        metrics.winning_trades = wins.len() as u32;
        metrics.losing_trades = losses.len() as u32;
        metrics.total_pnl = pnls.iter().copied().sum();
        metrics.win_rate = wins.len() as f64 / pnls.len() as f64;

        if !wins.is_empty() {
            metrics.avg_win =
                wins.iter().copied().sum::<Decimal>() / Decimal::from(wins.len() as u32);
        }
        if !losses.is_empty() {
            metrics.avg_loss = losses.iter().copied().map(|l: Decimal| l.abs()).sum::<Decimal>()
                / Decimal::from(losses.len() as u32);
        }

        let gross_profit: Decimal = wins.iter().copied().sum();
        let gross_loss: Decimal = losses.iter().copied().map(|l: Decimal| l.abs()).sum();
        if gross_loss > Decimal::ZERO {
            metrics.profit_factor =
                gross_profit.to_f64().unwrap_or(0.0) / gross_loss.to_f64().unwrap_or(1.0);
        }

        Self::calculate_sharpe_sortino(metrics, &pnls);
    }

    /// Sharpe and Sortino over per-trade P&L, 0% risk-free rate,
    /// annualized assuming daily observations.
    fn calculate_sharpe_sortino(metrics: &mut RunMetrics, pnls: &[Decimal]) {
        if pnls.len() < 2 {
            return;
        }

        let returns: Vec<f64> = pnls.iter().filter_map(|p| p.to_f64()).collect();
        if returns.is_empty() {
            return;
        }

        let mean = returns.clone().mean();
        let std_dev = returns.clone().std_dev();

        if std_dev > 0.0 {
            metrics.sharpe_ratio = (mean / std_dev) * (365.0_f64).sqrt();
        }

        let negative_returns: Vec<f64> =
            returns.iter().filter(|&&r| r < 0.0).copied().collect();
        if negative_returns.len() >= 2 {
            let downside_dev = negative_returns.std_dev();
            if downside_dev > 0.0 {
                metrics.sortino_ratio = (mean / downside_dev) * (365.0_f64).sqrt();
            }
        }
    }

    /// Largest peak-to-trough decline across the equity curve.
    pub fn max_drawdown_pct(equity_curve: &[Decimal]) -> f64 {
        let mut peak = Decimal::ZERO;
        let mut max_dd_pct = 0.0f64;

        for &equity in equity_curve {
            if equity > peak {
                peak = equity;
            }
            if peak > Decimal::ZERO {
                let dd = (peak - equity).to_f64().unwrap_or(0.0) / peak.to_f64().unwrap_or(1.0);
                if dd > max_dd_pct {
                    max_dd_pct = dd;
                }
            }
        }
        max_dd_pct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExitReason, StrategyKind};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn trade(pnl: Decimal) -> ClosedTrade {
        ClosedTrade {
            position_id: Uuid::new_v4(),
            symbol: "BTCUSDT".to_string(),
            strategy: StrategyKind::Momentum,
            entry_price: dec!(100),
            exit_price: dec!(100) + pnl,
            qty: dec!(1),
            pnl,
            reason: ExitReason::TakeProfit,
            entry_time: Utc::now(),
            exit_time: Utc::now(),
        }
    }

    #[test]
    fn test_win_rate_and_profit_factor() {
        let trades = vec![trade(dec!(10)), trade(dec!(20)), trade(dec!(-15))];
        let metrics = MetricsCalculator::calculate(&trades, &[]);

        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.losing_trades, 1);
        assert!((metrics.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(metrics.total_pnl, dec!(15));
        assert_eq!(metrics.avg_win, dec!(15));
        assert_eq!(metrics.avg_loss, dec!(15));
        assert!((metrics.profit_factor - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_breakeven_trades_count_in_neither_bucket() {
        let trades = vec![trade(dec!(10)), trade(dec!(0)), trade(dec!(-10))];
        let metrics = MetricsCalculator::calculate(&trades, &[]);

        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.winning_trades, 1);
        assert_eq!(metrics.losing_trades, 1);
        assert!((metrics.win_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(metrics.total_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_max_drawdown_from_curve() {
        let curve = vec![dec!(100), dec!(120), dec!(90), dec!(110)];
        let dd = MetricsCalculator::max_drawdown_pct(&curve);
        assert!((dd - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_empty_inputs() {
        let metrics = MetricsCalculator::calculate(&[], &[]);
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.max_drawdown_pct, 0.0);
    }

    #[test]
    fn test_monotone_curve_has_zero_drawdown() {
        let curve = vec![dec!(100), dec!(101), dec!(102)];
        assert_eq!(MetricsCalculator::max_drawdown_pct(&curve), 0.0);
    }
}
