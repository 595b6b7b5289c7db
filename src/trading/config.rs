//! Trading, risk, and strategy configuration.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::StrategyKind;

/// Exit thresholds and execution frictions, shared by every strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeConfig {
    /// Take-profit distance above entry (0.0 to 1.0)
    pub take_profit_pct: Decimal,

    /// Stop-loss distance below entry (0.0 to 1.0)
    pub stop_loss_pct: Decimal,

    /// Trailing-stop distance below the highest price seen (0.0 to 1.0)
    pub trailing_stop_pct: Decimal,

    /// Taker fee charged on both entry and exit notional
    pub taker_fee_pct: Decimal,

    /// Adverse price movement applied to simulated fills
    pub slippage_pct: Decimal,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            take_profit_pct: dec!(0.05),
            stop_loss_pct: dec!(0.02),
            trailing_stop_pct: dec!(0.01),
            taker_fee_pct: dec!(0.0004),
            slippage_pct: dec!(0.0005),
        }
    }
}

/// Capital-at-risk limits used by the sizer and the daily guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum fraction of a strategy's balance committed per position
    pub allocation_pct: Decimal,

    /// Fraction of the strategy's balance risked between entry and stop
    pub risk_per_trade_pct: Decimal,

    /// Intraday equity drawdown that halts new entries; disabled when <= 0
    pub max_daily_drawdown_pct: Decimal,

    /// Minimum ATR as a fraction of price required to allow entries
    pub min_atr_pct: f64,

    /// Bars that must elapse between entries per symbol and strategy
    pub cooldown_bars: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            allocation_pct: dec!(0.10),
            risk_per_trade_pct: dec!(0.01),
            max_daily_drawdown_pct: dec!(0),
            min_atr_pct: 0.0005,
            cooldown_bars: 10,
        }
    }
}

/// Indicator parameters for signal evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Momentum lookback in bars
    pub momentum_lookback: usize,

    /// Minimum percent change over the lookback to fire the momentum signal
    pub momentum_threshold_pct: f64,

    /// Fast moving-average period
    pub ma_fast: usize,

    /// Slow moving-average period
    pub ma_slow: usize,

    /// RSI period
    pub rsi_period: usize,

    /// RSI must be at or above this level to confirm an entry
    pub rsi_buy_threshold: f64,

    /// Whether the RSI gate is applied to entries
    pub rsi_filter_enabled: bool,

    /// MACD fast EMA period
    pub macd_fast: usize,

    /// MACD slow EMA period
    pub macd_slow: usize,

    /// MACD signal EMA period
    pub macd_signal: usize,

    /// Whether the MACD gate is applied to entries
    pub macd_filter_enabled: bool,

    /// ATR period for the volatility gate
    pub atr_period: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            momentum_lookback: 15,
            momentum_threshold_pct: 3.0,
            ma_fast: 9,
            ma_slow: 21,
            rsi_period: 14,
            rsi_buy_threshold: 55.0,
            rsi_filter_enabled: true,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            macd_filter_enabled: true,
            atr_period: 14,
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub trade: TradeConfig,
    pub risk: RiskConfig,
    pub signals: SignalConfig,

    /// Capital split across strategies; fractions should sum to 1.0
    pub strategy_weights: Vec<(StrategyKind, Decimal)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trade: TradeConfig::default(),
            risk: RiskConfig::default(),
            signals: SignalConfig::default(),
            strategy_weights: vec![
                (StrategyKind::Momentum, dec!(0.5)),
                (StrategyKind::MaCross, dec!(0.5)),
            ],
        }
    }
}

impl EngineConfig {
    /// Split starting capital across enabled strategies. Weights are
    /// normalized to sum to one, so the split always conserves the
    /// starting balance. Empty when no weight is positive.
    pub fn capital_split(&self, initial_balance: Decimal) -> HashMap<StrategyKind, Decimal> {
        let total: Decimal = self
            .strategy_weights
            .iter()
            .filter(|(_, w)| *w > Decimal::ZERO)
            .map(|(_, w)| *w)
            .sum();
        if total <= Decimal::ZERO {
            return HashMap::new();
        }
        self.strategy_weights
            .iter()
            .filter(|(_, w)| *w > Decimal::ZERO)
            .map(|(s, w)| (*s, initial_balance * *w / total))
            .collect()
    }

    pub fn enabled_strategies(&self) -> Vec<StrategyKind> {
        self.strategy_weights
            .iter()
            .filter(|(_, w)| *w > Decimal::ZERO)
            .map(|(s, _)| *s)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        let config = EngineConfig::default();
        let total: Decimal = config.strategy_weights.iter().map(|(_, w)| *w).sum();
        assert_eq!(total, Decimal::ONE);
    }

    #[test]
    fn test_unlisted_strategy_gets_no_capital() {
        let config = EngineConfig {
            strategy_weights: vec![(StrategyKind::Momentum, dec!(1.0))],
            ..Default::default()
        };
        let split = config.capital_split(dec!(10000));
        assert_eq!(split.get(&StrategyKind::Momentum), Some(&dec!(10000)));
        assert!(!split.contains_key(&StrategyKind::MaCross));
        assert_eq!(config.enabled_strategies(), vec![StrategyKind::Momentum]);
    }

    #[test]
    fn test_capital_split_normalizes_weights() {
        // Weights summing to 0.6 still split the whole balance.
        let config = EngineConfig {
            strategy_weights: vec![
                (StrategyKind::Momentum, dec!(0.3)),
                (StrategyKind::MaCross, dec!(0.3)),
            ],
            ..Default::default()
        };
        let split = config.capital_split(dec!(10000));
        assert_eq!(split.get(&StrategyKind::Momentum), Some(&dec!(5000)));
        assert_eq!(split.get(&StrategyKind::MaCross), Some(&dec!(5000)));
        let total: Decimal = split.values().copied().sum();
        assert_eq!(total, dec!(10000));
    }

    #[test]
    fn test_capital_split_with_no_positive_weights_is_empty() {
        let config = EngineConfig {
            strategy_weights: vec![(StrategyKind::Momentum, dec!(0))],
            ..Default::default()
        };
        assert!(config.capital_split(dec!(10000)).is_empty());
    }
}
