//! Entry signals and filter gates.
//!
//! Pure functions over an ordered close-price window, most recent last.
//! Signals fail closed on short data: momentum and MA-cross report "no
//! signal", enabled filters block the entry.

use crate::trading::config::SignalConfig;
use crate::trading::indicators;
use crate::models::StrategyKind;

#[derive(Debug, Clone)]
pub struct SignalEvaluator {
    config: SignalConfig,
}

impl SignalEvaluator {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    /// Combined entry decision for a strategy: its raw signal plus every
    /// enabled filter gate.
    pub fn entry_signal(&self, strategy: StrategyKind, closes: &[f64]) -> bool {
        let raw = match strategy {
            StrategyKind::Momentum => self.momentum(closes),
            StrategyKind::MaCross => self.ma_cross(closes),
        };
        raw && self.rsi_gate(closes) && self.macd_gate(closes)
    }

    /// Percent change from `lookback` bars ago to the latest close,
    /// boundary inclusive. A window too short to look back is "no signal".
    pub fn momentum(&self, closes: &[f64]) -> bool {
        let lookback = self.config.momentum_lookback;
        if closes.len() < lookback + 1 {
            return false;
        }
        let then = closes[closes.len() - 1 - lookback];
        let now = closes[closes.len() - 1];
        if then <= 0.0 {
            return false;
        }
        let change_pct = (now / then - 1.0) * 100.0;
        change_pct >= self.config.momentum_threshold_pct
    }

    /// Fast SMA strictly above slow SMA.
    pub fn ma_cross(&self, closes: &[f64]) -> bool {
        match (
            indicators::sma(closes, self.config.ma_fast),
            indicators::sma(closes, self.config.ma_slow),
        ) {
            (Some(fast), Some(slow)) => fast > slow,
            _ => false,
        }
    }

    /// RSI confirmation. Passes trivially when disabled; blocks when the
    /// indicator is undefined.
    pub fn rsi_gate(&self, closes: &[f64]) -> bool {
        if !self.config.rsi_filter_enabled {
            return true;
        }
        match indicators::rsi(closes, self.config.rsi_period) {
            Some(value) => value >= self.config.rsi_buy_threshold,
            None => false,
        }
    }

    /// MACD confirmation: MACD line above its signal line. Passes
    /// trivially when disabled; blocks when undefined.
    pub fn macd_gate(&self, closes: &[f64]) -> bool {
        if !self.config.macd_filter_enabled {
            return true;
        }
        match indicators::macd(
            closes,
            self.config.macd_fast,
            self.config.macd_slow,
            self.config.macd_signal,
        ) {
            Some((macd_line, signal_line)) => macd_line > signal_line,
            None => false,
        }
    }

    /// ATR as a fraction of the latest close, for the volatility gate.
    pub fn atr_pct(&self, highs: &[f64], lows: &[f64], closes: &[f64]) -> Option<f64> {
        let last = *closes.last()?;
        if last <= 0.0 {
            return None;
        }
        let atr = indicators::atr(highs, lows, closes, self.config.atr_period)?;
        Some(atr / last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator() -> SignalEvaluator {
        SignalEvaluator::new(SignalConfig::default())
    }

    fn bare_evaluator() -> SignalEvaluator {
        SignalEvaluator::new(SignalConfig {
            rsi_filter_enabled: false,
            macd_filter_enabled: false,
            ..Default::default()
        })
    }

    #[test]
    fn test_momentum_boundary_inclusive() {
        // Fifteen bars at 100, then 103: exactly a 3% move over the
        // 15-bar lookback fires the signal.
        let mut closes = vec![100.0; 15];
        closes.push(103.0);
        assert!(evaluator().momentum(&closes));
    }

    #[test]
    fn test_momentum_below_threshold() {
        let mut closes = vec![100.0; 15];
        closes.push(102.9);
        assert!(!evaluator().momentum(&closes));
    }

    #[test]
    fn test_momentum_short_window_is_no_signal() {
        let closes = vec![100.0, 103.0];
        assert!(!evaluator().momentum(&closes));
    }

    #[test]
    fn test_ma_cross_rising_market() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert!(evaluator().ma_cross(&closes));
    }

    #[test]
    fn test_ma_cross_falling_market() {
        let closes: Vec<f64> = (0..30).map(|i| 200.0 - i as f64).collect();
        assert!(!evaluator().ma_cross(&closes));
    }

    #[test]
    fn test_ma_cross_short_window_is_no_signal() {
        let closes = vec![100.0; 10];
        assert!(!evaluator().ma_cross(&closes));
    }

    #[test]
    fn test_disabled_gates_pass_trivially() {
        let eval = bare_evaluator();
        assert!(eval.rsi_gate(&[]));
        assert!(eval.macd_gate(&[]));
    }

    #[test]
    fn test_enabled_gates_block_on_short_data() {
        let eval = evaluator();
        assert!(!eval.rsi_gate(&[100.0, 101.0]));
        assert!(!eval.macd_gate(&[100.0, 101.0]));
    }

    #[test]
    fn test_rsi_gate_passes_in_strong_uptrend() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert!(evaluator().rsi_gate(&closes));
    }

    #[test]
    fn test_entry_signal_momentum_with_gates() {
        // Strong sustained uptrend: momentum, RSI, and MACD all agree.
        let closes: Vec<f64> = (0..60).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        assert!(evaluator().entry_signal(StrategyKind::Momentum, &closes));
    }

    #[test]
    fn test_atr_pct_undefined_on_short_data() {
        let xs = vec![100.0; 5];
        assert_eq!(evaluator().atr_pct(&xs, &xs, &xs), None);
    }

    #[test]
    fn test_atr_pct_value() {
        let eval = bare_evaluator();
        let highs = vec![101.0; 20];
        let lows: Vec<f64> = highs.iter().map(|h| h - 2.0).collect();
        let closes: Vec<f64> = highs.iter().map(|h| h - 1.0).collect();
        let pct = eval.atr_pct(&highs, &lows, &closes).expect("enough data");
        assert!((pct - 0.02).abs() < 1e-9);
    }
}
