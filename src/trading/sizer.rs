//! Position sizing under risk, allocation, and exchange constraints.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::trading::config::RiskConfig;

/// Exchange-imposed order constraints for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolFilters {
    /// Quantity granularity; quantities are truncated to a multiple
    pub step_size: Decimal,

    /// Smallest tradable quantity
    pub min_qty: Decimal,

    /// Smallest tradable notional (`price * qty`)
    pub min_notional: Decimal,
}

impl Default for SymbolFilters {
    fn default() -> Self {
        Self {
            step_size: Decimal::new(1, 5), // 0.00001
            min_qty: Decimal::new(1, 5),
            min_notional: Decimal::new(10, 0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskSizer {
    config: RiskConfig,
}

impl RiskSizer {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Stop-loss and take-profit prices for a long entry.
    pub fn compute_sl_tp(
        entry_price: Decimal,
        sl_pct: Decimal,
        tp_pct: Decimal,
    ) -> (Decimal, Decimal) {
        let sl_price = entry_price * (Decimal::ONE - sl_pct);
        let tp_price = entry_price * (Decimal::ONE + tp_pct);
        (sl_price, tp_price)
    }

    /// Order quantity for a long entry. Returns zero for "do not enter".
    ///
    /// The quantity is the lesser of the risk-based size (risk budget
    /// divided by distance to stop) and the allocation cap, shrunk if the
    /// fee-inclusive cost would exceed the balance, then truncated to the
    /// exchange step. The result never costs more than `balance` at
    /// `entry_price` including the fee.
    pub fn compute_quantity(
        &self,
        balance: Decimal,
        entry_price: Decimal,
        stop_price: Decimal,
        fee_pct: Decimal,
        filters: &SymbolFilters,
    ) -> Decimal {
        if balance <= Decimal::ZERO || entry_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let risk_amount = balance * self.config.risk_per_trade_pct;
        let risk_per_unit = (entry_price - stop_price).abs();

        // A zero stop distance means risk does not bound the size.
        let qty_by_risk = if risk_per_unit > Decimal::ZERO {
            risk_amount / risk_per_unit
        } else {
            Decimal::MAX
        };
        let qty_by_alloc = (balance * self.config.allocation_pct) / entry_price;
        let mut qty = qty_by_risk.min(qty_by_alloc);

        let unit_cost = entry_price * (Decimal::ONE + fee_pct);
        if qty * unit_cost > balance {
            qty = balance / unit_cost;
        }

        qty = truncate_to_step(qty, filters.step_size);

        if qty < filters.min_qty || entry_price * qty < filters.min_notional {
            return Decimal::ZERO;
        }
        qty
    }
}

/// Truncate toward zero to a multiple of `step`; never rounds up.
pub fn truncate_to_step(qty: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return qty;
    }
    (qty / step).floor() * step
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sizer() -> RiskSizer {
        RiskSizer::new(RiskConfig::default())
    }

    fn filters() -> SymbolFilters {
        SymbolFilters {
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            min_notional: dec!(10),
        }
    }

    #[test]
    fn test_sl_tp_from_entry() {
        let (sl, tp) = RiskSizer::compute_sl_tp(dec!(100), dec!(0.02), dec!(0.05));
        assert_eq!(sl, dec!(98));
        assert_eq!(tp, dec!(105));
    }

    #[test]
    fn test_risk_cap_binds_on_wide_stop() {
        // balance 10000, risk 1% = 100, stop distance 10 -> 10 by risk;
        // allocation 10% = 1000 / 100 = 10 by alloc. Equal caps.
        let qty = sizer().compute_quantity(
            dec!(10000),
            dec!(100),
            dec!(90),
            dec!(0),
            &filters(),
        );
        assert_eq!(qty, dec!(10));
    }

    #[test]
    fn test_allocation_cap_binds_on_tight_stop() {
        // Stop distance 0.1 -> risk allows 1000 units; allocation caps at 10.
        let qty = sizer().compute_quantity(
            dec!(10000),
            dec!(100),
            dec!(99.9),
            dec!(0),
            &filters(),
        );
        assert_eq!(qty, dec!(10));
    }

    #[test]
    fn test_zero_stop_distance_falls_to_allocation() {
        let qty = sizer().compute_quantity(
            dec!(10000),
            dec!(100),
            dec!(100),
            dec!(0),
            &filters(),
        );
        assert_eq!(qty, dec!(10));
    }

    #[test]
    fn test_affordability_never_exceeds_balance() {
        let config = RiskConfig {
            allocation_pct: dec!(1.0),
            risk_per_trade_pct: dec!(1.0),
            ..Default::default()
        };
        let sizer = RiskSizer::new(config);
        let balance = dec!(1000);
        let fee = dec!(0.0004);
        let qty = sizer.compute_quantity(balance, dec!(100), dec!(99), fee, &filters());
        assert!(qty > Decimal::ZERO);
        assert!(qty * dec!(100) * (Decimal::ONE + fee) <= balance);
    }

    #[test]
    fn test_truncates_to_step_never_up() {
        let filters = SymbolFilters {
            step_size: dec!(0.01),
            min_qty: dec!(0.01),
            min_notional: dec!(1),
        };
        // Allocation: 10000 * 0.10 / 97 = 10.309...; risk: 100/3 = 33.3
        let qty = sizer().compute_quantity(
            dec!(10000),
            dec!(97),
            dec!(94),
            dec!(0),
            &filters,
        );
        assert_eq!(qty, dec!(10.30));
    }

    #[test]
    fn test_below_min_notional_rejects() {
        let filters = SymbolFilters {
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            min_notional: dec!(10000),
        };
        let qty = sizer().compute_quantity(
            dec!(10000),
            dec!(100),
            dec!(98),
            dec!(0),
            &filters,
        );
        assert_eq!(qty, Decimal::ZERO);
    }

    #[test]
    fn test_below_min_qty_rejects() {
        let filters = SymbolFilters {
            step_size: dec!(1),
            min_qty: dec!(1),
            min_notional: dec!(0),
        };
        // Allocation: 100 * 0.10 / 50 = 0.2, truncates to 0.
        let qty = sizer().compute_quantity(dec!(100), dec!(50), dec!(49), dec!(0), &filters);
        assert_eq!(qty, Decimal::ZERO);
    }

    #[test]
    fn test_zero_balance_rejects() {
        let qty = sizer().compute_quantity(dec!(0), dec!(100), dec!(98), dec!(0), &filters());
        assert_eq!(qty, Decimal::ZERO);
    }
}
