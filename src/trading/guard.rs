//! Intraday drawdown guard.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::warn;

/// Blocks new entries once equity has fallen too far below the day's
/// opening equity. Anchored to the UTC calendar day; exits are never
/// blocked by a halt, only entries.
#[derive(Debug, Clone)]
pub struct DailyGuard {
    max_daily_drawdown_pct: Decimal,
    anchor_day: Option<NaiveDate>,
    day_start_equity: Decimal,
    halted: bool,
}

impl DailyGuard {
    pub fn new(max_daily_drawdown_pct: Decimal) -> Self {
        Self {
            max_daily_drawdown_pct,
            anchor_day: None,
            day_start_equity: Decimal::ZERO,
            halted: false,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn day_start_equity(&self) -> Decimal {
        self.day_start_equity
    }

    /// Check current equity against the day anchor. Returns true when new
    /// entries must be blocked for the rest of the UTC day.
    ///
    /// The first call of each day records the anchor and always passes.
    /// Once tripped, the halt is sticky until the day rolls over. Always
    /// passes when the drawdown limit is disabled (<= 0).
    pub fn check(&mut self, now: DateTime<Utc>, equity: Decimal) -> bool {
        if self.max_daily_drawdown_pct <= Decimal::ZERO {
            return false;
        }

        let today = now.date_naive();
        if self.anchor_day != Some(today) {
            self.anchor_day = Some(today);
            self.day_start_equity = equity;
            self.halted = false;
            return false;
        }

        if self.halted {
            return true;
        }

        let floor = self.day_start_equity * (Decimal::ONE - self.max_daily_drawdown_pct);
        if equity <= floor {
            self.halted = true;
            warn!(
                %equity,
                day_start = %self.day_start_equity,
                %floor,
                "daily drawdown limit hit, halting new entries until UTC day rollover"
            );
        }
        self.halted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_first_check_of_day_anchors_and_passes() {
        let mut guard = DailyGuard::new(dec!(0.05));
        assert!(!guard.check(at(1, 0), dec!(1000)));
        assert_eq!(guard.day_start_equity(), dec!(1000));
    }

    #[test]
    fn test_halts_at_or_below_floor() {
        let mut guard = DailyGuard::new(dec!(0.05));
        guard.check(at(1, 0), dec!(1000));
        assert!(!guard.check(at(1, 1), dec!(960)));
        // Boundary inclusive: exactly the floor halts.
        assert!(guard.check(at(1, 2), dec!(950)));
    }

    #[test]
    fn test_halt_is_sticky_for_the_day() {
        let mut guard = DailyGuard::new(dec!(0.05));
        guard.check(at(1, 0), dec!(1000));
        assert!(guard.check(at(1, 1), dec!(900)));
        // Recovery does not clear the halt same-day.
        assert!(guard.check(at(1, 2), dec!(1100)));
    }

    #[test]
    fn test_day_rollover_resets() {
        let mut guard = DailyGuard::new(dec!(0.05));
        guard.check(at(1, 0), dec!(1000));
        assert!(guard.check(at(1, 1), dec!(900)));

        // New UTC day: re-anchor at the lower equity, pass again.
        assert!(!guard.check(at(2, 0), dec!(900)));
        assert_eq!(guard.day_start_equity(), dec!(900));
        assert!(!guard.check(at(2, 1), dec!(870)));
        assert!(guard.check(at(2, 2), dec!(850)));
    }

    #[test]
    fn test_disabled_limit_never_halts() {
        let mut guard = DailyGuard::new(dec!(0));
        guard.check(at(1, 0), dec!(1000));
        assert!(!guard.check(at(1, 1), dec!(1)));
    }
}
