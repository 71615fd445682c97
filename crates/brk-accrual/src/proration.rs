//! Pro-rated fee arithmetic.
//!
//! `fee = position_value * rate / 100 * holding_days / total_days`
//!
//! Computed in i128 on raw micros and rounded half away from zero, once, at
//! the end. No floating point anywhere.

use std::fmt;
use std::str::FromStr;

use brk_ledger::{BrokerageError, Micros, RatePct, MICROS_SCALE};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// How holding days and period length are counted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayCountBasis {
    /// Every calendar day counts.
    #[default]
    Calendar,
    /// Only exchange trading days count (weekends and holidays excluded).
    Tradeable,
}

impl DayCountBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayCountBasis::Calendar => "calendar",
            DayCountBasis::Tradeable => "tradeable",
        }
    }
}

impl fmt::Display for DayCountBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DayCountBasis {
    type Err = BrokerageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "calendar" => Ok(DayCountBasis::Calendar),
            "tradeable" | "trading" => Ok(DayCountBasis::Tradeable),
            other => Err(BrokerageError::InvalidPeriod {
                detail: format!("unknown day count basis {other:?}"),
            }),
        }
    }
}

/// Calendar days in `from..=to`; 0 for an inverted range.
pub fn inclusive_days(from: NaiveDate, to: NaiveDate) -> i64 {
    if from > to {
        0
    } else {
        (to - from).num_days() + 1
    }
}

/// Pro-rated fee for one position. Zero when `total_days <= 0`.
pub fn prorated_fee(
    position_value: Micros,
    rate: RatePct,
    holding_days: i64,
    total_days: i64,
) -> Micros {
    if total_days <= 0 || holding_days <= 0 {
        return Micros::ZERO;
    }
    let num = i128::from(position_value.raw())
        * i128::from(rate.raw())
        * i128::from(holding_days);
    let den = 100_i128 * i128::from(MICROS_SCALE) * i128::from(total_days);

    let half = den / 2;
    let q = if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    };
    Micros::new(q.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64)
}

/// Audit string stored with each detail row.
pub fn formula(
    position_value: Micros,
    rate: RatePct,
    holding_days: i64,
    total_days: i64,
    fee: Micros,
) -> String {
    format!("{position_value} x {rate}% x {holding_days}/{total_days} days = {fee}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    #[test]
    fn full_period_charges_full_rate() {
        let fee = prorated_fee(Micros::from_units(1_000), RatePct::from_percent(10), 30, 30);
        assert_eq!(fee, Micros::from_units(100));
    }

    #[test]
    fn partial_period_rounds_half_up_to_micros() {
        // 400 * 10% * 16/30 = 21.3333333...
        let fee = prorated_fee(Micros::from_units(400), RatePct::from_percent(10), 16, 30);
        assert_eq!(fee, Micros::new(21_333_333));

        // 1 * 10% * 1/16 = 0.00625 exactly
        let fee = prorated_fee(Micros::from_units(1), RatePct::from_percent(10), 1, 16);
        assert_eq!(fee, Micros::new(6_250));

        // 0.000005 * 10% = 0.0000005 -> rounds up to 0.000001
        let fee = prorated_fee(Micros::new(5), RatePct::from_percent(10), 1, 1);
        assert_eq!(fee, Micros::new(1));
    }

    #[test]
    fn zero_days_is_zero_fee() {
        assert_eq!(
            prorated_fee(Micros::from_units(1_000), RatePct::from_percent(10), 0, 30),
            Micros::ZERO
        );
        assert_eq!(
            prorated_fee(Micros::from_units(1_000), RatePct::from_percent(10), 5, 0),
            Micros::ZERO
        );
    }

    #[test]
    fn large_values_do_not_overflow() {
        // 10 billion rupees at 2.5% for a full year.
        let fee = prorated_fee(
            Micros::from_units(10_000_000_000),
            RatePct::parse("2.5").unwrap(),
            366,
            366,
        );
        assert_eq!(fee, Micros::from_units(250_000_000));
    }

    #[test]
    fn inclusive_day_counts() {
        assert_eq!(inclusive_days(d(1, 1), d(1, 16)), 16);
        assert_eq!(inclusive_days(d(1, 16), d(1, 16)), 1);
        assert_eq!(inclusive_days(d(1, 17), d(1, 16)), 0);
    }

    #[test]
    fn basis_parses() {
        assert_eq!("Calendar".parse::<DayCountBasis>().unwrap(), DayCountBasis::Calendar);
        assert_eq!("tradeable".parse::<DayCountBasis>().unwrap(), DayCountBasis::Tradeable);
        assert!("weekly".parse::<DayCountBasis>().is_err());
    }

    #[test]
    fn formula_is_readable() {
        let s = formula(
            Micros::from_units(400),
            RatePct::from_percent(10),
            16,
            30,
            Micros::new(21_333_333),
        );
        assert_eq!(s, "400.000000 x 10.000000% x 16/30 days = 21.333333");
    }
}
