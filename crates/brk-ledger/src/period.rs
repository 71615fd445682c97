//! Accrual period buckets.
//!
//! A [`PeriodKey`] names a bucket (`2024-01`, `2024-Q1`, `2024-01-15`) and is
//! what gets stored on a locked trade and on a calculation row. An
//! [`AccrualPeriod`] is a validated key resolved to inclusive start/end
//! dates; it can only be obtained through the checked constructors.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::BrokerageError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PeriodKey {
    Month { year: i32, month: u32 },
    Quarter { year: i32, quarter: u8 },
    Day(NaiveDate),
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodKey::Month { year, month } => write!(f, "{year:04}-{month:02}"),
            PeriodKey::Quarter { year, quarter } => write!(f, "{year:04}-Q{quarter}"),
            PeriodKey::Day(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

impl FromStr for PeriodKey {
    type Err = BrokerageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccrualPeriod::parse(s).map(|p| p.key())
    }
}

fn invalid(detail: impl Into<String>) -> BrokerageError {
    BrokerageError::InvalidPeriod {
        detail: detail.into(),
    }
}

/// A validated period with inclusive bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AccrualPeriod {
    key: PeriodKey,
    start: NaiveDate,
    end: NaiveDate,
}

impl AccrualPeriod {
    pub fn month(year: i32, month: u32) -> Result<Self, BrokerageError> {
        if !(1..=12).contains(&month) {
            return Err(invalid(format!("month must be 1..=12, got {month}")));
        }
        let start = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| invalid(format!("year {year} out of range")))?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .ok_or_else(|| invalid(format!("year {year} out of range")))?;
        Ok(Self {
            key: PeriodKey::Month { year, month },
            start,
            end: next - Duration::days(1),
        })
    }

    pub fn quarter(year: i32, quarter: u8) -> Result<Self, BrokerageError> {
        let (start, end) = brk_calendar::quarter_bounds(year, quarter)?;
        Ok(Self {
            key: PeriodKey::Quarter { year, quarter },
            start,
            end,
        })
    }

    pub fn day(date: NaiveDate) -> Self {
        Self {
            key: PeriodKey::Day(date),
            start: date,
            end: date,
        }
    }

    pub fn from_key(key: PeriodKey) -> Result<Self, BrokerageError> {
        match key {
            PeriodKey::Month { year, month } => Self::month(year, month),
            PeriodKey::Quarter { year, quarter } => Self::quarter(year, quarter),
            PeriodKey::Day(date) => Ok(Self::day(date)),
        }
    }

    /// Parse `YYYY-MM`, `YYYY-Qn` or `YYYY-MM-DD`.
    pub fn parse(s: &str) -> Result<Self, BrokerageError> {
        let s = s.trim();
        let (year_part, rest) = s
            .split_once('-')
            .ok_or_else(|| invalid(format!("unrecognised period {s:?}")))?;
        if year_part.len() != 4 || !year_part.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid(format!("bad year in period {s:?}")));
        }
        let year: i32 = year_part
            .parse()
            .map_err(|_| invalid(format!("bad year in period {s:?}")))?;

        if let Some(q) = rest.strip_prefix('Q').or_else(|| rest.strip_prefix('q')) {
            let quarter: u8 = q
                .parse()
                .map_err(|_| invalid(format!("bad quarter in period {s:?}")))?;
            return Self::quarter(year, quarter);
        }

        match rest.split_once('-') {
            None => {
                if rest.len() != 2 {
                    return Err(invalid(format!("bad month in period {s:?}")));
                }
                let month: u32 = rest
                    .parse()
                    .map_err(|_| invalid(format!("bad month in period {s:?}")))?;
                Self::month(year, month)
            }
            Some(_) => {
                let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map_err(|_| invalid(format!("bad date in period {s:?}")))?;
                Ok(Self::day(date))
            }
        }
    }

    pub fn key(&self) -> PeriodKey {
        self.key
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Calendar days in the period, both ends inclusive.
    pub fn calendar_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// `(year, quarter)` when this is a quarter bucket.
    pub fn as_quarter(&self) -> Option<(i32, u8)> {
        match self.key {
            PeriodKey::Quarter { year, quarter } => Some((year, quarter)),
            _ => None,
        }
    }

    /// The month bucket containing `date`.
    pub fn month_of(date: NaiveDate) -> Result<Self, BrokerageError> {
        Self::month(date.year(), date.month())
    }
}

impl fmt::Display for AccrualPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}
