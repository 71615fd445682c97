//! Tradeable-day calendar.
//!
//! # Design
//!
//! [`CalendarService`] owns a per-exchange holiday set loaded from a
//! [`HolidaySource`]. A day is tradeable when it is a weekday and not a
//! holiday of the exchange in question. Quarter counts ([`TradingPeriod`])
//! are derived once and reused by every client's accrual for that quarter;
//! the cache is only dropped by [`CalendarService::refresh`].

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Serialize;
use tracing::{debug, info};

use crate::normalize_exchange;
use crate::source::HolidaySource;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    /// Quarter number outside 1..=4.
    InvalidQuarter { quarter: u8 },
    /// Year outside the range chrono can represent.
    InvalidYear { year: i32 },
    /// The holiday source failed to load.
    Source { detail: String },
}

impl std::fmt::Display for CalendarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQuarter { quarter } => {
                write!(f, "calendar: quarter must be 1..=4, got {quarter}")
            }
            Self::InvalidYear { year } => write!(f, "calendar: year {year} out of range"),
            Self::Source { detail } => write!(f, "calendar: holiday source failed: {detail}"),
        }
    }
}

impl std::error::Error for CalendarError {}

// ---------------------------------------------------------------------------
// TradingPeriod
// ---------------------------------------------------------------------------

/// Tradeable day count for one exchange quarter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TradingPeriod {
    pub exchange: String,
    pub year: i32,
    pub quarter: u8,
    pub tradeable_days: u32,
}

/// Inclusive first/last calendar day of a quarter.
pub fn quarter_bounds(year: i32, quarter: u8) -> Result<(NaiveDate, NaiveDate), CalendarError> {
    if !(1..=4).contains(&quarter) {
        return Err(CalendarError::InvalidQuarter { quarter });
    }
    let first_month = 3 * (u32::from(quarter) - 1) + 1;
    let start = NaiveDate::from_ymd_opt(year, first_month, 1)
        .ok_or(CalendarError::InvalidYear { year })?;
    let next_start = if quarter == 4 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, first_month + 3, 1)
    }
    .ok_or(CalendarError::InvalidYear { year })?;
    Ok((start, next_start - Duration::days(1)))
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

// ---------------------------------------------------------------------------
// CalendarService
// ---------------------------------------------------------------------------

type QuarterKey = (String, i32, u8);

pub struct CalendarService {
    source: Box<dyn HolidaySource>,
    holidays: RwLock<HashMap<String, BTreeSet<NaiveDate>>>,
    quarter_cache: RwLock<HashMap<QuarterKey, u32>>,
}

impl std::fmt::Debug for CalendarService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let holidays = self.holidays.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("CalendarService")
            .field("exchanges", &holidays.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CalendarService {
    /// Build a calendar and load the holiday set once.
    pub fn new<S: HolidaySource + 'static>(source: S) -> Result<Self, CalendarError> {
        let svc = Self {
            source: Box::new(source),
            holidays: RwLock::new(HashMap::new()),
            quarter_cache: RwLock::new(HashMap::new()),
        };
        svc.refresh()?;
        Ok(svc)
    }

    /// Reload holidays from the source and drop every cached quarter count.
    ///
    /// On source failure the previous holiday set and cache are kept.
    pub fn refresh(&self) -> Result<(), CalendarError> {
        let loaded = self.source.load().map_err(|e| CalendarError::Source {
            detail: format!("{e:#}"),
        })?;

        let mut by_exchange: HashMap<String, BTreeSet<NaiveDate>> = HashMap::new();
        for h in loaded {
            by_exchange
                .entry(normalize_exchange(&h.exchange))
                .or_default()
                .insert(h.date);
        }
        let total: usize = by_exchange.values().map(BTreeSet::len).sum();

        *self.holidays.write().unwrap_or_else(PoisonError::into_inner) = by_exchange;
        self.quarter_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        info!(holidays = total, "calendar refreshed");
        Ok(())
    }

    pub fn is_holiday(&self, exchange: &str, date: NaiveDate) -> bool {
        let holidays = self.holidays.read().unwrap_or_else(PoisonError::into_inner);
        holidays
            .get(&normalize_exchange(exchange))
            .map(|set| set.contains(&date))
            .unwrap_or(false)
    }

    /// Weekday and not an exchange holiday.
    pub fn is_trading_day(&self, exchange: &str, date: NaiveDate) -> bool {
        !is_weekend(date) && !self.is_holiday(exchange, date)
    }

    /// Tradeable days in the inclusive range `from..=to`. Empty range -> 0.
    pub fn tradeable_days_between(&self, exchange: &str, from: NaiveDate, to: NaiveDate) -> u32 {
        if from > to {
            return 0;
        }
        let holidays = self.holidays.read().unwrap_or_else(PoisonError::into_inner);
        let set = holidays.get(&normalize_exchange(exchange));

        let mut count = 0u32;
        for day in from.iter_days().take_while(|d| *d <= to) {
            if is_weekend(day) {
                continue;
            }
            if set.map(|s| s.contains(&day)).unwrap_or(false) {
                continue;
            }
            count += 1;
        }
        count
    }

    /// Tradeable days in a calendar quarter (cached per exchange/year/quarter).
    pub fn tradeable_days_in_quarter(
        &self,
        exchange: &str,
        year: i32,
        quarter: u8,
    ) -> Result<u32, CalendarError> {
        let key = (normalize_exchange(exchange), year, quarter);
        if let Some(days) = self
            .quarter_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(*days);
        }

        let (start, end) = quarter_bounds(year, quarter)?;
        let days = self.tradeable_days_between(&key.0, start, end);
        debug!(exchange = %key.0, year, quarter, days, "quarter tradeable days computed");

        self.quarter_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, days);
        Ok(days)
    }

    pub fn trading_period(
        &self,
        exchange: &str,
        year: i32,
        quarter: u8,
    ) -> Result<TradingPeriod, CalendarError> {
        let tradeable_days = self.tradeable_days_in_quarter(exchange, year, quarter)?;
        Ok(TradingPeriod {
            exchange: normalize_exchange(exchange),
            year,
            quarter,
            tradeable_days,
        })
    }

    /// Number of cached quarter counts (diagnostics/tests).
    pub fn cached_quarters(&self) -> usize {
        self.quarter_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
