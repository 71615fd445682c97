//! brk-calendar
//!
//! Exchange trading calendar for brokerage accrual.
//! - Weekends are never tradeable
//! - Holidays come from a pluggable source (static list or CSV file)
//! - Quarter day counts are cached until the calendar is refreshed
//!
//! Pure deterministic logic over a holiday set. No wall-clock.

mod calendar;
mod source;

pub use calendar::{quarter_bounds, CalendarError, CalendarService, TradingPeriod};
pub use source::{CsvHolidayFile, Holiday, HolidaySource, StaticHolidays};

/// Normalize an exchange code for lookups ("nse " -> "NSE").
pub fn normalize_exchange(exchange: &str) -> String {
    exchange.trim().to_ascii_uppercase()
}
