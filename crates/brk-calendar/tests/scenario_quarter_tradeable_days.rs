//! Scenario: quarter tradeable-day counts over an exchange holiday file.
//!
//! Reference weekday counts (no holidays):
//!   2024 Q1 = 65, Q2 = 65, Q3 = 66, Q4 = 66
//!
//! NSE 2024 Q1 holidays used here:
//!   2024-01-26 Fri  Republic Day
//!   2024-01-27 Sat  (weekend; must not be subtracted twice)
//!   2024-03-08 Fri  Mahashivratri
//!   2024-03-25 Mon  Holi
//!   2024-03-29 Fri  Good Friday
//!   => 65 - 4 = 61

use std::io::Write;

use brk_calendar::{CalendarService, CsvHolidayFile, Holiday, StaticHolidays};
use chrono::NaiveDate;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn write_nse_q1(f: &mut tempfile::NamedTempFile) {
    writeln!(f, "exchange,date,description").unwrap();
    writeln!(f, "NSE,2024-01-26,Republic Day").unwrap();
    writeln!(f, "NSE,2024-01-27,Weekend entry").unwrap();
    writeln!(f, "NSE,2024-03-08,Mahashivratri").unwrap();
    writeln!(f, "NSE,2024-03-25,Holi").unwrap();
    writeln!(f, "NSE,2024-03-29,Good Friday").unwrap();
    f.flush().unwrap();
}

#[test]
fn weekday_counts_per_quarter_without_holidays() {
    let cal = CalendarService::new(StaticHolidays::empty()).unwrap();
    let counts: Vec<u32> = (1..=4)
        .map(|q| cal.tradeable_days_in_quarter("NSE", 2024, q).unwrap())
        .collect();
    assert_eq!(counts, vec![65, 65, 66, 66]);
}

#[test]
fn csv_holidays_reduce_quarter_count() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    write_nse_q1(&mut f);

    let cal = CalendarService::new(CsvHolidayFile::new(f.path())).unwrap();
    let tp = cal.trading_period("nse", 2024, 1).unwrap();
    assert_eq!(tp.exchange, "NSE");
    assert_eq!(tp.tradeable_days, 61);

    // Another exchange with no holidays listed keeps the weekday count.
    assert_eq!(cal.tradeable_days_in_quarter("BSE", 2024, 1).unwrap(), 65);
}

#[test]
fn refresh_drops_cached_counts() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(f, "exchange,date,description").unwrap();
    f.flush().unwrap();

    let cal = CalendarService::new(CsvHolidayFile::new(f.path())).unwrap();
    assert_eq!(cal.tradeable_days_in_quarter("NSE", 2024, 1).unwrap(), 65);
    assert_eq!(cal.cached_quarters(), 1);

    // Administrative update of the holiday file.
    let mut f2 = std::fs::OpenOptions::new()
        .append(true)
        .open(f.path())
        .unwrap();
    writeln!(f2, "NSE,2024-01-26,Republic Day").unwrap();
    f2.flush().unwrap();

    // Stale until refreshed.
    assert_eq!(cal.tradeable_days_in_quarter("NSE", 2024, 1).unwrap(), 65);

    cal.refresh().unwrap();
    assert_eq!(cal.cached_quarters(), 0);
    assert_eq!(cal.tradeable_days_in_quarter("NSE", 2024, 1).unwrap(), 64);
}

#[test]
fn range_count_matches_holiday_set() {
    let cal = CalendarService::new(StaticHolidays::new(vec![Holiday::new(
        "NSE",
        d(2024, 1, 26),
        "Republic Day",
    )]))
    .unwrap();
    // Mon 2024-01-22 .. Sun 2024-01-28: five weekdays, one holiday.
    assert_eq!(cal.tradeable_days_between("NSE", d(2024, 1, 22), d(2024, 1, 28)), 4);
}
