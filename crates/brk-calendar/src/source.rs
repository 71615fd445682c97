//! Holiday sources feeding [`CalendarService`](crate::CalendarService).

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::normalize_exchange;

/// One exchange holiday.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Holiday {
    pub exchange: String,
    pub date: NaiveDate,
    pub description: String,
}

impl Holiday {
    pub fn new<E: AsRef<str>, D: Into<String>>(exchange: E, date: NaiveDate, description: D) -> Self {
        Self {
            exchange: normalize_exchange(exchange.as_ref()),
            date,
            description: description.into(),
        }
    }
}

/// Anything that can produce the full holiday list.
///
/// Called once at construction and again on every
/// [`CalendarService::refresh`](crate::CalendarService::refresh).
pub trait HolidaySource: Send + Sync {
    fn load(&self) -> Result<Vec<Holiday>>;
}

/// Fixed in-memory holiday list.
#[derive(Clone, Debug, Default)]
pub struct StaticHolidays {
    holidays: Vec<Holiday>,
}

impl StaticHolidays {
    pub fn new(holidays: Vec<Holiday>) -> Self {
        Self { holidays }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl HolidaySource for StaticHolidays {
    fn load(&self) -> Result<Vec<Holiday>> {
        Ok(self.holidays.clone())
    }
}

/// CSV holiday file with header `exchange,date,description`.
///
/// `date` is ISO `YYYY-MM-DD`; `description` may be empty.
#[derive(Clone, Debug)]
pub struct CsvHolidayFile {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct HolidayRecord {
    exchange: String,
    date: String,
    #[serde(default)]
    description: Option<String>,
}

impl CsvHolidayFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl HolidaySource for CsvHolidayFile {
    fn load(&self) -> Result<Vec<Holiday>> {
        let mut rdr = csv::Reader::from_path(&self.path)
            .with_context(|| format!("open holiday csv: {}", self.path.display()))?;

        let mut out = Vec::new();
        for (idx, rec) in rdr.deserialize::<HolidayRecord>().enumerate() {
            // header is line 1
            let line = idx + 2;
            let rec = rec.with_context(|| format!("holiday csv line {line}"))?;
            if rec.exchange.trim().is_empty() {
                return Err(anyhow!("holiday csv line {line}: empty exchange"));
            }
            let date = NaiveDate::parse_from_str(rec.date.trim(), "%Y-%m-%d")
                .with_context(|| format!("holiday csv line {line}: bad date {:?}", rec.date))?;
            out.push(Holiday::new(
                &rec.exchange,
                date,
                rec.description.unwrap_or_default(),
            ));
        }
        Ok(out)
    }
}
