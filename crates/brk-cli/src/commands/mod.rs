//! Command handler modules for brk-cli.
//!
//! Shared wiring (config, database, calendar) lives here.
//! Command-specific logic lives in the submodules.

pub mod accrual;
pub mod calendar;
pub mod trade;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use brk_accrual::{AccrualConfig, AccrualEngine, BulkOptions, DayCountBasis};
use brk_calendar::{CalendarService, CsvHolidayFile, StaticHolidays};
use brk_config::{report_unused_keys, EngineConfig, UnusedKeyPolicy};
use brk_db::{PgDirectory, PgStore};
use brk_ledger::{Micros, RatePct, TradeLedger};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::warn;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Load layered config. No paths means built-in defaults.
pub fn load_engine_config(paths: &[String]) -> Result<EngineConfig> {
    if paths.is_empty() {
        return Ok(EngineConfig::default());
    }
    let loaded = brk_config::load_layered_yaml(paths)?;
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    for ptr in &report.unused_leaf_pointers {
        warn!(pointer = %ptr, "config key is not used");
    }
    loaded.engine()
}

pub fn accrual_config(cfg: &EngineConfig) -> Result<AccrualConfig> {
    let default_rate = RatePct::parse(&cfg.accrual.rate_percent)
        .map_err(|e| anyhow!("invalid /accrual/rate_percent: {e}"))?;
    let basis: DayCountBasis = cfg.accrual.day_count_basis.parse()?;
    Ok(AccrualConfig {
        default_rate,
        basis,
    })
}

pub fn bulk_options(cfg: &EngineConfig) -> BulkOptions {
    BulkOptions {
        workers: cfg.accrual.workers,
        write_batch_size: cfg.accrual.write_batch_size,
    }
}

pub fn build_calendar(cfg: &EngineConfig) -> Result<Arc<CalendarService>> {
    let svc = match cfg.calendar.holidays_csv.as_deref() {
        Some(path) => CalendarService::new(CsvHolidayFile::new(path))?,
        None => CalendarService::new(StaticHolidays::empty())?,
    };
    Ok(Arc::new(svc))
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// Ledger + accrual engine over one Postgres pool.
pub struct Services {
    pub ledger: TradeLedger<PgStore>,
    pub engine: Arc<AccrualEngine<PgStore>>,
    pub bulk: BulkOptions,
}

impl Services {
    pub async fn connect(cfg: &EngineConfig) -> Result<Self> {
        let db = brk_config::resolve_database_url(cfg)?;
        let pool = brk_db::connect(&db.url, db.max_connections).await?;

        let store = PgStore::new(pool.clone());
        let directory = Arc::new(PgDirectory::new(pool));
        let calendar = build_calendar(cfg)?;

        let ledger = TradeLedger::new(store.clone(), directory.clone(), directory.clone());
        let engine = AccrualEngine::new(
            store,
            directory.clone(),
            directory,
            calendar,
            accrual_config(cfg)?,
        );

        Ok(Self {
            ledger,
            engine: Arc::new(engine),
            bulk: bulk_options(cfg),
        })
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub fn parse_date(flag: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid --{flag} '{raw}'. expected YYYY-MM-DD"))
}

pub fn parse_micros(flag: &str, raw: &str) -> Result<Micros> {
    Micros::parse(raw).map_err(|e| anyhow!("invalid --{flag} '{raw}': {e}"))
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{s}");
    Ok(())
}
