//! Typed engine configuration.
//!
//! Every key has a default, so an empty config is valid. Values that need
//! domain types (rate, day-count basis) stay strings here and are parsed by
//! the binary that wires the engine.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::secrets::DEFAULT_DATABASE_URL_ENV;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccrualSection {
    /// Annual percentage as a decimal string ("10", "2.5").
    pub rate_percent: String,
    /// `calendar` or `tradeable`.
    pub day_count_basis: String,
    pub workers: usize,
    pub write_batch_size: usize,
}

impl Default for AccrualSection {
    fn default() -> Self {
        Self {
            rate_percent: "10".to_string(),
            day_count_basis: "calendar".to_string(),
            workers: 10,
            write_batch_size: 50,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarSection {
    /// `exchange,date,description` file; no holidays when absent.
    pub holidays_csv: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// NAME of the env var holding the connection URL.
    pub url_env: String,
    pub max_connections: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url_env: DEFAULT_DATABASE_URL_ENV.to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub accrual: AccrualSection,
    pub calendar: CalendarSection,
    pub database: DatabaseSection,
}

impl EngineConfig {
    pub fn from_json(config_json: &Value) -> Result<Self> {
        let cfg: EngineConfig =
            serde_json::from_value(config_json.clone()).context("invalid engine config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.accrual.workers == 0 {
            bail!("CONFIG_INVALID /accrual/workers must be >= 1");
        }
        if self.accrual.write_batch_size == 0 {
            bail!("CONFIG_INVALID /accrual/write_batch_size must be >= 1");
        }
        if self.database.max_connections == 0 {
            bail!("CONFIG_INVALID /database/max_connections must be >= 1");
        }
        if !is_plain_decimal(&self.accrual.rate_percent) {
            bail!(
                "CONFIG_INVALID /accrual/rate_percent must be a non-negative decimal \
                 with at most 6 fractional digits, got {:?}",
                self.accrual.rate_percent
            );
        }
        match self.accrual.day_count_basis.trim().to_ascii_lowercase().as_str() {
            "calendar" | "tradeable" => {}
            other => bail!(
                "CONFIG_INVALID /accrual/day_count_basis must be calendar|tradeable, got {other:?}"
            ),
        }
        if self.database.url_env.trim().is_empty() {
            bail!("CONFIG_INVALID /database/url_env must name an env var");
        }
        Ok(())
    }
}

fn is_plain_decimal(s: &str) -> bool {
    let s = s.trim();
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };
    !int_part.is_empty()
        && int_part.chars().all(|c| c.is_ascii_digit())
        && frac_part.len() <= 6
        && frac_part.chars().all(|c| c.is_ascii_digit())
}
