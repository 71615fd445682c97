//! `brk calendar ...`

use anyhow::{bail, Result};
use brk_calendar::{normalize_exchange, CalendarService};
use serde_json::json;

use super::{parse_date, print_json};
use crate::CalendarCmd;

pub fn run(calendar: &CalendarService, cmd: CalendarCmd) -> Result<()> {
    match cmd {
        CalendarCmd::Days {
            exchange,
            from,
            to,
            year,
            quarter,
        } => match (from, to, year, quarter) {
            (Some(from), Some(to), None, None) => {
                let from = parse_date("from", &from)?;
                let to = parse_date("to", &to)?;
                let days = calendar.tradeable_days_between(&exchange, from, to);
                print_json(&json!({
                    "exchange": normalize_exchange(&exchange),
                    "from": from,
                    "to": to,
                    "tradeable_days": days,
                }))?;
            }
            (None, None, Some(year), Some(quarter)) => {
                let period = calendar.trading_period(&exchange, year, quarter)?;
                print_json(&period)?;
            }
            _ => bail!("pass either --from/--to or --year/--quarter"),
        },
    }
    Ok(())
}
