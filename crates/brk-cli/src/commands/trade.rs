//! `brk trade ...`

use anyhow::{bail, Result};
use brk_ledger::{Side, TradeChanges, TradeInput};
use serde_json::json;

use super::{parse_date, parse_micros, print_json, Services};
use crate::TradeCmd;

pub async fn run(services: &Services, cmd: TradeCmd) -> Result<()> {
    let ledger = &services.ledger;
    match cmd {
        TradeCmd::Record {
            client,
            symbol,
            exchange,
            side,
            quantity,
            price,
            date,
            charges,
        } => {
            let input = TradeInput {
                client_id: client,
                symbol,
                exchange,
                side: Side::parse(&side)?,
                quantity,
                price: parse_micros("price", &price)?,
                trade_date: parse_date("date", &date)?,
                charges: parse_micros("charges", &charges)?,
            };
            let trade = ledger.record(input).await?;
            let allocations = ledger.allocations_for(trade.id).await?;
            print_json(&json!({ "trade": trade, "allocations": allocations }))?;
        }

        TradeCmd::Update {
            id,
            client,
            symbol,
            exchange,
            side,
            quantity,
            price,
            date,
            charges,
        } => {
            let changes = TradeChanges {
                client_id: client,
                symbol,
                exchange,
                side: side.as_deref().map(Side::parse).transpose()?,
                quantity,
                price: price.as_deref().map(|p| parse_micros("price", p)).transpose()?,
                trade_date: date.as_deref().map(|d| parse_date("date", d)).transpose()?,
                charges: charges
                    .as_deref()
                    .map(|c| parse_micros("charges", c))
                    .transpose()?,
            };
            if changes.is_empty() {
                bail!("nothing to update: pass at least one field flag");
            }
            let trade = ledger.update(id, changes).await?;
            let allocations = ledger.allocations_for(trade.id).await?;
            print_json(&json!({
                "replaced_trade_id": id,
                "trade": trade,
                "allocations": allocations,
            }))?;
        }

        TradeCmd::Delete { id } => {
            ledger.delete(id).await?;
            println!("deleted=true trade_id={id}");
        }

        TradeCmd::Show { id } => {
            let trade = ledger.get(id).await?;
            let allocations = ledger.allocations_for(id).await?;
            print_json(&json!({ "trade": trade, "allocations": allocations }))?;
        }

        TradeCmd::Verify { id } => {
            let report = ledger.verify(id).await?;
            print_json(&report)?;
            if !report.is_balanced() {
                bail!(
                    "CONSERVATION_VIOLATED trade_id={} expected={} allocated={}",
                    id,
                    report.expected_allocated,
                    report.allocated
                );
            }
        }
    }
    Ok(())
}
