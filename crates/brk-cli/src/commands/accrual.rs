//! `brk accrual ...`

use std::sync::Arc;

use anyhow::Result;
use brk_accrual::run_accrual;
use brk_ledger::AccrualPeriod;

use super::{print_json, Services};
use crate::AccrualCmd;

pub async fn run(services: &Services, cmd: AccrualCmd) -> Result<()> {
    let engine = &services.engine;
    match cmd {
        AccrualCmd::Run { period, client } => {
            let period = AccrualPeriod::parse(&period)?;
            let report = run_accrual(Arc::clone(engine), period, client, services.bulk).await?;
            print_json(&report)?;
        }

        AccrualCmd::Preview { period, client } => {
            let period = AccrualPeriod::parse(&period)?;
            let computed = engine.preview(client, &period).await?;
            print_json(&computed)?;
        }

        AccrualCmd::Show { period, client } => {
            let period = AccrualPeriod::parse(&period)?;
            let record = engine.get_calculation(client, &period).await?;
            print_json(&record)?;
        }

        AccrualCmd::Unlock { period, client } => {
            let period = AccrualPeriod::parse(&period)?;
            let deleted = engine.delete_calculation(client, &period).await?;
            println!(
                "unlocked=true client_id={} period={} calculation_id={} details={}",
                client,
                period,
                deleted.calculation.id,
                deleted.details.len()
            );
        }
    }
    Ok(())
}
