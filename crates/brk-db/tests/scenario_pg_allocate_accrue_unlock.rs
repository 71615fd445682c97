//! End-to-end against Postgres: FIFO allocation, accrual with period lock,
//! unlock by deleting the calculation.
//!
//! DB-backed test, skipped if BRK_DATABASE_URL is not set.

use std::sync::Arc;

use brk_accrual::{AccrualConfig, AccrualEngine};
use brk_calendar::{CalendarService, StaticHolidays};
use brk_db::{PgDirectory, PgStore};
use brk_ledger::{
    AccrualPeriod, BrokerageError, Micros, RatePct, Side, TradeChanges, TradeInput, TradeLedger,
};
use chrono::NaiveDate;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

#[tokio::test]
async fn allocate_accrue_lock_and_unlock() -> anyhow::Result<()> {
    let url = match std::env::var(brk_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: BRK_DATABASE_URL not set");
            return Ok(());
        }
    };
    let pool = brk_db::connect(&url, 4).await?;
    brk_db::migrate(&pool).await?;

    // Fresh client per run so reruns never collide on (client, period).
    let client_id = chrono::Utc::now().timestamp_micros();
    let dir = PgDirectory::new(pool.clone());
    dir.upsert_client(client_id, "scenario client", Some(RatePct::from_percent(10)))
        .await?;
    dir.upsert_stock("PGTEST", "NSE", Some(Micros::from_units(10)))
        .await?;
    let dir = Arc::new(dir);

    let ledger = TradeLedger::new(PgStore::new(pool.clone()), dir.clone(), dir.clone());
    let input = |side, qty, price, date| TradeInput {
        client_id,
        symbol: "PGTEST".to_string(),
        exchange: "NSE".to_string(),
        side,
        quantity: qty,
        price: Micros::from_units(price),
        trade_date: date,
        charges: Micros::ZERO,
    };

    let buy = ledger.record(input(Side::Buy, 100, 10, d(2024, 6, 1))).await?;
    let sell = ledger.record(input(Side::Sell, 40, 12, d(2024, 6, 16))).await?;
    assert!(sell.sell_fully_allocated);
    assert_eq!(ledger.get(buy.id).await?.remaining_quantity, 60);

    let calendar = Arc::new(CalendarService::new(StaticHolidays::empty())?);
    let engine = AccrualEngine::new(
        PgStore::new(pool.clone()),
        dir.clone(),
        dir.clone(),
        calendar,
        AccrualConfig::default(),
    );
    let june = AccrualPeriod::month(2024, 6)?;
    let record = engine
        .calculate_for_client(client_id, &june)
        .await?
        .expect("client has positions");
    assert_eq!(record.calculation.brokerage_amount, Micros::new(81_333_333));

    // Both trades are fenced now.
    let err = ledger
        .update(sell.id, TradeChanges { quantity: Some(30), ..TradeChanges::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerageError::PeriodLocked { .. }));

    // Same period again, or the quarter around it, is refused.
    let err = engine.calculate_for_client(client_id, &june).await.unwrap_err();
    assert!(matches!(err, BrokerageError::PeriodLocked { .. }));
    let q2 = AccrualPeriod::quarter(2024, 2)?;
    let err = engine.calculate_for_client(client_id, &q2).await.unwrap_err();
    assert!(matches!(err, BrokerageError::PeriodLocked { .. }));

    engine.delete_calculation(client_id, &june).await?;
    assert_eq!(ledger.get(buy.id).await?.locked_period, None);

    ledger.delete(sell.id).await?;
    assert_eq!(ledger.get(buy.id).await?.remaining_quantity, 100);
    ledger.delete(buy.id).await?;
    Ok(())
}
