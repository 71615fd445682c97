use brk_accrual::BulkOptions;
use brk_ledger::{AccrualPeriod, LedgerStore, LedgerTx};
use brk_testkit::{money, Harness};

fn june() -> AccrualPeriod {
    AccrualPeriod::month(2024, 6).unwrap()
}

/// A sell recorded after the calculation was computed, but before it is
/// written, is priced and fenced by the write.
#[tokio::test]
async fn sell_between_compute_and_write_is_accrued() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.seed(1, "INFY", "10");
    let lot = h.buy(1, "INFY", 100, "10", "2024-06-01").await?;

    let computed = h.engine.compute_for_client(1, &june()).await?;
    assert_eq!(computed.calculation.brokerage_amount, money("100"));

    let sell = h.sell(1, "INFY", 40, "12", "2024-06-16").await?;

    let mut tx = h.store.begin().await?;
    let record = h
        .engine
        .persist_recomputed(&mut tx, computed)
        .await?
        .expect("positions to accrue");
    tx.commit().await?;

    assert_eq!(record.calculation.brokerage_amount, money("81.333333"));
    assert_eq!(record.details.len(), 2);
    let open = record
        .details
        .iter()
        .find(|d| !d.is_closed_in_period)
        .expect("open detail");
    assert_eq!(open.quantity, 60);

    assert_eq!(h.ledger.get(lot.id).await?.locked_period, Some(june().key()));
    assert_eq!(h.ledger.get(sell.id).await?.locked_period, Some(june().key()));
    Ok(())
}

/// The only lot was deleted after compute: nothing is written, nothing fenced.
#[tokio::test]
async fn position_gone_before_write_writes_nothing() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.seed(1, "INFY", "10");
    let lot = h.buy(1, "INFY", 100, "10", "2024-06-01").await?;

    let computed = h.engine.compute_for_client(1, &june()).await?;
    h.ledger.delete(lot.id).await?;

    let mut tx = h.store.begin().await?;
    assert!(h.engine.persist_recomputed(&mut tx, computed).await?.is_none());
    tx.commit().await?;
    assert!(h.store.calculations().await.is_empty());
    Ok(())
}

/// Bulk totals come from what was written.
#[tokio::test]
async fn bulk_total_matches_stored_calculations() -> anyhow::Result<()> {
    let h = Harness::new()?;
    for client in 1..=4 {
        h.seed(client, "INFY", "10");
        h.buy(client, "INFY", 100, "10", "2024-06-01").await?;
    }
    h.sell(2, "INFY", 40, "12", "2024-06-16").await?;

    let report = h.run_bulk("2024-06", BulkOptions::default()).await?;
    let stored = h
        .store
        .calculations()
        .await
        .into_iter()
        .fold(money("0"), |acc, c| acc + c.brokerage_amount);
    assert_eq!(report.total_brokerage, stored);
    assert_eq!(report.total_brokerage, money("381.333333"));
    Ok(())
}
