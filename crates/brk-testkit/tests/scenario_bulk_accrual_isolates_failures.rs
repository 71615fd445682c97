use brk_accrual::{run_accrual, BulkOptions};
use brk_ledger::{AccrualPeriod, BrokerageError};
use brk_testkit::{money, Harness};

/// One failing client is reported; the rest of the book is still written.
#[tokio::test]
async fn poisoned_client_does_not_block_the_book() -> anyhow::Result<()> {
    let h = Harness::new()?;
    for client in 1..=5 {
        h.seed(client, "INFY", "10");
        h.buy(client, "INFY", 100, "10", "2024-06-01").await?;
    }
    // only trades after the period: listed but nothing to accrue
    h.seed(6, "INFY", "10");
    h.buy(6, "INFY", 100, "10", "2024-07-02").await?;

    h.store.poison_client(3);
    let opts = BulkOptions {
        workers: 3,
        write_batch_size: 2,
    };
    let report = h.run_bulk("2024-06", opts).await?;

    assert_eq!(report.period, "2024-06");
    assert_eq!(report.succeeded, vec![1, 2, 4, 5]);
    assert_eq!(report.skipped, vec![6]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].client_id, 3);
    assert_eq!(report.failed[0].kind, "STORAGE");
    assert_eq!(report.total_brokerage, money("400"));

    let mut calculated: Vec<_> = h
        .store
        .calculations()
        .await
        .into_iter()
        .map(|c| c.client_id)
        .collect();
    calculated.sort_unstable();
    assert_eq!(calculated, vec![1, 2, 4, 5]);

    // client 3's trades stay editable
    for t in h.store.trades().await {
        assert_eq!(t.locked_period.is_some(), [1, 2, 4, 5].contains(&t.client_id));
    }
    Ok(())
}

/// A period that already has calculations is refused as a whole.
#[tokio::test]
async fn bulk_rerun_is_refused() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.seed(1, "INFY", "10");
    h.buy(1, "INFY", 100, "10", "2024-06-01").await?;

    h.run_bulk("2024-06", BulkOptions::default()).await?;
    let err = h
        .run_bulk("2024-06", BulkOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerageError::PeriodLocked { client_id: None, .. }));
    assert_eq!(h.store.calculations().await.len(), 1);
    Ok(())
}

/// Bulk output matches per-client results exactly.
#[tokio::test]
async fn bulk_matches_single_client_runs() -> anyhow::Result<()> {
    let bulk = Harness::new()?;
    let single = Harness::new()?;
    for h in [&bulk, &single] {
        for client in 1..=12 {
            h.seed(client, "INFY", "10");
            h.buy(client, "INFY", 10 * client, "10", "2024-06-01").await?;
            h.sell(client, "INFY", client, "12", "2024-06-16").await?;
        }
    }

    let report = bulk
        .run_bulk(
            "2024-06",
            BulkOptions {
                workers: 4,
                write_batch_size: 5,
            },
        )
        .await?;
    assert_eq!(report.succeeded.len(), 12);

    let june = AccrualPeriod::month(2024, 6)?;
    let mut total = money("0");
    for client in 1..=12 {
        let one = run_accrual(single.engine.clone(), june, Some(client), BulkOptions::default())
            .await?;
        total += one.total_brokerage;
        let a = bulk.engine.get_calculation(client, &june).await?;
        let b = single.engine.get_calculation(client, &june).await?;
        assert_eq!(a.calculation.brokerage_amount, b.calculation.brokerage_amount);
        assert_eq!(a.details.len(), b.details.len());
    }
    assert_eq!(total, report.total_brokerage);
    Ok(())
}
