use brk_accrual::BulkOptions;
use brk_ledger::{AccrualPeriod, BrokerageError, PeriodKey};
use brk_testkit::Harness;

/// A client billed for January cannot be billed again for Q1.
#[tokio::test]
async fn month_then_enclosing_quarter_is_refused() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.seed(1, "INFY", "10");
    h.buy(1, "INFY", 100, "10", "2024-01-01").await?;

    let jan = AccrualPeriod::month(2024, 1)?;
    let q1 = AccrualPeriod::quarter(2024, 1)?;
    h.engine.calculate_for_client(1, &jan).await?;

    let err = h.engine.calculate_for_client(1, &q1).await.unwrap_err();
    assert_eq!(
        err,
        BrokerageError::PeriodLocked {
            period: jan.key(),
            trade_id: None,
            client_id: Some(1),
        }
    );
    assert_eq!(h.store.calculations().await.len(), 1);

    // adjacent buckets do not overlap
    let feb = AccrualPeriod::month(2024, 2)?;
    assert!(h.engine.calculate_for_client(1, &feb).await?.is_some());
    Ok(())
}

/// A day inside a billed quarter is refused too.
#[tokio::test]
async fn day_inside_billed_quarter_is_refused() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.seed(1, "INFY", "10");
    h.buy(1, "INFY", 100, "10", "2024-01-01").await?;

    h.engine
        .calculate_for_client(1, &AccrualPeriod::parse("2024-Q1")?)
        .await?;
    let err = h
        .engine
        .calculate_for_client(1, &AccrualPeriod::parse("2024-02-15")?)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BrokerageError::PeriodLocked {
            period: PeriodKey::Quarter { year: 2024, quarter: 1 },
            ..
        }
    ));
    Ok(())
}

/// Bulk over a quarter is refused when one client already has a month in it.
#[tokio::test]
async fn bulk_refused_when_a_month_inside_is_billed() -> anyhow::Result<()> {
    let h = Harness::new()?;
    for client in 1..=2 {
        h.seed(client, "INFY", "10");
        h.buy(client, "INFY", 100, "10", "2024-01-01").await?;
    }
    h.engine
        .calculate_for_client(2, &AccrualPeriod::month(2024, 3)?)
        .await?;

    let err = h
        .run_bulk("2024-Q1", BulkOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BrokerageError::PeriodLocked {
            period: PeriodKey::Month { year: 2024, month: 3 },
            client_id: None,
            ..
        }
    ));
    assert_eq!(h.store.calculations().await.len(), 1);
    Ok(())
}
