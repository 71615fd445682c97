use brk_ledger::{AccrualPeriod, BrokerageError, TradeChanges};
use brk_testkit::{money, Harness};

fn june() -> AccrualPeriod {
    AccrualPeriod::month(2024, 6).unwrap()
}

/// Calculating a period fences every referenced trade until the calculation
/// is deleted.
#[tokio::test]
async fn calculated_trades_are_immutable_until_unlocked() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.seed(1, "INFY", "10");
    let lot = h.buy(1, "INFY", 100, "10", "2024-06-01").await?;
    let sell = h.sell(1, "INFY", 40, "12", "2024-06-16").await?;

    h.engine.calculate_for_client(1, &june()).await?;

    for id in [lot.id, sell.id] {
        let t = h.ledger.get(id).await?;
        assert_eq!(t.locked_period, Some(june().key()));
        assert!(t.is_locked());

        let err = h.ledger.delete(id).await.unwrap_err();
        assert!(
            matches!(err, BrokerageError::PeriodLocked { trade_id: Some(t), .. } if t == id),
            "got {err:?}"
        );

        let changes = TradeChanges {
            charges: Some(money("1")),
            ..Default::default()
        };
        let err = h.ledger.update(id, changes).await.unwrap_err();
        assert_eq!(err.kind(), "PERIOD_LOCKED");
    }

    // unlocking releases the fence
    let deleted = h.engine.delete_calculation(1, &june()).await?;
    assert_eq!(deleted.details.len(), 2);
    assert!(h.store.calculations().await.is_empty());
    assert!(h.store.details().await.is_empty());
    assert_eq!(h.ledger.get(lot.id).await?.locked_period, None);

    let changes = TradeChanges {
        quantity: Some(50),
        ..Default::default()
    };
    let replaced = h.ledger.update(sell.id, changes).await?;
    assert_eq!(h.ledger.get(lot.id).await?.remaining_quantity, 50);
    assert_eq!(replaced.quantity, 50);
    Ok(())
}

/// Re-running a calculated period for the same client is refused.
#[tokio::test]
async fn rerun_requires_explicit_delete() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.seed(1, "INFY", "10");
    h.buy(1, "INFY", 100, "10", "2024-06-01").await?;

    h.engine.calculate_for_client(1, &june()).await?;
    let err = h.engine.calculate_for_client(1, &june()).await.unwrap_err();
    assert_eq!(
        err,
        BrokerageError::PeriodLocked {
            period: june().key(),
            trade_id: None,
            client_id: Some(1),
        }
    );

    h.engine.delete_calculation(1, &june()).await?;
    let again = h.engine.calculate_for_client(1, &june()).await?;
    assert!(again.is_some());
    assert_eq!(h.store.calculations().await.len(), 1);
    Ok(())
}

/// A later sell may still consume a fenced lot, but cannot be reversed while
/// the lot stays fenced.
#[tokio::test]
async fn sell_against_a_locked_lot_cannot_be_reversed() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.seed(1, "INFY", "10");
    let lot = h.buy(1, "INFY", 100, "10", "2024-06-01").await?;
    h.engine.calculate_for_client(1, &june()).await?;

    let july_sell = h.sell(1, "INFY", 30, "12", "2024-07-10").await?;
    assert_eq!(h.ledger.get(lot.id).await?.remaining_quantity, 70);

    let err = h.ledger.delete(july_sell.id).await.unwrap_err();
    assert!(matches!(err, BrokerageError::PeriodLocked { trade_id: Some(t), .. } if t == lot.id));
    assert_eq!(h.ledger.get(lot.id).await?.remaining_quantity, 70);
    assert_eq!(h.store.allocations().await.len(), 1);
    Ok(())
}

/// With two calculated periods, unlocking the later one leaves the earlier
/// fence in place.
#[tokio::test]
async fn unlock_falls_back_to_the_remaining_calculation() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.seed(1, "INFY", "10");
    let lot = h.buy(1, "INFY", 100, "10", "2024-06-01").await?;

    let july = AccrualPeriod::month(2024, 7)?;
    h.engine.calculate_for_client(1, &june()).await?;
    h.engine.calculate_for_client(1, &july).await?;
    assert_eq!(h.ledger.get(lot.id).await?.locked_period, Some(july.key()));

    h.engine.delete_calculation(1, &july).await?;
    assert_eq!(h.ledger.get(lot.id).await?.locked_period, Some(june().key()));

    let err = h.engine.delete_calculation(1, &july).await.unwrap_err();
    assert!(matches!(err, BrokerageError::CalculationNotFound { client_id: 1, .. }));
    Ok(())
}

#[tokio::test]
async fn stored_calculation_round_trips() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.seed(1, "INFY", "10");
    h.buy(1, "INFY", 100, "10", "2024-06-01").await?;

    let written = h
        .engine
        .calculate_for_client(1, &june())
        .await?
        .expect("positions exist");
    let read = h.engine.get_calculation(1, &june()).await?;
    assert_eq!(read, written);
    Ok(())
}
