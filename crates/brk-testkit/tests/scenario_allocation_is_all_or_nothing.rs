use brk_ledger::{BrokerageError, Side};
use brk_testkit::Harness;

/// Scenario C: selling more than is held fails and leaves the book untouched.
#[tokio::test]
async fn oversell_is_rejected_without_side_effects() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.seed(7, "INFY", "10");

    let lot = h.buy(7, "INFY", 100, "10", "2024-06-01").await?;
    let err = h.sell(7, "INFY", 150, "12", "2024-06-16").await.unwrap_err();
    assert_eq!(
        err,
        BrokerageError::InsufficientShares {
            client_id: 7,
            symbol: "INFY".to_string(),
            exchange: "NSE".to_string(),
            available: 100,
            requested: 150,
        }
    );
    assert_eq!(err.kind(), "InsufficientShares");

    let trades = h.store.trades().await;
    assert_eq!(trades.len(), 1, "sell must not be persisted");
    assert_eq!(trades[0].id, lot.id);
    assert_eq!(trades[0].remaining_quantity, 100);
    assert!(h.store.allocations().await.is_empty());
    Ok(())
}

/// A storage failure midway through allocation rolls back every allocation,
/// every lot change and the sell row itself.
#[tokio::test]
async fn failure_mid_allocation_rolls_back_everything() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.seed(1, "INFY", "10");

    h.buy(1, "INFY", 10, "10", "2024-06-01").await?;
    h.buy(1, "INFY", 10, "10", "2024-06-02").await?;
    h.buy(1, "INFY", 10, "10", "2024-06-03").await?;
    let before = h.store.trades().await;

    // first allocation succeeds, second fails
    h.store.fail_allocation_after(1);
    let err = h.sell(1, "INFY", 25, "11", "2024-06-10").await.unwrap_err();
    assert!(matches!(err, BrokerageError::Storage { .. }), "got {err:?}");

    assert_eq!(h.store.trades().await, before);
    assert!(h.store.allocations().await.is_empty());
    assert!(h.store.trades().await.iter().all(|t| t.side == Side::Buy));

    // with the fault cleared the same sell goes through
    h.store.clear_faults();
    let sell = h.sell(1, "INFY", 25, "11", "2024-06-10").await?;
    assert_eq!(h.ledger.allocations_for(sell.id).await?.len(), 3);
    Ok(())
}

/// An update whose replacement sell cannot be covered leaves the old sell
/// and its allocations in place.
#[tokio::test]
async fn failed_update_keeps_the_original_trade() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.seed(1, "INFY", "10");

    let lot = h.buy(1, "INFY", 100, "10", "2024-06-01").await?;
    let sell = h.sell(1, "INFY", 40, "12", "2024-06-16").await?;
    let allocs_before = h.store.allocations().await;

    let changes = brk_ledger::TradeChanges {
        quantity: Some(150),
        ..Default::default()
    };
    let err = h.ledger.update(sell.id, changes).await.unwrap_err();
    assert!(matches!(
        err,
        BrokerageError::InsufficientShares { available: 100, requested: 150, .. }
    ));

    let still = h.ledger.get(sell.id).await?;
    assert_eq!(still, sell);
    assert_eq!(h.store.allocations().await, allocs_before);
    assert_eq!(h.ledger.get(lot.id).await?.remaining_quantity, 60);
    Ok(())
}

#[tokio::test]
async fn unknown_client_or_stock_is_rejected() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.seed(1, "INFY", "10");

    let err = h.buy(2, "INFY", 1, "10", "2024-06-01").await.unwrap_err();
    assert_eq!(err, BrokerageError::ClientNotFound { client_id: 2 });

    let err = h.buy(1, "WIPRO", 1, "10", "2024-06-01").await.unwrap_err();
    assert!(matches!(err, BrokerageError::StockNotFound { .. }));

    assert!(h.store.trades().await.is_empty());
    Ok(())
}
