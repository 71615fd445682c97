use std::collections::HashMap;

use brk_ledger::{Side, TradeChanges};
use brk_testkit::Harness;

/// After any sequence of writes, every buy's consumed quantity equals what
/// was allocated from it and every sell is allocated exactly once in full.
#[tokio::test]
async fn allocations_balance_after_mixed_activity() -> anyhow::Result<()> {
    let h = Harness::new()?;
    h.seed(1, "INFY", "10");
    h.seed(2, "INFY", "10");

    h.buy(1, "INFY", 50, "10", "2024-05-02").await?;
    h.buy(1, "INFY", 70, "11", "2024-05-09").await?;
    h.buy(2, "INFY", 40, "10", "2024-05-09").await?;
    let s1 = h.sell(1, "INFY", 60, "12", "2024-05-20").await?;
    h.sell(2, "INFY", 25, "12", "2024-05-21").await?;
    h.buy(1, "INFY", 10, "13", "2024-05-22").await?;
    h.sell(1, "INFY", 30, "12", "2024-05-28").await?;
    h.ledger
        .update(
            s1.id,
            TradeChanges {
                quantity: Some(55),
                ..Default::default()
            },
        )
        .await?;

    let trades = h.store.trades().await;
    let allocs = h.store.allocations().await;

    let mut from_buy: HashMap<i64, i64> = HashMap::new();
    let mut to_sell: HashMap<i64, i64> = HashMap::new();
    for a in &allocs {
        *from_buy.entry(a.buy_trade_id).or_default() += a.quantity_allocated;
        *to_sell.entry(a.sell_trade_id).or_default() += a.quantity_allocated;
    }

    for t in &trades {
        let report = h.ledger.verify(t.id).await?;
        assert!(report.is_balanced(), "{report:?}");
        match t.side {
            Side::Buy => {
                assert!((0..=t.quantity).contains(&t.remaining_quantity));
                assert_eq!(t.is_fully_consumed, t.remaining_quantity == 0);
                assert_eq!(
                    t.quantity - t.remaining_quantity,
                    from_buy.get(&t.id).copied().unwrap_or(0)
                );
            }
            Side::Sell => {
                assert!(t.sell_fully_allocated);
                assert_eq!(to_sell.get(&t.id).copied(), Some(t.quantity));
            }
        }
    }

    // client 1 holds 50 + 70 + 10 - 55 - 30
    let open: i64 = trades
        .iter()
        .filter(|t| t.client_id == 1 && t.side == Side::Buy)
        .map(|t| t.remaining_quantity)
        .sum();
    assert_eq!(open, 45);
    Ok(())
}
