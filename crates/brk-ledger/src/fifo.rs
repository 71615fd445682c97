//! FIFO lot matching.
//!
//! A SELL consumes the client's open BUY lots of the same symbol/exchange,
//! oldest first (ties broken by trade id). Only lots dated on or before the
//! sell date are eligible. Allocation is all-or-nothing: if the eligible
//! lots cannot cover the sell, nothing is written.
//!
//! Every function here runs inside the caller's unit of work and never
//! commits.

use serde::Serialize;
use tracing::debug;

use crate::error::{BrokerageError, Result};
use crate::store::{AllocationRepository, LedgerTx, TradeRepository};
use crate::types::{Allocation, NewAllocation, Side, Trade, TradeId};

/// Match `sell` against open lots and persist the allocations.
///
/// Returns the allocations in consumption order.
pub async fn allocate<T: LedgerTx>(tx: &mut T, sell: &Trade) -> Result<Vec<Allocation>> {
    if sell.side != Side::Sell {
        return Err(BrokerageError::invalid_trade(format!(
            "trade {} is not a SELL",
            sell.id
        )));
    }
    if sell.sell_fully_allocated || !tx.allocations_for_sell(sell.id).await?.is_empty() {
        return Err(BrokerageError::AllocationConflict {
            trade_id: sell.id,
            reason: "sell is already allocated".to_string(),
        });
    }

    let key = sell.key();
    let mut lots = tx.open_lots(&key, sell.trade_date).await?;
    let available: i64 = lots.iter().map(|l| l.remaining_quantity).sum();
    if available < sell.quantity {
        return Err(BrokerageError::InsufficientShares {
            client_id: sell.client_id,
            symbol: sell.symbol.clone(),
            exchange: sell.exchange.clone(),
            available,
            requested: sell.quantity,
        });
    }
    lots.sort_by_key(|l| (l.trade_date, l.id));

    let mut left = sell.quantity;
    let mut out = Vec::new();
    for mut lot in lots {
        if left == 0 {
            break;
        }
        let take = left.min(lot.remaining_quantity);
        if take == 0 {
            continue;
        }

        let buy_value = overflow_checked(lot.price.checked_mul_qty(take), sell.id)?;
        let sell_value = overflow_checked(sell.price.checked_mul_qty(take), sell.id)?;
        let holding_days = (sell.trade_date - lot.trade_date).num_days();

        let row = tx
            .insert_allocation(NewAllocation {
                sell_trade_id: sell.id,
                buy_trade_id: lot.id,
                client_id: sell.client_id,
                symbol: sell.symbol.clone(),
                exchange: sell.exchange.clone(),
                quantity_allocated: take,
                buy_price: lot.price,
                sell_price: sell.price,
                buy_date: lot.trade_date,
                sell_date: sell.trade_date,
                buy_value,
                sell_value,
                profit_loss: sell_value - buy_value,
                holding_days,
            })
            .await?;

        lot.remaining_quantity -= take;
        lot.is_fully_consumed = lot.remaining_quantity == 0;
        tx.save_trade_state(&lot).await?;

        debug!(
            sell = sell.id,
            buy = lot.id,
            take,
            remaining = lot.remaining_quantity,
            "lot consumed"
        );

        left -= take;
        out.push(row);
    }

    let mut sell = sell.clone();
    sell.sell_fully_allocated = true;
    tx.save_trade_state(&sell).await?;

    Ok(out)
}

fn overflow_checked<V>(v: Option<V>, trade_id: TradeId) -> Result<V> {
    v.ok_or_else(|| BrokerageError::invalid_trade(format!("allocation value overflows on trade {trade_id}")))
}

/// Undo the allocations of a trade.
///
/// BUY: refused while any sell consumed from the lot, otherwise nothing to
/// do. SELL: every consumed lot gets its quantity back and the allocations
/// are removed. A lot fenced by a calculated period blocks the reversal.
/// Returns the removed allocations.
pub async fn reverse<T: LedgerTx>(tx: &mut T, trade: &Trade) -> Result<Vec<Allocation>> {
    match trade.side {
        Side::Buy => {
            let consumers = tx.allocations_for_buy(trade.id).await?;
            if consumers.is_empty() {
                Ok(Vec::new())
            } else {
                Err(BrokerageError::AllocationConflict {
                    trade_id: trade.id,
                    reason: format!(
                        "lot consumed by {} sell allocation(s); reverse those sells first",
                        consumers.len()
                    ),
                })
            }
        }
        Side::Sell => {
            let allocations = tx.allocations_for_sell(trade.id).await?;

            let mut lots = Vec::with_capacity(allocations.len());
            for a in &allocations {
                let lot = tx
                    .find_trade(a.buy_trade_id)
                    .await?
                    .ok_or(BrokerageError::TradeNotFound {
                        trade_id: a.buy_trade_id,
                    })?;
                if let Some(period) = lot.locked_period {
                    return Err(BrokerageError::PeriodLocked {
                        period,
                        trade_id: Some(lot.id),
                        client_id: Some(lot.client_id),
                    });
                }
                lots.push((lot, a.quantity_allocated));
            }

            for (mut lot, qty) in lots {
                lot.remaining_quantity += qty;
                lot.is_fully_consumed = false;
                tx.save_trade_state(&lot).await?;
            }
            tx.delete_allocations_for_sell(trade.id).await?;

            if trade.sell_fully_allocated {
                let mut sell = trade.clone();
                sell.sell_fully_allocated = false;
                tx.save_trade_state(&sell).await?;
            }

            debug!(sell = trade.id, restored = allocations.len(), "sell reversed");
            Ok(allocations)
        }
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Allocated quantity of a trade compared to what its state implies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConservationReport {
    pub trade_id: TradeId,
    pub side: Side,
    pub quantity: i64,
    /// BUY: `quantity - remaining`; SELL: `quantity` once allocated, else 0.
    pub expected_allocated: i64,
    pub allocated: i64,
}

impl ConservationReport {
    pub fn is_balanced(&self) -> bool {
        self.expected_allocated == self.allocated
    }
}

pub async fn verify_conservation<T: LedgerTx>(
    tx: &mut T,
    trade_id: TradeId,
) -> Result<ConservationReport> {
    let trade = tx
        .find_trade(trade_id)
        .await?
        .ok_or(BrokerageError::TradeNotFound { trade_id })?;

    let (expected_allocated, rows) = match trade.side {
        Side::Buy => (
            trade.quantity - trade.remaining_quantity,
            tx.allocations_for_buy(trade_id).await?,
        ),
        Side::Sell => (
            if trade.sell_fully_allocated { trade.quantity } else { 0 },
            tx.allocations_for_sell(trade_id).await?,
        ),
    };

    Ok(ConservationReport {
        trade_id,
        side: trade.side,
        quantity: trade.quantity,
        expected_allocated,
        allocated: rows.iter().map(|a| a.quantity_allocated).sum(),
    })
}
