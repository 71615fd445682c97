//! In-memory ledger store.
//!
//! `begin` takes the book mutex and works on a private copy; `commit` writes
//! the copy back. Dropping the handle releases the mutex and the copy is
//! discarded, so a failed unit of work leaves the book exactly as it was.
//!
//! Only one unit of work is open at a time. Never call `begin` while holding
//! a [`MemoryTx`] on the same task.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::NaiveDate;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{BrokerageError, Result};
use crate::period::PeriodKey;
use crate::store::{
    AllocationRepository, CalculationRepository, LedgerStore, LedgerTx, TradeRepository,
};
use crate::types::{
    Allocation, AllocationId, BrokerageCalculation, BrokerageDetail, CalculationId,
    CalculationRecord, ClientId, DetailId, NewAllocation, NewCalculation, NewDetail, NewTrade,
    PositionKey, Side, Trade, TradeId,
};

#[derive(Clone, Debug, Default)]
struct Book {
    trades: BTreeMap<TradeId, Trade>,
    allocations: BTreeMap<AllocationId, Allocation>,
    calculations: BTreeMap<CalculationId, BrokerageCalculation>,
    details: BTreeMap<DetailId, BrokerageDetail>,
    next_trade_id: TradeId,
    next_allocation_id: AllocationId,
    next_calculation_id: CalculationId,
    next_detail_id: DetailId,
}

fn bump(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

/// Test-only failure switches.
#[derive(Debug)]
struct Faults {
    /// Allocation inserts left before failing; negative = disabled.
    allocation_budget: AtomicI64,
    poisoned_clients: StdMutex<HashSet<ClientId>>,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            allocation_budget: AtomicI64::new(-1),
            poisoned_clients: StdMutex::new(HashSet::new()),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    book: Arc<Mutex<Book>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the allocation insert that follows `n` successful ones.
    pub fn fail_allocation_after(&self, n: i64) {
        self.faults.allocation_budget.store(n, Ordering::SeqCst);
    }

    /// Fail every calculation insert for `client_id`.
    pub fn poison_client(&self, client_id: ClientId) {
        self.faults
            .poisoned_clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(client_id);
    }

    pub fn clear_faults(&self) {
        self.faults.allocation_budget.store(-1, Ordering::SeqCst);
        self.faults
            .poisoned_clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    // --- committed-state inspection ---------------------------------------

    pub async fn trades(&self) -> Vec<Trade> {
        self.book.lock().await.trades.values().cloned().collect()
    }

    pub async fn allocations(&self) -> Vec<Allocation> {
        self.book.lock().await.allocations.values().cloned().collect()
    }

    pub async fn calculations(&self) -> Vec<BrokerageCalculation> {
        self.book.lock().await.calculations.values().cloned().collect()
    }

    pub async fn details(&self) -> Vec<BrokerageDetail> {
        self.book.lock().await.details.values().cloned().collect()
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        let guard = Arc::clone(&self.book).lock_owned().await;
        let work = guard.clone();
        Ok(MemoryTx {
            guard,
            work,
            faults: Arc::clone(&self.faults),
        })
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<Book>,
    work: Book,
    faults: Arc<Faults>,
}

impl std::fmt::Debug for MemoryTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTx")
            .field("trades", &self.work.trades.len())
            .field("allocations", &self.work.allocations.len())
            .field("calculations", &self.work.calculations.len())
            .finish()
    }
}

impl MemoryTx {
    fn trade_mut(&mut self, id: TradeId) -> Result<&mut Trade> {
        self.work
            .trades
            .get_mut(&id)
            .ok_or(BrokerageError::TradeNotFound { trade_id: id })
    }
}

#[async_trait::async_trait]
impl TradeRepository for MemoryTx {
    async fn insert_trade(&mut self, trade: NewTrade) -> Result<Trade> {
        let id = bump(&mut self.work.next_trade_id);
        let row = trade.with_id(id);
        self.work.trades.insert(id, row.clone());
        Ok(row)
    }

    async fn find_trade(&mut self, id: TradeId) -> Result<Option<Trade>> {
        Ok(self.work.trades.get(&id).cloned())
    }

    async fn save_trade_state(&mut self, trade: &Trade) -> Result<()> {
        let row = self.trade_mut(trade.id)?;
        row.remaining_quantity = trade.remaining_quantity;
        row.is_fully_consumed = trade.is_fully_consumed;
        row.sell_fully_allocated = trade.sell_fully_allocated;
        Ok(())
    }

    async fn delete_trade(&mut self, id: TradeId) -> Result<()> {
        let referenced = self
            .work
            .allocations
            .values()
            .any(|a| a.buy_trade_id == id || a.sell_trade_id == id);
        if referenced {
            return Err(BrokerageError::storage(
                "delete_trade",
                format!("trade {id} is still referenced by allocations"),
            ));
        }
        let in_calculation = self
            .work
            .details
            .values()
            .any(|d| d.trade_id == id || d.sell_trade_id == Some(id));
        if in_calculation {
            return Err(BrokerageError::storage(
                "delete_trade",
                format!("trade {id} is still referenced by brokerage details"),
            ));
        }
        self.work
            .trades
            .remove(&id)
            .map(|_| ())
            .ok_or(BrokerageError::TradeNotFound { trade_id: id })
    }

    async fn open_lots(&mut self, key: &PositionKey, on_or_before: NaiveDate) -> Result<Vec<Trade>> {
        let mut lots: Vec<Trade> = self
            .work
            .trades
            .values()
            .filter(|t| {
                t.side == Side::Buy
                    && t.client_id == key.client_id
                    && t.symbol == key.symbol
                    && t.exchange == key.exchange
                    && t.remaining_quantity > 0
                    && t.trade_date <= on_or_before
            })
            .cloned()
            .collect();
        lots.sort_by_key(|t| (t.trade_date, t.id));
        Ok(lots)
    }

    async fn buy_lots_for_client(
        &mut self,
        client_id: ClientId,
        on_or_before: NaiveDate,
    ) -> Result<Vec<Trade>> {
        let mut lots: Vec<Trade> = self
            .work
            .trades
            .values()
            .filter(|t| {
                t.side == Side::Buy && t.client_id == client_id && t.trade_date <= on_or_before
            })
            .cloned()
            .collect();
        lots.sort_by_key(|t| (t.trade_date, t.id));
        Ok(lots)
    }

    async fn client_ids(&mut self) -> Result<Vec<ClientId>> {
        let mut ids: Vec<ClientId> = self.work.trades.values().map(|t| t.client_id).collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn set_locked_period(&mut self, ids: &[TradeId], period: Option<PeriodKey>) -> Result<()> {
        for id in ids {
            self.trade_mut(*id)?.locked_period = period;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AllocationRepository for MemoryTx {
    async fn insert_allocation(&mut self, allocation: NewAllocation) -> Result<Allocation> {
        let budget = self.faults.allocation_budget.load(Ordering::SeqCst);
        if budget == 0 {
            return Err(BrokerageError::storage(
                "insert_allocation",
                "injected allocation failure",
            ));
        }
        if budget > 0 {
            self.faults
                .allocation_budget
                .store(budget - 1, Ordering::SeqCst);
        }

        let duplicate = self.work.allocations.values().any(|a| {
            a.sell_trade_id == allocation.sell_trade_id && a.buy_trade_id == allocation.buy_trade_id
        });
        if duplicate {
            return Err(BrokerageError::AllocationConflict {
                trade_id: allocation.sell_trade_id,
                reason: format!("already allocated against buy {}", allocation.buy_trade_id),
            });
        }

        let id = bump(&mut self.work.next_allocation_id);
        let row = allocation.with_id(id);
        self.work.allocations.insert(id, row.clone());
        Ok(row)
    }

    async fn allocations_for_sell(&mut self, sell_trade_id: TradeId) -> Result<Vec<Allocation>> {
        Ok(self
            .work
            .allocations
            .values()
            .filter(|a| a.sell_trade_id == sell_trade_id)
            .cloned()
            .collect())
    }

    async fn allocations_for_buy(&mut self, buy_trade_id: TradeId) -> Result<Vec<Allocation>> {
        Ok(self
            .work
            .allocations
            .values()
            .filter(|a| a.buy_trade_id == buy_trade_id)
            .cloned()
            .collect())
    }

    async fn delete_allocations_for_sell(&mut self, sell_trade_id: TradeId) -> Result<u64> {
        let before = self.work.allocations.len();
        self.work
            .allocations
            .retain(|_, a| a.sell_trade_id != sell_trade_id);
        Ok((before - self.work.allocations.len()) as u64)
    }

    async fn client_allocations_sold_between(
        &mut self,
        client_id: ClientId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Allocation>> {
        let mut rows: Vec<Allocation> = self
            .work
            .allocations
            .values()
            .filter(|a| a.client_id == client_id && from <= a.sell_date && a.sell_date <= to)
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.sell_date, a.id));
        Ok(rows)
    }

    async fn client_allocations_sold_after(
        &mut self,
        client_id: ClientId,
        after: NaiveDate,
    ) -> Result<Vec<Allocation>> {
        Ok(self
            .work
            .allocations
            .values()
            .filter(|a| a.client_id == client_id && a.sell_date > after)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl CalculationRepository for MemoryTx {
    async fn find_calculation(
        &mut self,
        client_id: ClientId,
        period: PeriodKey,
    ) -> Result<Option<BrokerageCalculation>> {
        Ok(self
            .work
            .calculations
            .values()
            .find(|c| c.client_id == client_id && c.period == period)
            .cloned())
    }

    async fn overlapping_calculation(
        &mut self,
        client_id: ClientId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<BrokerageCalculation>> {
        Ok(self
            .work
            .calculations
            .values()
            .find(|c| c.client_id == client_id && c.period_start <= end && start <= c.period_end)
            .cloned())
    }

    async fn any_overlapping_calculation(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<BrokerageCalculation>> {
        Ok(self
            .work
            .calculations
            .values()
            .find(|c| c.period_start <= end && start <= c.period_end)
            .cloned())
    }

    async fn insert_calculation(
        &mut self,
        calculation: NewCalculation,
        details: Vec<NewDetail>,
    ) -> Result<CalculationRecord> {
        let poisoned = self
            .faults
            .poisoned_clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&calculation.client_id);
        if poisoned {
            return Err(BrokerageError::storage(
                "insert_calculation",
                format!("injected failure for client {}", calculation.client_id),
            ));
        }

        let exists = self
            .work
            .calculations
            .values()
            .any(|c| c.client_id == calculation.client_id && c.period == calculation.period);
        if exists {
            return Err(BrokerageError::PeriodLocked {
                period: calculation.period,
                trade_id: None,
                client_id: Some(calculation.client_id),
            });
        }

        let calc_id = bump(&mut self.work.next_calculation_id);
        let calc = calculation.with_id(calc_id);
        self.work.calculations.insert(calc_id, calc.clone());

        let mut rows = Vec::with_capacity(details.len());
        for d in details {
            let detail_id = bump(&mut self.work.next_detail_id);
            let row = d.with_ids(detail_id, calc_id);
            self.work.details.insert(detail_id, row.clone());
            rows.push(row);
        }

        Ok(CalculationRecord {
            calculation: calc,
            details: rows,
        })
    }

    async fn details_for(&mut self, calculation_id: CalculationId) -> Result<Vec<BrokerageDetail>> {
        Ok(self
            .work
            .details
            .values()
            .filter(|d| d.calculation_id == calculation_id)
            .cloned()
            .collect())
    }

    async fn delete_calculation(&mut self, calculation_id: CalculationId) -> Result<()> {
        self.work.details.retain(|_, d| d.calculation_id != calculation_id);
        self.work.calculations.remove(&calculation_id);
        Ok(())
    }

    async fn latest_lock_for_trade(&mut self, trade_id: TradeId) -> Result<Option<PeriodKey>> {
        let calc_ids: HashSet<CalculationId> = self
            .work
            .details
            .values()
            .filter(|d| d.trade_id == trade_id || d.sell_trade_id == Some(trade_id))
            .map(|d| d.calculation_id)
            .collect();
        Ok(calc_ids
            .iter()
            .filter_map(|id| self.work.calculations.get(id))
            .max_by_key(|c| (c.period_end, c.id))
            .map(|c| c.period))
    }
}

#[async_trait::async_trait]
impl LedgerTx for MemoryTx {
    async fn commit(self) -> Result<()> {
        let MemoryTx {
            mut guard, work, ..
        } = self;
        *guard = work;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixedpoint::Micros;
    use crate::types::TradeInput;

    fn buy(day: u32) -> NewTrade {
        TradeInput {
            client_id: 1,
            symbol: "INFY".to_string(),
            exchange: "NSE".to_string(),
            side: Side::Buy,
            quantity: 10,
            price: Micros::from_units(100),
            trade_date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            charges: Micros::ZERO,
        }
        .into_new_trade()
        .unwrap()
    }

    #[tokio::test]
    async fn dropped_tx_discards_changes() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_trade(buy(2)).await.unwrap();
        }
        assert!(store.trades().await.is_empty());

        let mut tx = store.begin().await.unwrap();
        tx.insert_trade(buy(2)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.trades().await.len(), 1);
    }

    #[tokio::test]
    async fn open_lots_ordered_by_date_then_id() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let late = tx.insert_trade(buy(5)).await.unwrap();
        let early_a = tx.insert_trade(buy(2)).await.unwrap();
        let early_b = tx.insert_trade(buy(2)).await.unwrap();
        let key = PositionKey::new(1, "INFY", "NSE");

        let lots = tx
            .open_lots(&key, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())
            .await
            .unwrap();
        let ids: Vec<TradeId> = lots.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![early_a.id, early_b.id, late.id]);

        let lots = tx
            .open_lots(&key, NaiveDate::from_ymd_opt(2024, 1, 4).unwrap())
            .await
            .unwrap();
        assert_eq!(lots.len(), 2);
    }

    #[tokio::test]
    async fn trade_referenced_by_a_detail_cannot_be_deleted() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let lot = tx.insert_trade(buy(2)).await.unwrap();
        let jan = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let calc = NewCalculation {
            client_id: 1,
            period: PeriodKey::Month { year: 2024, month: 1 },
            period_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            period_end: jan,
            total_holding_value: Micros::from_units(1000),
            total_holding_days: 30,
            rate: crate::fixedpoint::RatePct::from_percent(10),
            brokerage_amount: Micros::from_units(100),
            total_positions: 1,
            calculated_at: chrono::Utc::now(),
        };
        let detail = NewDetail {
            trade_id: lot.id,
            sell_trade_id: None,
            symbol: "INFY".to_string(),
            exchange: "NSE".to_string(),
            quantity: 10,
            buy_price: Micros::from_units(100),
            holding_start: lot.trade_date,
            holding_end: jan,
            holding_days: 30,
            total_days_in_period: 31,
            position_value: Micros::from_units(1000),
            brokerage_amount: Micros::from_units(100),
            is_closed_in_period: false,
            sell_date: None,
            sell_price: None,
            formula: String::new(),
        };
        tx.insert_calculation(calc, vec![detail]).await.unwrap();

        // No fence on the row; the detail reference alone blocks the delete.
        assert_eq!(tx.find_trade(lot.id).await.unwrap().unwrap().locked_period, None);
        assert!(matches!(
            tx.delete_trade(lot.id).await,
            Err(BrokerageError::Storage { op: "delete_trade", .. })
        ));
        assert!(tx.find_trade(lot.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn allocation_fault_fires_after_budget() {
        let store = MemoryStore::new();
        store.fail_allocation_after(1);
        let mut tx = store.begin().await.unwrap();
        let alloc = |sell: TradeId, buy: TradeId| NewAllocation {
            sell_trade_id: sell,
            buy_trade_id: buy,
            client_id: 1,
            symbol: "INFY".to_string(),
            exchange: "NSE".to_string(),
            quantity_allocated: 1,
            buy_price: Micros::from_units(1),
            sell_price: Micros::from_units(1),
            buy_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            sell_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            buy_value: Micros::from_units(1),
            sell_value: Micros::from_units(1),
            profit_loss: Micros::ZERO,
            holding_days: 1,
        };
        assert!(tx.insert_allocation(alloc(10, 1)).await.is_ok());
        assert!(matches!(
            tx.insert_allocation(alloc(10, 2)).await,
            Err(BrokerageError::Storage { .. })
        ));
    }
}
