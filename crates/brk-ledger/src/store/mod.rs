//! Persistence seams.
//!
//! Three repositories (trades, allocations, calculations) are implemented by
//! one transactional handle, [`LedgerTx`]. A handle is obtained from
//! [`LedgerStore::begin`]; every change made through it becomes visible on
//! [`LedgerTx::commit`]. Dropping a handle without committing discards every
//! change made through it.

use chrono::NaiveDate;

use crate::error::Result;
use crate::period::PeriodKey;
use crate::types::{
    Allocation, BrokerageCalculation, BrokerageDetail, CalculationId, CalculationRecord, ClientId,
    NewAllocation, NewCalculation, NewDetail, NewTrade, PositionKey, Trade, TradeId,
};

pub mod memory;

pub use memory::{MemoryStore, MemoryTx};

#[async_trait::async_trait]
pub trait TradeRepository: Send {
    async fn insert_trade(&mut self, trade: NewTrade) -> Result<Trade>;

    async fn find_trade(&mut self, id: TradeId) -> Result<Option<Trade>>;

    /// Persist the mutable lot state: remaining quantity and the two flags.
    async fn save_trade_state(&mut self, trade: &Trade) -> Result<()>;

    async fn delete_trade(&mut self, id: TradeId) -> Result<()>;

    /// BUY lots of `key` with remaining quantity and `trade_date <= on_or_before`,
    /// ordered by `(trade_date, id)`.
    async fn open_lots(&mut self, key: &PositionKey, on_or_before: NaiveDate)
        -> Result<Vec<Trade>>;

    /// Every BUY of the client dated on or before `on_or_before`, consumed or
    /// not, ordered by `(trade_date, id)`.
    async fn buy_lots_for_client(
        &mut self,
        client_id: ClientId,
        on_or_before: NaiveDate,
    ) -> Result<Vec<Trade>>;

    /// Distinct clients with at least one trade, ascending.
    async fn client_ids(&mut self) -> Result<Vec<ClientId>>;

    async fn set_locked_period(&mut self, ids: &[TradeId], period: Option<PeriodKey>)
        -> Result<()>;
}

#[async_trait::async_trait]
pub trait AllocationRepository: Send {
    async fn insert_allocation(&mut self, allocation: NewAllocation) -> Result<Allocation>;

    /// Ordered by allocation id (FIFO consumption order).
    async fn allocations_for_sell(&mut self, sell_trade_id: TradeId) -> Result<Vec<Allocation>>;

    async fn allocations_for_buy(&mut self, buy_trade_id: TradeId) -> Result<Vec<Allocation>>;

    /// Returns the number of rows removed.
    async fn delete_allocations_for_sell(&mut self, sell_trade_id: TradeId) -> Result<u64>;

    /// Allocations with `from <= sell_date <= to`, ordered by `(sell_date, id)`.
    async fn client_allocations_sold_between(
        &mut self,
        client_id: ClientId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Allocation>>;

    /// Allocations with `sell_date > after`.
    async fn client_allocations_sold_after(
        &mut self,
        client_id: ClientId,
        after: NaiveDate,
    ) -> Result<Vec<Allocation>>;
}

#[async_trait::async_trait]
pub trait CalculationRepository: Send {
    async fn find_calculation(
        &mut self,
        client_id: ClientId,
        period: PeriodKey,
    ) -> Result<Option<BrokerageCalculation>>;

    /// A calculation of `client_id` whose `[period_start, period_end]`
    /// intersects `[start, end]`. Period buckets overlap (a month lies inside
    /// its quarter), so this, not the exact key, decides whether the days
    /// were already billed.
    async fn overlapping_calculation(
        &mut self,
        client_id: ClientId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<BrokerageCalculation>>;

    /// Any client's calculation intersecting `[start, end]`.
    async fn any_overlapping_calculation(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<BrokerageCalculation>>;

    /// Insert a calculation and its details. A second calculation for the same
    /// `(client_id, period)` fails with `PeriodLocked`.
    async fn insert_calculation(
        &mut self,
        calculation: NewCalculation,
        details: Vec<NewDetail>,
    ) -> Result<CalculationRecord>;

    async fn details_for(&mut self, calculation_id: CalculationId) -> Result<Vec<BrokerageDetail>>;

    /// Removes the calculation and its details.
    async fn delete_calculation(&mut self, calculation_id: CalculationId) -> Result<()>;

    /// Period of the latest-ending calculation whose details reference the
    /// trade (as buy lot or as sell).
    async fn latest_lock_for_trade(&mut self, trade_id: TradeId) -> Result<Option<PeriodKey>>;
}

/// One unit of work over all three repositories.
#[async_trait::async_trait]
pub trait LedgerTx:
    TradeRepository + AllocationRepository + CalculationRepository + Send + Sized
{
    async fn commit(self) -> Result<()>;
}

#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Tx: LedgerTx + 'static;

    async fn begin(&self) -> Result<Self::Tx>;
}

/// Recompute `locked_period` for each trade from the calculations that
/// reference it. Used after inserting and after deleting a calculation.
pub async fn refresh_locks<T: LedgerTx>(tx: &mut T, trade_ids: &[TradeId]) -> Result<()> {
    let mut ids = trade_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    for id in ids {
        let latest = tx.latest_lock_for_trade(id).await?;
        tx.set_locked_period(&[id], latest).await?;
    }
    Ok(())
}
