//! Trade lifecycle: record, update, delete.
//!
//! Every mutation runs as one unit of work under the per-position mutex of
//! each position it touches. SELLs are allocated in the same unit of work
//! that inserts them, so an unallocated SELL is never visible.

use std::sync::Arc;

use tracing::info;

use crate::directory::{ClientDirectory, StockCatalog};
use crate::error::{BrokerageError, Result};
use crate::fifo::{self, ConservationReport};
use crate::locks::{KeyGuard, KeyedLocks};
use crate::store::{AllocationRepository, LedgerStore, LedgerTx, TradeRepository};
use crate::types::{Allocation, NewTrade, PositionKey, Side, Trade, TradeChanges, TradeId, TradeInput};

pub struct TradeLedger<S: LedgerStore> {
    store: S,
    clients: Arc<dyn ClientDirectory>,
    stocks: Arc<dyn StockCatalog>,
    locks: KeyedLocks,
}

impl<S: LedgerStore> TradeLedger<S> {
    pub fn new(store: S, clients: Arc<dyn ClientDirectory>, stocks: Arc<dyn StockCatalog>) -> Self {
        Self {
            store,
            clients,
            stocks,
            locks: KeyedLocks::new(),
        }
    }

    /// Share a lock arena with other components mutating the same book.
    pub fn with_locks(mut self, locks: KeyedLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    async fn validate(&self, input: TradeInput) -> Result<NewTrade> {
        let trade = input.into_new_trade()?;
        if !self.clients.client_exists(trade.client_id).await? {
            return Err(BrokerageError::ClientNotFound {
                client_id: trade.client_id,
            });
        }
        if !self.stocks.stock_exists(&trade.symbol, &trade.exchange).await? {
            return Err(BrokerageError::StockNotFound {
                symbol: trade.symbol.clone(),
                exchange: trade.exchange.clone(),
            });
        }
        Ok(trade)
    }

    /// Insert (and for a SELL, allocate) inside an open unit of work.
    async fn insert_in(tx: &mut S::Tx, trade: NewTrade) -> Result<Trade> {
        let row = tx.insert_trade(trade).await?;
        if row.side == Side::Sell {
            let allocations = fifo::allocate(tx, &row).await?;
            info!(
                sell = row.id,
                lots = allocations.len(),
                quantity = row.quantity,
                "sell allocated"
            );
            return tx
                .find_trade(row.id)
                .await?
                .ok_or(BrokerageError::TradeNotFound { trade_id: row.id });
        }
        Ok(row)
    }

    pub async fn record(&self, input: TradeInput) -> Result<Trade> {
        let trade = self.validate(input).await?;
        let _guard = self.locks.acquire(&trade.key()).await;

        let mut tx = self.store.begin().await?;
        let row = Self::insert_in(&mut tx, trade).await?;
        tx.commit().await?;

        info!(
            trade_id = row.id,
            client_id = row.client_id,
            side = %row.side,
            symbol = %row.symbol,
            exchange = %row.exchange,
            quantity = row.quantity,
            price = %row.price,
            "trade recorded"
        );
        Ok(row)
    }

    /// Lock the position of trade `id`, plus `extra`, and return the trade as
    /// seen under the lock.
    async fn lock_trade(
        &self,
        id: TradeId,
        extra: Option<PositionKey>,
    ) -> Result<(KeyGuard, Trade)> {
        loop {
            let key = self.get(id).await?.key();
            let guard = self
                .locks
                .acquire_many(std::iter::once(key.clone()).chain(extra.clone()))
                .await;
            // The trade may have been replaced while we waited.
            let current = self.get(id).await?;
            if current.key() == key {
                return Ok((guard, current));
            }
        }
    }

    fn ensure_unlocked(trade: &Trade) -> Result<()> {
        match trade.locked_period {
            Some(period) => Err(BrokerageError::PeriodLocked {
                period,
                trade_id: Some(trade.id),
                client_id: Some(trade.client_id),
            }),
            None => Ok(()),
        }
    }

    /// Trade `id` as seen by `tx`, refused if a calculation fences it.
    /// Accrual does not take position locks, so the fence is read again
    /// inside the unit of work that mutates the trade.
    async fn unlocked_in(tx: &mut S::Tx, id: TradeId) -> Result<Trade> {
        let trade = tx
            .find_trade(id)
            .await?
            .ok_or(BrokerageError::TradeNotFound { trade_id: id })?;
        Self::ensure_unlocked(&trade)?;
        Ok(trade)
    }

    /// Replace trade `id` with its values merged with `changes`.
    ///
    /// The old trade is reversed and deleted and the merged trade recorded
    /// in one unit of work; the result carries a new id.
    pub async fn update(&self, id: TradeId, changes: TradeChanges) -> Result<Trade> {
        let current = self.get(id).await?;
        Self::ensure_unlocked(&current)?;
        let replacement = self.validate(changes.apply_to(&current)).await?;

        let (_guard, current) = self.lock_trade(id, Some(replacement.key())).await?;
        Self::ensure_unlocked(&current)?;

        let mut tx = self.store.begin().await?;
        let current = Self::unlocked_in(&mut tx, id).await?;
        fifo::reverse(&mut tx, &current).await?;
        tx.delete_trade(id).await?;
        let row = Self::insert_in(&mut tx, replacement).await?;
        tx.commit().await?;

        info!(old_id = id, new_id = row.id, "trade updated");
        Ok(row)
    }

    pub async fn delete(&self, id: TradeId) -> Result<()> {
        let (_guard, current) = self.lock_trade(id, None).await?;
        Self::ensure_unlocked(&current)?;

        let mut tx = self.store.begin().await?;
        let current = Self::unlocked_in(&mut tx, id).await?;
        let removed = fifo::reverse(&mut tx, &current).await?;
        tx.delete_trade(id).await?;
        tx.commit().await?;

        info!(trade_id = id, reversed = removed.len(), "trade deleted");
        Ok(())
    }

    pub async fn get(&self, id: TradeId) -> Result<Trade> {
        let mut tx = self.store.begin().await?;
        tx.find_trade(id)
            .await?
            .ok_or(BrokerageError::TradeNotFound { trade_id: id })
    }

    /// Allocations the trade takes part in, as buyer or as seller.
    pub async fn allocations_for(&self, id: TradeId) -> Result<Vec<Allocation>> {
        let mut tx = self.store.begin().await?;
        let trade = tx
            .find_trade(id)
            .await?
            .ok_or(BrokerageError::TradeNotFound { trade_id: id })?;
        match trade.side {
            Side::Buy => tx.allocations_for_buy(id).await,
            Side::Sell => tx.allocations_for_sell(id).await,
        }
    }

    pub async fn verify(&self, id: TradeId) -> Result<ConservationReport> {
        let mut tx = self.store.begin().await?;
        fifo::verify_conservation(&mut tx, id).await
    }
}
