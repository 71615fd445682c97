//! Per-client brokerage accrual.
//!
//! A calculation has two kinds of contributing positions:
//! - buy lots still (partly) open at period end, valued at the current
//!   market price
//! - allocations whose sell falls inside the period, valued at cost
//!
//! Persisting a calculation fences every referenced trade with the period
//! (`locked_period`). Deleting the calculation lifts the fence.

use std::collections::HashMap;
use std::sync::Arc;

use brk_calendar::CalendarService;
use brk_ledger::store::refresh_locks;
use brk_ledger::{
    AccrualPeriod, Allocation, AllocationRepository, BrokerageError, CalculationRecord,
    CalculationRepository, ClientDirectory, ClientId, LedgerStore, LedgerTx, Micros,
    NewCalculation, NewDetail, RatePct, Result, StockCatalog, Trade, TradeId, TradeRepository,
};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::proration::{formula, inclusive_days, prorated_fee, DayCountBasis};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccrualConfig {
    /// Used when the client directory has no per-client rate.
    pub default_rate: RatePct,
    pub basis: DayCountBasis,
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            default_rate: RatePct::from_percent(10),
            basis: DayCountBasis::Calendar,
        }
    }
}

/// A computed but not yet persisted calculation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComputedAccrual {
    pub calculation: NewCalculation,
    pub details: Vec<NewDetail>,
}

impl ComputedAccrual {
    /// No contributing positions; nothing to persist.
    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }

    pub fn client_id(&self) -> ClientId {
        self.calculation.client_id
    }

    /// Every trade this calculation will fence.
    pub fn referenced_trades(&self) -> Vec<TradeId> {
        let mut ids: Vec<TradeId> = self
            .details
            .iter()
            .flat_map(|d| d.referenced_trades())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

pub struct AccrualEngine<S: LedgerStore> {
    store: S,
    clients: Arc<dyn ClientDirectory>,
    stocks: Arc<dyn StockCatalog>,
    calendar: Arc<CalendarService>,
    config: AccrualConfig,
}

impl<S: LedgerStore> AccrualEngine<S> {
    pub fn new(
        store: S,
        clients: Arc<dyn ClientDirectory>,
        stocks: Arc<dyn StockCatalog>,
        calendar: Arc<CalendarService>,
        config: AccrualConfig,
    ) -> Self {
        Self {
            store,
            clients,
            stocks,
            calendar,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &AccrualConfig {
        &self.config
    }

    async fn rate_for(&self, client_id: ClientId) -> Result<RatePct> {
        if !self.clients.client_exists(client_id).await? {
            return Err(BrokerageError::ClientNotFound { client_id });
        }
        Ok(self
            .clients
            .brokerage_rate(client_id)
            .await?
            .unwrap_or(self.config.default_rate))
    }

    // -----------------------------------------------------------------------
    // Day counting
    // -----------------------------------------------------------------------

    fn period_days(&self, period: &AccrualPeriod, exchange: &str) -> Result<i64> {
        match self.config.basis {
            DayCountBasis::Calendar => Ok(period.calendar_days()),
            DayCountBasis::Tradeable => match period.as_quarter() {
                Some((year, quarter)) => Ok(i64::from(
                    self.calendar.tradeable_days_in_quarter(exchange, year, quarter)?,
                )),
                None => Ok(i64::from(self.calendar.tradeable_days_between(
                    exchange,
                    period.start(),
                    period.end(),
                ))),
            },
        }
    }

    fn held_days(&self, exchange: &str, from: NaiveDate, to: NaiveDate) -> i64 {
        match self.config.basis {
            DayCountBasis::Calendar => inclusive_days(from, to),
            DayCountBasis::Tradeable => {
                i64::from(self.calendar.tradeable_days_between(exchange, from, to))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Computation
    // -----------------------------------------------------------------------

    async fn open_detail(
        &self,
        lot: &Trade,
        quantity: i64,
        period: &AccrualPeriod,
        rate: RatePct,
    ) -> Result<NewDetail> {
        let holding_start = lot.trade_date.max(period.start());
        let total_days = self.period_days(period, &lot.exchange)?;
        let holding_days = if lot.trade_date == period.end() {
            0
        } else {
            self.held_days(&lot.exchange, holding_start, period.end())
                .min(total_days)
        };

        let price = self
            .stocks
            .current_price(&lot.symbol, &lot.exchange)
            .await?
            .ok_or_else(|| BrokerageError::StockNotFound {
                symbol: lot.symbol.clone(),
                exchange: lot.exchange.clone(),
            })?;
        let position_value = price.checked_mul_qty(quantity).ok_or_else(|| {
            BrokerageError::invalid_trade(format!("position value overflows on trade {}", lot.id))
        })?;
        let fee = prorated_fee(position_value, rate, holding_days, total_days);

        Ok(NewDetail {
            trade_id: lot.id,
            sell_trade_id: None,
            symbol: lot.symbol.clone(),
            exchange: lot.exchange.clone(),
            quantity,
            buy_price: lot.price,
            holding_start,
            holding_end: period.end(),
            holding_days,
            total_days_in_period: total_days,
            position_value,
            brokerage_amount: fee,
            is_closed_in_period: false,
            sell_date: None,
            sell_price: None,
            formula: formula(position_value, rate, holding_days, total_days, fee),
        })
    }

    fn closed_detail(
        &self,
        a: &Allocation,
        period: &AccrualPeriod,
        rate: RatePct,
    ) -> Result<NewDetail> {
        let holding_start = a.buy_date.max(period.start());
        let total_days = self.period_days(period, &a.exchange)?;
        let holding_days = self.held_days(&a.exchange, holding_start, a.sell_date);
        let fee = prorated_fee(a.buy_value, rate, holding_days, total_days);

        Ok(NewDetail {
            trade_id: a.buy_trade_id,
            sell_trade_id: Some(a.sell_trade_id),
            symbol: a.symbol.clone(),
            exchange: a.exchange.clone(),
            quantity: a.quantity_allocated,
            buy_price: a.buy_price,
            holding_start,
            holding_end: a.sell_date,
            holding_days,
            total_days_in_period: total_days,
            position_value: a.buy_value,
            brokerage_amount: fee,
            is_closed_in_period: true,
            sell_date: Some(a.sell_date),
            sell_price: Some(a.sell_price),
            formula: formula(a.buy_value, rate, holding_days, total_days, fee),
        })
    }

    /// Compute a client's calculation for `period` inside `tx` without
    /// writing anything.
    pub async fn compute(
        &self,
        tx: &mut S::Tx,
        client_id: ClientId,
        period: &AccrualPeriod,
        rate: RatePct,
    ) -> Result<ComputedAccrual> {
        let end = period.end();

        // Quantity sold after period end was still held at period end.
        let mut sold_later: HashMap<TradeId, i64> = HashMap::new();
        for a in tx.client_allocations_sold_after(client_id, end).await? {
            *sold_later.entry(a.buy_trade_id).or_default() += a.quantity_allocated;
        }

        let mut details = Vec::new();
        for lot in tx.buy_lots_for_client(client_id, end).await? {
            let held_at_end =
                lot.remaining_quantity + sold_later.get(&lot.id).copied().unwrap_or(0);
            if held_at_end <= 0 {
                continue;
            }
            details.push(self.open_detail(&lot, held_at_end, period, rate).await?);
        }

        for a in tx
            .client_allocations_sold_between(client_id, period.start(), end)
            .await?
        {
            if a.buy_date == a.sell_date {
                continue;
            }
            details.push(self.closed_detail(&a, period, rate)?);
        }

        let total_holding_value: Micros = details.iter().map(|d| d.position_value).sum();
        let total_holding_days: i64 = details.iter().map(|d| d.holding_days).sum();
        let brokerage_amount: Micros = details.iter().map(|d| d.brokerage_amount).sum();

        debug!(
            client_id,
            period = %period,
            positions = details.len(),
            brokerage = %brokerage_amount,
            "accrual computed"
        );

        Ok(ComputedAccrual {
            calculation: NewCalculation {
                client_id,
                period: period.key(),
                period_start: period.start(),
                period_end: end,
                total_holding_value,
                total_holding_days,
                rate,
                brokerage_amount,
                total_positions: details.len() as i64,
                calculated_at: Utc::now(),
            },
            details,
        })
    }

    /// Compute in a read-only unit of work (rolled back on return).
    pub async fn compute_for_client(
        &self,
        client_id: ClientId,
        period: &AccrualPeriod,
    ) -> Result<ComputedAccrual> {
        let rate = self.rate_for(client_id).await?;
        let mut tx = self.store.begin().await?;
        self.compute(&mut tx, client_id, period, rate).await
    }

    /// Refuse when any stored calculation of the client covers a day of
    /// `period`, whatever its bucket.
    pub async fn ensure_unbilled(
        tx: &mut S::Tx,
        client_id: ClientId,
        period: &AccrualPeriod,
    ) -> Result<()> {
        match tx
            .overlapping_calculation(client_id, period.start(), period.end())
            .await?
        {
            Some(existing) => Err(BrokerageError::PeriodLocked {
                period: existing.period,
                trade_id: None,
                client_id: Some(client_id),
            }),
            None => Ok(()),
        }
    }

    /// Persist a computed calculation and fence the trades it references.
    /// `computed` must come from `tx` itself.
    async fn persist(tx: &mut S::Tx, computed: ComputedAccrual) -> Result<CalculationRecord> {
        let trades = computed.referenced_trades();
        let record = tx
            .insert_calculation(computed.calculation, computed.details)
            .await?;
        refresh_locks(tx, &trades).await?;
        Ok(record)
    }

    /// Write a calculation computed in an earlier unit of work.
    ///
    /// The client is computed again inside `tx` (same rate) and that result
    /// is persisted, so trades recorded or changed since `computed` was taken
    /// are priced and fenced. `Ok(None)` when nothing is left to accrue.
    pub async fn persist_recomputed(
        &self,
        tx: &mut S::Tx,
        computed: ComputedAccrual,
    ) -> Result<Option<CalculationRecord>> {
        let client_id = computed.client_id();
        let period = AccrualPeriod::from_key(computed.calculation.period)?;
        Self::ensure_unbilled(tx, client_id, &period).await?;

        let fresh = self
            .compute(tx, client_id, &period, computed.calculation.rate)
            .await?;
        if fresh.details != computed.details {
            debug!(
                client_id,
                period = %period,
                "ledger changed since compute; writing fresh calculation"
            );
        }
        if fresh.is_empty() {
            return Ok(None);
        }
        Self::persist(tx, fresh).await.map(Some)
    }

    /// Calculate and persist. `Ok(None)` when the client had no contributing
    /// positions in the period. Refused with `PeriodLocked` when a stored
    /// calculation of the client already covers any day of the period.
    pub async fn calculate_for_client(
        &self,
        client_id: ClientId,
        period: &AccrualPeriod,
    ) -> Result<Option<CalculationRecord>> {
        let rate = self.rate_for(client_id).await?;

        let mut tx = self.store.begin().await?;
        Self::ensure_unbilled(&mut tx, client_id, period).await?;

        let computed = self.compute(&mut tx, client_id, period, rate).await?;
        if computed.is_empty() {
            debug!(client_id, period = %period, "no positions; nothing to accrue");
            return Ok(None);
        }

        let record = Self::persist(&mut tx, computed).await?;
        tx.commit().await?;

        info!(
            client_id,
            period = %period,
            positions = record.details.len(),
            brokerage = %record.calculation.brokerage_amount,
            "brokerage calculated"
        );
        Ok(Some(record))
    }

    /// Compute without persisting or locking anything.
    pub async fn preview(&self, client_id: ClientId, period: &AccrualPeriod) -> Result<ComputedAccrual> {
        self.compute_for_client(client_id, period).await
    }

    /// Stored calculation with details.
    pub async fn get_calculation(
        &self,
        client_id: ClientId,
        period: &AccrualPeriod,
    ) -> Result<CalculationRecord> {
        let mut tx = self.store.begin().await?;
        let calculation = tx
            .find_calculation(client_id, period.key())
            .await?
            .ok_or(BrokerageError::CalculationNotFound {
                client_id,
                period: period.key(),
            })?;
        let details = tx.details_for(calculation.id).await?;
        Ok(CalculationRecord {
            calculation,
            details,
        })
    }

    /// Delete a calculation and recompute the fence on every trade it
    /// referenced. Returns what was deleted.
    pub async fn delete_calculation(
        &self,
        client_id: ClientId,
        period: &AccrualPeriod,
    ) -> Result<CalculationRecord> {
        let mut tx = self.store.begin().await?;
        let calculation = tx
            .find_calculation(client_id, period.key())
            .await?
            .ok_or(BrokerageError::CalculationNotFound {
                client_id,
                period: period.key(),
            })?;
        let details = tx.details_for(calculation.id).await?;

        let mut trades: Vec<TradeId> = Vec::new();
        for d in &details {
            trades.push(d.trade_id);
            trades.extend(d.sell_trade_id);
        }

        tx.delete_calculation(calculation.id).await?;
        refresh_locks(&mut tx, &trades).await?;
        tx.commit().await?;

        info!(
            client_id,
            period = %period,
            unlocked = trades.len(),
            "brokerage calculation deleted"
        );
        Ok(CalculationRecord {
            calculation,
            details,
        })
    }
}
