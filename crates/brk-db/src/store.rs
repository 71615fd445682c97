//! Ledger unit of work over a Postgres transaction.
//!
//! Open lots are read `for update` so concurrent sells of the same position
//! serialize in the database as well as in the process. Dropping a [`PgTx`]
//! without committing rolls the transaction back.

use brk_ledger::{
    Allocation, AllocationRepository, BrokerageCalculation, BrokerageDetail, BrokerageError,
    CalculationId, CalculationRecord, CalculationRepository, ClientId, LedgerStore, LedgerTx,
    Micros, NewAllocation, NewCalculation, NewDetail, NewTrade, PeriodKey, PositionKey, RatePct,
    Result, Side, Trade, TradeId, TradeRepository,
};
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl LedgerStore for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx> {
        let tx = self.pool.begin().await.map_err(storage("begin"))?;
        Ok(PgTx { tx })
    }
}

// ---------------------------------------------------------------------------
// Error + row mapping
// ---------------------------------------------------------------------------

fn storage(op: &'static str) -> impl Fn(sqlx::Error) -> BrokerageError {
    move |e| BrokerageError::storage(op, e)
}

/// Postgres unique_violation (23505) on the named constraint.
fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

const TRADE_COLUMNS: &str = "trade_id, client_id, symbol, exchange, side, quantity, \
    price_micros, trade_date, charges_micros, net_amount_micros, remaining_quantity, \
    is_fully_consumed, sell_fully_allocated, locked_period";

const ALLOCATION_COLUMNS: &str = "allocation_id, sell_trade_id, buy_trade_id, client_id, \
    symbol, exchange, quantity_allocated, buy_price_micros, sell_price_micros, buy_date, \
    sell_date, buy_value_micros, sell_value_micros, profit_loss_micros, holding_days";

const CALCULATION_COLUMNS: &str = "calculation_id, client_id, period_key, period_start, \
    period_end, total_holding_value_micros, total_holding_days, rate_micros, \
    brokerage_amount_micros, total_positions, calculated_at_utc";

const DETAIL_COLUMNS: &str = "detail_id, calculation_id, trade_id, sell_trade_id, symbol, \
    exchange, quantity, buy_price_micros, holding_start, holding_end, holding_days, \
    total_days_in_period, position_value_micros, brokerage_amount_micros, \
    is_closed_in_period, sell_date, sell_price_micros, formula";

fn parse_period(op: &'static str, s: &str) -> Result<PeriodKey> {
    s.parse::<PeriodKey>()
        .map_err(|e| BrokerageError::storage(op, format!("bad period_key {s:?}: {e}")))
}

fn trade_from_row(r: &PgRow) -> Result<Trade> {
    let decode = storage("decode trade");
    let side: String = r.try_get("side").map_err(&decode)?;
    let locked: Option<String> = r.try_get("locked_period").map_err(&decode)?;
    Ok(Trade {
        id: r.try_get("trade_id").map_err(&decode)?,
        client_id: r.try_get("client_id").map_err(&decode)?,
        symbol: r.try_get("symbol").map_err(&decode)?,
        exchange: r.try_get("exchange").map_err(&decode)?,
        side: Side::parse(&side)
            .map_err(|e| BrokerageError::storage("decode trade", e))?,
        quantity: r.try_get("quantity").map_err(&decode)?,
        price: Micros::new(r.try_get("price_micros").map_err(&decode)?),
        trade_date: r.try_get("trade_date").map_err(&decode)?,
        charges: Micros::new(r.try_get("charges_micros").map_err(&decode)?),
        net_amount: Micros::new(r.try_get("net_amount_micros").map_err(&decode)?),
        remaining_quantity: r.try_get("remaining_quantity").map_err(&decode)?,
        is_fully_consumed: r.try_get("is_fully_consumed").map_err(&decode)?,
        sell_fully_allocated: r.try_get("sell_fully_allocated").map_err(&decode)?,
        locked_period: locked
            .as_deref()
            .map(|s| parse_period("decode trade", s))
            .transpose()?,
    })
}

fn allocation_from_row(r: &PgRow) -> Result<Allocation> {
    let decode = storage("decode allocation");
    Ok(Allocation {
        id: r.try_get("allocation_id").map_err(&decode)?,
        sell_trade_id: r.try_get("sell_trade_id").map_err(&decode)?,
        buy_trade_id: r.try_get("buy_trade_id").map_err(&decode)?,
        client_id: r.try_get("client_id").map_err(&decode)?,
        symbol: r.try_get("symbol").map_err(&decode)?,
        exchange: r.try_get("exchange").map_err(&decode)?,
        quantity_allocated: r.try_get("quantity_allocated").map_err(&decode)?,
        buy_price: Micros::new(r.try_get("buy_price_micros").map_err(&decode)?),
        sell_price: Micros::new(r.try_get("sell_price_micros").map_err(&decode)?),
        buy_date: r.try_get("buy_date").map_err(&decode)?,
        sell_date: r.try_get("sell_date").map_err(&decode)?,
        buy_value: Micros::new(r.try_get("buy_value_micros").map_err(&decode)?),
        sell_value: Micros::new(r.try_get("sell_value_micros").map_err(&decode)?),
        profit_loss: Micros::new(r.try_get("profit_loss_micros").map_err(&decode)?),
        holding_days: r.try_get("holding_days").map_err(&decode)?,
    })
}

fn calculation_from_row(r: &PgRow) -> Result<BrokerageCalculation> {
    let decode = storage("decode calculation");
    let period: String = r.try_get("period_key").map_err(&decode)?;
    Ok(BrokerageCalculation {
        id: r.try_get("calculation_id").map_err(&decode)?,
        client_id: r.try_get("client_id").map_err(&decode)?,
        period: parse_period("decode calculation", &period)?,
        period_start: r.try_get("period_start").map_err(&decode)?,
        period_end: r.try_get("period_end").map_err(&decode)?,
        total_holding_value: Micros::new(r.try_get("total_holding_value_micros").map_err(&decode)?),
        total_holding_days: r.try_get("total_holding_days").map_err(&decode)?,
        rate: RatePct::new(r.try_get("rate_micros").map_err(&decode)?),
        brokerage_amount: Micros::new(r.try_get("brokerage_amount_micros").map_err(&decode)?),
        total_positions: r.try_get("total_positions").map_err(&decode)?,
        calculated_at: r.try_get("calculated_at_utc").map_err(&decode)?,
    })
}

fn detail_from_row(r: &PgRow) -> Result<BrokerageDetail> {
    let decode = storage("decode detail");
    let sell_price: Option<i64> = r.try_get("sell_price_micros").map_err(&decode)?;
    Ok(BrokerageDetail {
        id: r.try_get("detail_id").map_err(&decode)?,
        calculation_id: r.try_get("calculation_id").map_err(&decode)?,
        trade_id: r.try_get("trade_id").map_err(&decode)?,
        sell_trade_id: r.try_get("sell_trade_id").map_err(&decode)?,
        symbol: r.try_get("symbol").map_err(&decode)?,
        exchange: r.try_get("exchange").map_err(&decode)?,
        quantity: r.try_get("quantity").map_err(&decode)?,
        buy_price: Micros::new(r.try_get("buy_price_micros").map_err(&decode)?),
        holding_start: r.try_get("holding_start").map_err(&decode)?,
        holding_end: r.try_get("holding_end").map_err(&decode)?,
        holding_days: r.try_get("holding_days").map_err(&decode)?,
        total_days_in_period: r.try_get("total_days_in_period").map_err(&decode)?,
        position_value: Micros::new(r.try_get("position_value_micros").map_err(&decode)?),
        brokerage_amount: Micros::new(r.try_get("brokerage_amount_micros").map_err(&decode)?),
        is_closed_in_period: r.try_get("is_closed_in_period").map_err(&decode)?,
        sell_date: r.try_get("sell_date").map_err(&decode)?,
        sell_price: sell_price.map(Micros::new),
        formula: r.try_get("formula").map_err(&decode)?,
    })
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl TradeRepository for PgTx {
    async fn insert_trade(&mut self, t: NewTrade) -> Result<Trade> {
        let sql = format!(
            r#"
            insert into trades (
              client_id, symbol, exchange, side, quantity, price_micros, trade_date,
              charges_micros, net_amount_micros, remaining_quantity
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            returning {TRADE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(t.client_id)
            .bind(&t.symbol)
            .bind(&t.exchange)
            .bind(t.side.as_str())
            .bind(t.quantity)
            .bind(t.price.raw())
            .bind(t.trade_date)
            .bind(t.charges.raw())
            .bind(t.net_amount.raw())
            .bind(t.remaining_quantity)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(storage("insert_trade"))?;
        trade_from_row(&row)
    }

    async fn find_trade(&mut self, id: TradeId) -> Result<Option<Trade>> {
        let sql = format!("select {TRADE_COLUMNS} from trades where trade_id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(storage("find_trade"))?;
        row.as_ref().map(trade_from_row).transpose()
    }

    async fn save_trade_state(&mut self, trade: &Trade) -> Result<()> {
        let res = sqlx::query(
            r#"
            update trades
               set remaining_quantity = $2,
                   is_fully_consumed = $3,
                   sell_fully_allocated = $4
             where trade_id = $1
            "#,
        )
        .bind(trade.id)
        .bind(trade.remaining_quantity)
        .bind(trade.is_fully_consumed)
        .bind(trade.sell_fully_allocated)
        .execute(&mut *self.tx)
        .await
        .map_err(storage("save_trade_state"))?;
        if res.rows_affected() == 0 {
            return Err(BrokerageError::TradeNotFound { trade_id: trade.id });
        }
        Ok(())
    }

    async fn delete_trade(&mut self, id: TradeId) -> Result<()> {
        let res = sqlx::query("delete from trades where trade_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(storage("delete_trade"))?;
        if res.rows_affected() == 0 {
            return Err(BrokerageError::TradeNotFound { trade_id: id });
        }
        Ok(())
    }

    async fn open_lots(&mut self, key: &PositionKey, on_or_before: NaiveDate) -> Result<Vec<Trade>> {
        let sql = format!(
            r#"
            select {TRADE_COLUMNS}
              from trades
             where client_id = $1
               and symbol = $2
               and exchange = $3
               and side = 'BUY'
               and remaining_quantity > 0
               and trade_date <= $4
             order by trade_date asc, trade_id asc
             for update
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(key.client_id)
            .bind(&key.symbol)
            .bind(&key.exchange)
            .bind(on_or_before)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(storage("open_lots"))?;
        rows.iter().map(trade_from_row).collect()
    }

    async fn buy_lots_for_client(
        &mut self,
        client_id: ClientId,
        on_or_before: NaiveDate,
    ) -> Result<Vec<Trade>> {
        let sql = format!(
            r#"
            select {TRADE_COLUMNS}
              from trades
             where client_id = $1
               and side = 'BUY'
               and trade_date <= $2
             order by trade_date asc, trade_id asc
             for share
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(client_id)
            .bind(on_or_before)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(storage("buy_lots_for_client"))?;
        rows.iter().map(trade_from_row).collect()
    }

    async fn client_ids(&mut self) -> Result<Vec<ClientId>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("select distinct client_id from trades order by client_id asc")
                .fetch_all(&mut *self.tx)
                .await
                .map_err(storage("client_ids"))?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn set_locked_period(&mut self, ids: &[TradeId], period: Option<PeriodKey>) -> Result<()> {
        sqlx::query("update trades set locked_period = $1 where trade_id = any($2)")
            .bind(period.map(|p| p.to_string()))
            .bind(ids.to_vec())
            .execute(&mut *self.tx)
            .await
            .map_err(storage("set_locked_period"))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Allocations
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl AllocationRepository for PgTx {
    async fn insert_allocation(&mut self, a: NewAllocation) -> Result<Allocation> {
        let sql = format!(
            r#"
            insert into allocations (
              sell_trade_id, buy_trade_id, client_id, symbol, exchange, quantity_allocated,
              buy_price_micros, sell_price_micros, buy_date, sell_date, buy_value_micros,
              sell_value_micros, profit_loss_micros, holding_days
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            returning {ALLOCATION_COLUMNS}
            "#
        );
        let res = sqlx::query(&sql)
            .bind(a.sell_trade_id)
            .bind(a.buy_trade_id)
            .bind(a.client_id)
            .bind(&a.symbol)
            .bind(&a.exchange)
            .bind(a.quantity_allocated)
            .bind(a.buy_price.raw())
            .bind(a.sell_price.raw())
            .bind(a.buy_date)
            .bind(a.sell_date)
            .bind(a.buy_value.raw())
            .bind(a.sell_value.raw())
            .bind(a.profit_loss.raw())
            .bind(a.holding_days)
            .fetch_one(&mut *self.tx)
            .await;

        match res {
            Ok(row) => allocation_from_row(&row),
            Err(e) if is_unique_constraint_violation(&e, "uq_allocation_pair") => {
                Err(BrokerageError::AllocationConflict {
                    trade_id: a.sell_trade_id,
                    reason: format!("already allocated against buy {}", a.buy_trade_id),
                })
            }
            Err(e) => Err(BrokerageError::storage("insert_allocation", e)),
        }
    }

    async fn allocations_for_sell(&mut self, sell_trade_id: TradeId) -> Result<Vec<Allocation>> {
        let sql = format!(
            "select {ALLOCATION_COLUMNS} from allocations where sell_trade_id = $1 \
             order by allocation_id asc"
        );
        let rows = sqlx::query(&sql)
            .bind(sell_trade_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(storage("allocations_for_sell"))?;
        rows.iter().map(allocation_from_row).collect()
    }

    async fn allocations_for_buy(&mut self, buy_trade_id: TradeId) -> Result<Vec<Allocation>> {
        let sql = format!(
            "select {ALLOCATION_COLUMNS} from allocations where buy_trade_id = $1 \
             order by allocation_id asc"
        );
        let rows = sqlx::query(&sql)
            .bind(buy_trade_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(storage("allocations_for_buy"))?;
        rows.iter().map(allocation_from_row).collect()
    }

    async fn delete_allocations_for_sell(&mut self, sell_trade_id: TradeId) -> Result<u64> {
        let res = sqlx::query("delete from allocations where sell_trade_id = $1")
            .bind(sell_trade_id)
            .execute(&mut *self.tx)
            .await
            .map_err(storage("delete_allocations_for_sell"))?;
        Ok(res.rows_affected())
    }

    async fn client_allocations_sold_between(
        &mut self,
        client_id: ClientId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Allocation>> {
        let sql = format!(
            r#"
            select {ALLOCATION_COLUMNS}
              from allocations
             where client_id = $1
               and sell_date >= $2
               and sell_date <= $3
             order by sell_date asc, allocation_id asc
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(client_id)
            .bind(from)
            .bind(to)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(storage("client_allocations_sold_between"))?;
        rows.iter().map(allocation_from_row).collect()
    }

    async fn client_allocations_sold_after(
        &mut self,
        client_id: ClientId,
        after: NaiveDate,
    ) -> Result<Vec<Allocation>> {
        let sql = format!(
            r#"
            select {ALLOCATION_COLUMNS}
              from allocations
             where client_id = $1
               and sell_date > $2
             order by sell_date asc, allocation_id asc
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(client_id)
            .bind(after)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(storage("client_allocations_sold_after"))?;
        rows.iter().map(allocation_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Calculations
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl CalculationRepository for PgTx {
    async fn find_calculation(
        &mut self,
        client_id: ClientId,
        period: PeriodKey,
    ) -> Result<Option<BrokerageCalculation>> {
        let sql = format!(
            "select {CALCULATION_COLUMNS} from brokerage_calculations \
             where client_id = $1 and period_key = $2"
        );
        let row = sqlx::query(&sql)
            .bind(client_id)
            .bind(period.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(storage("find_calculation"))?;
        row.as_ref().map(calculation_from_row).transpose()
    }

    async fn overlapping_calculation(
        &mut self,
        client_id: ClientId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<BrokerageCalculation>> {
        // Serializes check-then-insert per client until commit.
        sqlx::query("select pg_advisory_xact_lock($1)")
            .bind(client_id)
            .execute(&mut *self.tx)
            .await
            .map_err(storage("overlapping_calculation"))?;

        let sql = format!(
            "select {CALCULATION_COLUMNS} from brokerage_calculations \
             where client_id = $1 and period_start <= $3 and $2 <= period_end \
             order by period_end asc, calculation_id asc limit 1"
        );
        let row = sqlx::query(&sql)
            .bind(client_id)
            .bind(start)
            .bind(end)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(storage("overlapping_calculation"))?;
        row.as_ref().map(calculation_from_row).transpose()
    }

    async fn any_overlapping_calculation(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<BrokerageCalculation>> {
        let sql = format!(
            "select {CALCULATION_COLUMNS} from brokerage_calculations \
             where period_start <= $2 and $1 <= period_end \
             order by period_end asc, calculation_id asc limit 1"
        );
        let row = sqlx::query(&sql)
            .bind(start)
            .bind(end)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(storage("any_overlapping_calculation"))?;
        row.as_ref().map(calculation_from_row).transpose()
    }

    async fn insert_calculation(
        &mut self,
        c: NewCalculation,
        details: Vec<NewDetail>,
    ) -> Result<CalculationRecord> {
        let sql = format!(
            r#"
            insert into brokerage_calculations (
              client_id, period_key, period_start, period_end, total_holding_value_micros,
              total_holding_days, rate_micros, brokerage_amount_micros, total_positions,
              calculated_at_utc
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            returning {CALCULATION_COLUMNS}
            "#
        );
        let res = sqlx::query(&sql)
            .bind(c.client_id)
            .bind(c.period.to_string())
            .bind(c.period_start)
            .bind(c.period_end)
            .bind(c.total_holding_value.raw())
            .bind(c.total_holding_days)
            .bind(c.rate.raw())
            .bind(c.brokerage_amount.raw())
            .bind(c.total_positions)
            .bind(c.calculated_at)
            .fetch_one(&mut *self.tx)
            .await;

        let row = match res {
            Ok(row) => row,
            Err(e) if is_unique_constraint_violation(&e, "uq_calc_client_period") => {
                return Err(BrokerageError::PeriodLocked {
                    period: c.period,
                    trade_id: None,
                    client_id: Some(c.client_id),
                });
            }
            Err(e) => return Err(BrokerageError::storage("insert_calculation", e)),
        };
        let calculation = calculation_from_row(&row)?;

        let detail_sql = format!(
            r#"
            insert into brokerage_details (
              calculation_id, trade_id, sell_trade_id, symbol, exchange, quantity,
              buy_price_micros, holding_start, holding_end, holding_days, total_days_in_period,
              position_value_micros, brokerage_amount_micros, is_closed_in_period, sell_date,
              sell_price_micros, formula
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            returning {DETAIL_COLUMNS}
            "#
        );
        let mut rows = Vec::with_capacity(details.len());
        for d in details {
            let row = sqlx::query(&detail_sql)
                .bind(calculation.id)
                .bind(d.trade_id)
                .bind(d.sell_trade_id)
                .bind(&d.symbol)
                .bind(&d.exchange)
                .bind(d.quantity)
                .bind(d.buy_price.raw())
                .bind(d.holding_start)
                .bind(d.holding_end)
                .bind(d.holding_days)
                .bind(d.total_days_in_period)
                .bind(d.position_value.raw())
                .bind(d.brokerage_amount.raw())
                .bind(d.is_closed_in_period)
                .bind(d.sell_date)
                .bind(d.sell_price.map(Micros::raw))
                .bind(&d.formula)
                .fetch_one(&mut *self.tx)
                .await
                .map_err(storage("insert_detail"))?;
            rows.push(detail_from_row(&row)?);
        }

        Ok(CalculationRecord {
            calculation,
            details: rows,
        })
    }

    async fn details_for(&mut self, calculation_id: CalculationId) -> Result<Vec<BrokerageDetail>> {
        let sql = format!(
            "select {DETAIL_COLUMNS} from brokerage_details where calculation_id = $1 \
             order by detail_id asc"
        );
        let rows = sqlx::query(&sql)
            .bind(calculation_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(storage("details_for"))?;
        rows.iter().map(detail_from_row).collect()
    }

    async fn delete_calculation(&mut self, calculation_id: CalculationId) -> Result<()> {
        // Details go with it (on delete cascade).
        sqlx::query("delete from brokerage_calculations where calculation_id = $1")
            .bind(calculation_id)
            .execute(&mut *self.tx)
            .await
            .map_err(storage("delete_calculation"))?;
        Ok(())
    }

    async fn latest_lock_for_trade(&mut self, trade_id: TradeId) -> Result<Option<PeriodKey>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            select c.period_key
              from brokerage_calculations c
             where exists (
                   select 1
                     from brokerage_details d
                    where d.calculation_id = c.calculation_id
                      and (d.trade_id = $1 or d.sell_trade_id = $1)
             )
             order by c.period_end desc, c.calculation_id desc
             limit 1
            "#,
        )
        .bind(trade_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage("latest_lock_for_trade"))?;
        row.map(|(p,)| parse_period("latest_lock_for_trade", &p))
            .transpose()
    }
}

#[async_trait::async_trait]
impl LedgerTx for PgTx {
    async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(storage("commit"))
    }
}
