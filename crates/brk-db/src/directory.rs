//! Clients and stocks lookup tables.
//!
//! The ledger only reads these; the upserts exist for operators and tests
//! seeding a fresh database.

use anyhow::Context;
use brk_ledger::{
    BrokerageError, ClientDirectory, ClientId, Micros, RatePct, Result, StockCatalog,
};
use sqlx::PgPool;

#[derive(Clone, Debug)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_client(
        &self,
        client_id: ClientId,
        name: &str,
        rate: Option<RatePct>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            insert into clients (client_id, name, brokerage_rate_micros)
            values ($1, $2, $3)
            on conflict (client_id) do update
               set name = excluded.name,
                   brokerage_rate_micros = excluded.brokerage_rate_micros
            "#,
        )
        .bind(client_id)
        .bind(name)
        .bind(rate.map(RatePct::raw))
        .execute(&self.pool)
        .await
        .context("upsert_client failed")?;
        Ok(())
    }

    pub async fn upsert_stock(
        &self,
        symbol: &str,
        exchange: &str,
        current_price: Option<Micros>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            insert into stocks (symbol, exchange, current_price_micros)
            values ($1, $2, $3)
            on conflict (symbol, exchange) do update
               set current_price_micros = excluded.current_price_micros
            "#,
        )
        .bind(symbol)
        .bind(exchange)
        .bind(current_price.map(Micros::raw))
        .execute(&self.pool)
        .await
        .context("upsert_stock failed")?;
        Ok(())
    }
}

fn lookup(op: &'static str) -> impl Fn(sqlx::Error) -> BrokerageError {
    move |e| BrokerageError::storage(op, e)
}

#[async_trait::async_trait]
impl ClientDirectory for PgDirectory {
    async fn client_exists(&self, client_id: ClientId) -> Result<bool> {
        let (exists,): (bool,) =
            sqlx::query_as("select exists (select 1 from clients where client_id = $1)")
                .bind(client_id)
                .fetch_one(&self.pool)
                .await
                .map_err(lookup("client_exists"))?;
        Ok(exists)
    }

    async fn brokerage_rate(&self, client_id: ClientId) -> Result<Option<RatePct>> {
        let row: Option<(Option<i64>,)> =
            sqlx::query_as("select brokerage_rate_micros from clients where client_id = $1")
                .bind(client_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(lookup("brokerage_rate"))?;
        Ok(row.and_then(|(rate,)| rate).map(RatePct::new))
    }
}

#[async_trait::async_trait]
impl StockCatalog for PgDirectory {
    async fn stock_exists(&self, symbol: &str, exchange: &str) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "select exists (select 1 from stocks where symbol = $1 and exchange = $2)",
        )
        .bind(symbol)
        .bind(exchange)
        .fetch_one(&self.pool)
        .await
        .map_err(lookup("stock_exists"))?;
        Ok(exists)
    }

    async fn current_price(&self, symbol: &str, exchange: &str) -> Result<Option<Micros>> {
        let row: Option<(Option<i64>,)> = sqlx::query_as(
            "select current_price_micros from stocks where symbol = $1 and exchange = $2",
        )
        .bind(symbol)
        .bind(exchange)
        .fetch_optional(&self.pool)
        .await
        .map_err(lookup("current_price"))?;
        Ok(row.and_then(|(price,)| price).map(Micros::new))
    }
}
