//! brk-testkit
//!
//! In-memory collaborators and a wired-up harness for scenario tests:
//! a [`MemoryStore`] shared by a [`TradeLedger`] and an [`AccrualEngine`],
//! with client and stock tables the test controls.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use brk_accrual::{AccrualConfig, AccrualEngine, BulkOptions, BulkReport};
use brk_calendar::{normalize_exchange, CalendarService, Holiday, StaticHolidays};
use brk_ledger::{
    AccrualPeriod, ClientDirectory, ClientId, MemoryStore, Micros, RatePct, Side, StockCatalog,
    Trade, TradeInput, TradeLedger,
};
use chrono::NaiveDate;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Client table: id -> optional per-client rate.
#[derive(Debug, Default)]
pub struct InMemoryClients {
    rows: RwLock<HashMap<ClientId, Option<RatePct>>>,
}

impl InMemoryClients {
    pub fn add(&self, client_id: ClientId) {
        self.rows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(client_id)
            .or_insert(None);
    }

    pub fn set_rate(&self, client_id: ClientId, rate: RatePct) {
        self.rows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(client_id, Some(rate));
    }
}

#[async_trait::async_trait]
impl ClientDirectory for InMemoryClients {
    async fn client_exists(&self, client_id: ClientId) -> brk_ledger::Result<bool> {
        Ok(self
            .rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&client_id))
    }

    async fn brokerage_rate(&self, client_id: ClientId) -> brk_ledger::Result<Option<RatePct>> {
        Ok(self
            .rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&client_id)
            .copied()
            .flatten())
    }
}

/// Stock table keyed by normalized (symbol, exchange).
#[derive(Debug, Default)]
pub struct InMemoryStocks {
    rows: RwLock<HashMap<(String, String), Option<Micros>>>,
}

fn stock_key(symbol: &str, exchange: &str) -> (String, String) {
    (symbol.trim().to_ascii_uppercase(), normalize_exchange(exchange))
}

impl InMemoryStocks {
    /// Listed, but no quote yet.
    pub fn add(&self, symbol: &str, exchange: &str) {
        self.rows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(stock_key(symbol, exchange))
            .or_insert(None);
    }

    pub fn set_price(&self, symbol: &str, exchange: &str, price: Micros) {
        self.rows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(stock_key(symbol, exchange), Some(price));
    }
}

#[async_trait::async_trait]
impl StockCatalog for InMemoryStocks {
    async fn stock_exists(&self, symbol: &str, exchange: &str) -> brk_ledger::Result<bool> {
        Ok(self
            .rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&stock_key(symbol, exchange)))
    }

    async fn current_price(
        &self,
        symbol: &str,
        exchange: &str,
    ) -> brk_ledger::Result<Option<Micros>> {
        Ok(self
            .rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&stock_key(symbol, exchange))
            .copied()
            .flatten())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub const EXCHANGE: &str = "NSE";

pub fn date(s: &str) -> NaiveDate {
    match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        Ok(d) => d,
        Err(e) => panic!("bad test date {s:?}: {e}"),
    }
}

pub fn money(s: &str) -> Micros {
    match Micros::parse(s) {
        Ok(m) => m,
        Err(e) => panic!("bad test amount {s:?}: {e}"),
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub clients: Arc<InMemoryClients>,
    pub stocks: Arc<InMemoryStocks>,
    pub calendar: Arc<CalendarService>,
    pub ledger: TradeLedger<MemoryStore>,
    pub engine: Arc<AccrualEngine<MemoryStore>>,
}

impl Harness {
    /// Default config (10%, calendar days) and no holidays.
    pub fn new() -> Result<Self> {
        Self::with_config(AccrualConfig::default(), Vec::new())
    }

    pub fn with_config(config: AccrualConfig, holidays: Vec<Holiday>) -> Result<Self> {
        let store = MemoryStore::new();
        let clients = Arc::new(InMemoryClients::default());
        let stocks = Arc::new(InMemoryStocks::default());
        let calendar = Arc::new(
            CalendarService::new(StaticHolidays::new(holidays)).context("calendar init")?,
        );

        let ledger = TradeLedger::new(store.clone(), clients.clone(), stocks.clone());
        let engine = AccrualEngine::new(
            store.clone(),
            clients.clone(),
            stocks.clone(),
            calendar.clone(),
            config,
        );

        Ok(Self {
            store,
            clients,
            stocks,
            calendar,
            ledger,
            engine: Arc::new(engine),
        })
    }

    /// Register a client and a quoted stock on [`EXCHANGE`].
    pub fn seed(&self, client_id: ClientId, symbol: &str, price: &str) {
        self.clients.add(client_id);
        self.stocks.set_price(symbol, EXCHANGE, money(price));
    }

    pub fn input(
        client_id: ClientId,
        symbol: &str,
        side: Side,
        quantity: i64,
        price: &str,
        trade_date: &str,
    ) -> TradeInput {
        TradeInput {
            client_id,
            symbol: symbol.to_string(),
            exchange: EXCHANGE.to_string(),
            side,
            quantity,
            price: money(price),
            trade_date: date(trade_date),
            charges: Micros::ZERO,
        }
    }

    pub async fn buy(
        &self,
        client_id: ClientId,
        symbol: &str,
        quantity: i64,
        price: &str,
        trade_date: &str,
    ) -> brk_ledger::Result<Trade> {
        self.ledger
            .record(Self::input(client_id, symbol, Side::Buy, quantity, price, trade_date))
            .await
    }

    pub async fn sell(
        &self,
        client_id: ClientId,
        symbol: &str,
        quantity: i64,
        price: &str,
        trade_date: &str,
    ) -> brk_ledger::Result<Trade> {
        self.ledger
            .record(Self::input(client_id, symbol, Side::Sell, quantity, price, trade_date))
            .await
    }

    pub async fn run_bulk(&self, period: &str, opts: BulkOptions) -> brk_ledger::Result<BulkReport> {
        let period = AccrualPeriod::parse(period)?;
        brk_accrual::calculate_bulk(Arc::clone(&self.engine), period, opts).await
    }
}
