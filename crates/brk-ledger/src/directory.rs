//! Master-data collaborators consumed by the ledger and the accrual engine.
//!
//! Client and stock CRUD live elsewhere; these traits are the read-only view
//! the engine needs.

use crate::error::Result;
use crate::fixedpoint::{Micros, RatePct};
use crate::types::ClientId;

#[async_trait::async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn client_exists(&self, client_id: ClientId) -> Result<bool>;

    /// Per-client brokerage rate override. `None` uses the configured default.
    async fn brokerage_rate(&self, _client_id: ClientId) -> Result<Option<RatePct>> {
        Ok(None)
    }
}

#[async_trait::async_trait]
pub trait StockCatalog: Send + Sync {
    async fn stock_exists(&self, symbol: &str, exchange: &str) -> Result<bool>;

    /// Latest known market price, `None` when the catalog has no quote.
    async fn current_price(&self, symbol: &str, exchange: &str) -> Result<Option<Micros>>;
}
