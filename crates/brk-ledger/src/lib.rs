//! brk-ledger
//!
//! Trade book of the brokerage back office:
//! - fixed-point money (`Micros`) and rates (`RatePct`)
//! - accrual period keys and bounds
//! - FIFO allocation of sells against buy lots, and its reversal
//! - trade record/update/delete under per-position serialization
//! - repository + unit-of-work traits, with an in-memory store
//!
//! Fee accrual lives in `brk-accrual`; Postgres persistence in `brk-db`.

mod directory;
mod error;
mod fixedpoint;
mod ledger;
mod locks;
mod period;
mod types;

pub mod fifo;
pub mod store;

pub use directory::{ClientDirectory, StockCatalog};
pub use error::{BrokerageError, Result};
pub use fifo::ConservationReport;
pub use fixedpoint::{Micros, RatePct, MICROS_SCALE};
pub use ledger::TradeLedger;
pub use locks::{KeyGuard, KeyedLocks};
pub use period::{AccrualPeriod, PeriodKey};
pub use store::{
    AllocationRepository, CalculationRepository, LedgerStore, LedgerTx, MemoryStore, MemoryTx,
    TradeRepository,
};
pub use types::{
    Allocation, AllocationId, BrokerageCalculation, BrokerageDetail, CalculationId,
    CalculationRecord, ClientId, DetailId, NewAllocation, NewCalculation, NewDetail, NewTrade,
    PositionKey, Side, Trade, TradeChanges, TradeId, TradeInput,
};
