//! brk-accrual
//!
//! Time-weighted brokerage accrual over the trade book:
//! - pro-rated fee arithmetic and day-count bases
//! - per-client calculation, preview and unlock (`AccrualEngine`)
//! - whole-book runs over a bounded worker pool (`calculate_bulk`)

mod bulk;
mod engine;
mod proration;

pub use bulk::{
    calculate_bulk, run_accrual, BulkOptions, BulkReport, ClientFailure, DEFAULT_WORKERS,
    DEFAULT_WRITE_BATCH,
};
pub use engine::{AccrualConfig, AccrualEngine, ComputedAccrual};
pub use proration::{formula, inclusive_days, prorated_fee, DayCountBasis};
