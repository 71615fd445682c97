use brk_calendar::CalendarError;

use crate::period::PeriodKey;
use crate::types::{ClientId, TradeId};

/// Every failure the ledger and accrual engine can surface.
///
/// All variants are recoverable by the caller and carry the ids, quantities
/// and period needed to drive a corrective action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerageError {
    /// Sell quantity exceeds the open lots eligible at the sell date.
    InsufficientShares {
        client_id: ClientId,
        symbol: String,
        exchange: String,
        available: i64,
        requested: i64,
    },
    StockNotFound { symbol: String, exchange: String },
    ClientNotFound { client_id: ClientId },
    TradeNotFound { trade_id: TradeId },
    CalculationNotFound { client_id: ClientId, period: PeriodKey },
    /// A lot that has been (partly) sold cannot be reversed, and a sell can
    /// only be allocated once.
    AllocationConflict { trade_id: TradeId, reason: String },
    /// Fees for `period` are finalized. Either a trade is fenced by it or the
    /// period was already calculated for the client/book.
    PeriodLocked {
        period: PeriodKey,
        trade_id: Option<TradeId>,
        client_id: Option<ClientId>,
    },
    InvalidPeriod { detail: String },
    InvalidTrade { detail: String },
    /// Backing store failure; the unit of work was rolled back.
    Storage { op: &'static str, detail: String },
}

impl BrokerageError {
    pub fn storage(op: &'static str, detail: impl std::fmt::Display) -> Self {
        Self::Storage {
            op,
            detail: detail.to_string(),
        }
    }

    pub fn invalid_trade(detail: impl Into<String>) -> Self {
        Self::InvalidTrade {
            detail: detail.into(),
        }
    }

    /// Short machine-friendly tag (logs, CLI exit summaries).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsufficientShares { .. } => "INSUFFICIENT_SHARES",
            Self::StockNotFound { .. } => "STOCK_NOT_FOUND",
            Self::ClientNotFound { .. } => "CLIENT_NOT_FOUND",
            Self::TradeNotFound { .. } => "TRADE_NOT_FOUND",
            Self::CalculationNotFound { .. } => "CALCULATION_NOT_FOUND",
            Self::AllocationConflict { .. } => "ALLOCATION_CONFLICT",
            Self::PeriodLocked { .. } => "PERIOD_LOCKED",
            Self::InvalidPeriod { .. } => "INVALID_PERIOD",
            Self::InvalidTrade { .. } => "INVALID_TRADE",
            Self::Storage { .. } => "STORAGE",
        }
    }
}

impl std::fmt::Display for BrokerageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientShares {
                client_id,
                symbol,
                exchange,
                available,
                requested,
            } => write!(
                f,
                "insufficient shares: client {client_id} {symbol}@{exchange} \
                 available={available} requested={requested}"
            ),
            Self::StockNotFound { symbol, exchange } => {
                write!(f, "stock not found: {symbol}@{exchange}")
            }
            Self::ClientNotFound { client_id } => write!(f, "client not found: {client_id}"),
            Self::TradeNotFound { trade_id } => write!(f, "trade not found: {trade_id}"),
            Self::CalculationNotFound { client_id, period } => write!(
                f,
                "no brokerage calculation for client {client_id} period {period}"
            ),
            Self::AllocationConflict { trade_id, reason } => {
                write!(f, "allocation conflict on trade {trade_id}: {reason}")
            }
            Self::PeriodLocked {
                period,
                trade_id,
                client_id,
            } => {
                write!(f, "period {period} is locked")?;
                if let Some(t) = trade_id {
                    write!(f, " (trade {t})")?;
                }
                if let Some(c) = client_id {
                    write!(f, " (client {c})")?;
                }
                write!(f, "; delete the brokerage calculation first")
            }
            Self::InvalidPeriod { detail } => write!(f, "invalid period: {detail}"),
            Self::InvalidTrade { detail } => write!(f, "invalid trade: {detail}"),
            Self::Storage { op, detail } => write!(f, "storage failure in {op}: {detail}"),
        }
    }
}

impl std::error::Error for BrokerageError {}

impl From<CalendarError> for BrokerageError {
    fn from(e: CalendarError) -> Self {
        match e {
            CalendarError::InvalidQuarter { .. } | CalendarError::InvalidYear { .. } => {
                BrokerageError::InvalidPeriod {
                    detail: e.to_string(),
                }
            }
            CalendarError::Source { detail } => BrokerageError::Storage {
                op: "calendar_refresh",
                detail,
            },
        }
    }
}

pub type Result<T, E = BrokerageError> = std::result::Result<T, E>;
