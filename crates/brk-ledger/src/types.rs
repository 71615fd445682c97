use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BrokerageError;
use crate::fixedpoint::{Micros, RatePct};
use crate::period::PeriodKey;

pub type TradeId = i64;
pub type AllocationId = i64;
pub type CalculationId = i64;
pub type DetailId = i64;
pub type ClientId = i64;

/// BUY or SELL.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Result<Self, BrokerageError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(BrokerageError::invalid_trade(format!("invalid side: {other}"))),
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The lot-set a trade belongs to. FIFO runs, and mutations serialize, per key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PositionKey {
    pub client_id: ClientId,
    pub symbol: String,
    pub exchange: String,
}

impl PositionKey {
    pub fn new<S: Into<String>, E: Into<String>>(client_id: ClientId, symbol: S, exchange: E) -> Self {
        Self {
            client_id,
            symbol: symbol.into(),
            exchange: exchange.into(),
        }
    }
}

impl std::fmt::Display for PositionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}@{}", self.client_id, self.symbol, self.exchange)
    }
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

/// A persisted trade event.
///
/// BUY: `remaining_quantity` starts at `quantity` and is only moved by FIFO
/// allocation and reversal. SELL: `remaining_quantity` is 0 and
/// `sell_fully_allocated` flips to true together with its allocations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub client_id: ClientId,
    pub symbol: String,
    pub exchange: String,
    pub side: Side,
    pub quantity: i64,
    pub price: Micros,
    pub trade_date: NaiveDate,
    pub charges: Micros,
    pub net_amount: Micros,
    pub remaining_quantity: i64,
    pub is_fully_consumed: bool,
    pub sell_fully_allocated: bool,
    pub locked_period: Option<PeriodKey>,
}

impl Trade {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.client_id, self.symbol.clone(), self.exchange.clone())
    }

    pub fn is_locked(&self) -> bool {
        self.locked_period.is_some()
    }

    /// Shares of this BUY already consumed by sells.
    pub fn consumed_quantity(&self) -> i64 {
        match self.side {
            Side::Buy => self.quantity - self.remaining_quantity,
            Side::Sell => 0,
        }
    }

    /// The input that would re-create this trade.
    pub fn to_input(&self) -> TradeInput {
        TradeInput {
            client_id: self.client_id,
            symbol: self.symbol.clone(),
            exchange: self.exchange.clone(),
            side: self.side,
            quantity: self.quantity,
            price: self.price,
            trade_date: self.trade_date,
            charges: self.charges,
        }
    }
}

/// Caller-supplied trade fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeInput {
    pub client_id: ClientId,
    pub symbol: String,
    pub exchange: String,
    pub side: Side,
    pub quantity: i64,
    pub price: Micros,
    pub trade_date: NaiveDate,
    #[serde(default)]
    pub charges: Micros,
}

impl TradeInput {
    /// Validate and derive the stored form (net amount, initial lot state).
    pub fn into_new_trade(self) -> Result<NewTrade, BrokerageError> {
        let symbol = self.symbol.trim().to_ascii_uppercase();
        let exchange = self.exchange.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(BrokerageError::invalid_trade("symbol must not be empty"));
        }
        if exchange.is_empty() {
            return Err(BrokerageError::invalid_trade("exchange must not be empty"));
        }
        if self.quantity <= 0 {
            return Err(BrokerageError::invalid_trade(format!(
                "quantity must be > 0, got {}",
                self.quantity
            )));
        }
        if !self.price.is_positive() {
            return Err(BrokerageError::invalid_trade(format!(
                "price must be > 0, got {}",
                self.price
            )));
        }
        if self.charges.is_negative() {
            return Err(BrokerageError::invalid_trade(format!(
                "charges must be >= 0, got {}",
                self.charges
            )));
        }

        let gross = self
            .price
            .checked_mul_qty(self.quantity)
            .ok_or_else(|| BrokerageError::invalid_trade("trade value overflows"))?;
        let net_amount = match self.side {
            Side::Buy => gross.checked_add(self.charges),
            Side::Sell => gross.checked_sub(self.charges),
        }
        .ok_or_else(|| BrokerageError::invalid_trade("net amount overflows"))?;

        let remaining_quantity = match self.side {
            Side::Buy => self.quantity,
            Side::Sell => 0,
        };

        Ok(NewTrade {
            client_id: self.client_id,
            symbol,
            exchange,
            side: self.side,
            quantity: self.quantity,
            price: self.price,
            trade_date: self.trade_date,
            charges: self.charges,
            net_amount,
            remaining_quantity,
        })
    }
}

/// A validated trade ready for insertion (no id yet).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTrade {
    pub client_id: ClientId,
    pub symbol: String,
    pub exchange: String,
    pub side: Side,
    pub quantity: i64,
    pub price: Micros,
    pub trade_date: NaiveDate,
    pub charges: Micros,
    pub net_amount: Micros,
    pub remaining_quantity: i64,
}

impl NewTrade {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.client_id, self.symbol.clone(), self.exchange.clone())
    }

    pub fn with_id(self, id: TradeId) -> Trade {
        Trade {
            id,
            client_id: self.client_id,
            symbol: self.symbol,
            exchange: self.exchange,
            side: self.side,
            quantity: self.quantity,
            price: self.price,
            trade_date: self.trade_date,
            charges: self.charges,
            net_amount: self.net_amount,
            remaining_quantity: self.remaining_quantity,
            is_fully_consumed: false,
            sell_fully_allocated: false,
            locked_period: None,
        }
    }
}

/// Partial update; `None` keeps the current value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeChanges {
    pub client_id: Option<ClientId>,
    pub symbol: Option<String>,
    pub exchange: Option<String>,
    pub side: Option<Side>,
    pub quantity: Option<i64>,
    pub price: Option<Micros>,
    pub trade_date: Option<NaiveDate>,
    pub charges: Option<Micros>,
}

impl TradeChanges {
    pub fn is_empty(&self) -> bool {
        *self == TradeChanges::default()
    }

    pub fn apply_to(&self, trade: &Trade) -> TradeInput {
        let base = trade.to_input();
        TradeInput {
            client_id: self.client_id.unwrap_or(base.client_id),
            symbol: self.symbol.clone().unwrap_or(base.symbol),
            exchange: self.exchange.clone().unwrap_or(base.exchange),
            side: self.side.unwrap_or(base.side),
            quantity: self.quantity.unwrap_or(base.quantity),
            price: self.price.unwrap_or(base.price),
            trade_date: self.trade_date.unwrap_or(base.trade_date),
            charges: self.charges.unwrap_or(base.charges),
        }
    }
}

// ---------------------------------------------------------------------------
// Allocations
// ---------------------------------------------------------------------------

/// One sell consuming part or all of one buy lot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub sell_trade_id: TradeId,
    pub buy_trade_id: TradeId,
    pub client_id: ClientId,
    pub symbol: String,
    pub exchange: String,
    pub quantity_allocated: i64,
    pub buy_price: Micros,
    pub sell_price: Micros,
    pub buy_date: NaiveDate,
    pub sell_date: NaiveDate,
    pub buy_value: Micros,
    pub sell_value: Micros,
    pub profit_loss: Micros,
    pub holding_days: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewAllocation {
    pub sell_trade_id: TradeId,
    pub buy_trade_id: TradeId,
    pub client_id: ClientId,
    pub symbol: String,
    pub exchange: String,
    pub quantity_allocated: i64,
    pub buy_price: Micros,
    pub sell_price: Micros,
    pub buy_date: NaiveDate,
    pub sell_date: NaiveDate,
    pub buy_value: Micros,
    pub sell_value: Micros,
    pub profit_loss: Micros,
    pub holding_days: i64,
}

impl NewAllocation {
    pub fn with_id(self, id: AllocationId) -> Allocation {
        Allocation {
            id,
            sell_trade_id: self.sell_trade_id,
            buy_trade_id: self.buy_trade_id,
            client_id: self.client_id,
            symbol: self.symbol,
            exchange: self.exchange,
            quantity_allocated: self.quantity_allocated,
            buy_price: self.buy_price,
            sell_price: self.sell_price,
            buy_date: self.buy_date,
            sell_date: self.sell_date,
            buy_value: self.buy_value,
            sell_value: self.sell_value,
            profit_loss: self.profit_loss,
            holding_days: self.holding_days,
        }
    }
}

// ---------------------------------------------------------------------------
// Brokerage calculations
// ---------------------------------------------------------------------------

/// Per-client per-period fee summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerageCalculation {
    pub id: CalculationId,
    pub client_id: ClientId,
    pub period: PeriodKey,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_holding_value: Micros,
    pub total_holding_days: i64,
    pub rate: RatePct,
    pub brokerage_amount: Micros,
    pub total_positions: i64,
    pub calculated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewCalculation {
    pub client_id: ClientId,
    pub period: PeriodKey,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_holding_value: Micros,
    pub total_holding_days: i64,
    pub rate: RatePct,
    pub brokerage_amount: Micros,
    pub total_positions: i64,
    pub calculated_at: DateTime<Utc>,
}

impl NewCalculation {
    pub fn with_id(self, id: CalculationId) -> BrokerageCalculation {
        BrokerageCalculation {
            id,
            client_id: self.client_id,
            period: self.period,
            period_start: self.period_start,
            period_end: self.period_end,
            total_holding_value: self.total_holding_value,
            total_holding_days: self.total_holding_days,
            rate: self.rate,
            brokerage_amount: self.brokerage_amount,
            total_positions: self.total_positions,
            calculated_at: self.calculated_at,
        }
    }
}

/// One contributing position of a calculation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerageDetail {
    pub id: DetailId,
    pub calculation_id: CalculationId,
    pub trade_id: TradeId,
    pub sell_trade_id: Option<TradeId>,
    pub symbol: String,
    pub exchange: String,
    pub quantity: i64,
    pub buy_price: Micros,
    pub holding_start: NaiveDate,
    pub holding_end: NaiveDate,
    pub holding_days: i64,
    pub total_days_in_period: i64,
    pub position_value: Micros,
    pub brokerage_amount: Micros,
    pub is_closed_in_period: bool,
    pub sell_date: Option<NaiveDate>,
    pub sell_price: Option<Micros>,
    pub formula: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewDetail {
    pub trade_id: TradeId,
    pub sell_trade_id: Option<TradeId>,
    pub symbol: String,
    pub exchange: String,
    pub quantity: i64,
    pub buy_price: Micros,
    pub holding_start: NaiveDate,
    pub holding_end: NaiveDate,
    pub holding_days: i64,
    pub total_days_in_period: i64,
    pub position_value: Micros,
    pub brokerage_amount: Micros,
    pub is_closed_in_period: bool,
    pub sell_date: Option<NaiveDate>,
    pub sell_price: Option<Micros>,
    pub formula: String,
}

impl NewDetail {
    pub fn with_ids(self, id: DetailId, calculation_id: CalculationId) -> BrokerageDetail {
        BrokerageDetail {
            id,
            calculation_id,
            trade_id: self.trade_id,
            sell_trade_id: self.sell_trade_id,
            symbol: self.symbol,
            exchange: self.exchange,
            quantity: self.quantity,
            buy_price: self.buy_price,
            holding_start: self.holding_start,
            holding_end: self.holding_end,
            holding_days: self.holding_days,
            total_days_in_period: self.total_days_in_period,
            position_value: self.position_value,
            brokerage_amount: self.brokerage_amount,
            is_closed_in_period: self.is_closed_in_period,
            sell_date: self.sell_date,
            sell_price: self.sell_price,
            formula: self.formula,
        }
    }

    /// Trades fenced by this row: the buy lot, plus the sell for closed rows.
    pub fn referenced_trades(&self) -> impl Iterator<Item = TradeId> + '_ {
        std::iter::once(self.trade_id).chain(self.sell_trade_id)
    }
}

/// A persisted calculation with its detail rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationRecord {
    pub calculation: BrokerageCalculation,
    pub details: Vec<BrokerageDetail>,
}
