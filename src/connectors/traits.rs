// src/connectors/traits.rs
use crate::error::{AdapterError, ExecutionError};
use crate::ledger::LedgerSnapshot;
use crate::types::{
    AccountSnapshot, Candle, Exchange, Fill, Instrument, Interval, Position, PositionSide, Symbol,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Read-only market data from one exchange, normalized to canonical types.
///
/// Candles come back oldest first and at most `limit` long. Optional data
/// (funding, open interest) defaults to `None` for sources without it.
#[async_trait]
pub trait MarketDataAdapter: Send + Sync {
    fn exchange(&self) -> Exchange;

    /// The bar size `fetch_candles` actually returns for a requested interval.
    fn served_interval(&self, interval: Interval) -> Interval {
        interval
    }

    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, AdapterError>;

    async fn fetch_price(&self, symbol: &Symbol) -> Result<Decimal, AdapterError>;

    async fn fetch_instruments(&self) -> Result<Vec<Instrument>, AdapterError>;

    async fn fetch_funding_rate(&self, _symbol: &Symbol) -> Result<Option<f64>, AdapterError> {
        Ok(None)
    }

    async fn fetch_open_interest(&self, _symbol: &Symbol) -> Result<Option<f64>, AdapterError> {
        Ok(None)
    }
}

/// Order execution and account state, implemented by the paper ledger and by
/// live exchange executors. Owned by exactly one agent.
#[async_trait]
pub trait ExecutionHandler: Send + Sync {
    fn is_paper(&self) -> bool;

    /// Revalues open positions at `marks` and returns the account view.
    async fn sync_account(
        &mut self,
        marks: &HashMap<Symbol, Decimal>,
    ) -> Result<AccountSnapshot, ExecutionError>;

    async fn positions(&self) -> Result<Vec<Position>, ExecutionError>;

    async fn open_position(
        &mut self,
        symbol: &Symbol,
        side: PositionSide,
        quantity: Decimal,
        price: Decimal,
        leverage: u32,
    ) -> Result<Fill, ExecutionError>;

    /// A quantity of zero or above the held size closes the whole position.
    async fn close_position(
        &mut self,
        symbol: &Symbol,
        side: PositionSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Fill, ExecutionError>;

    async fn set_leverage(&mut self, symbol: &Symbol, leverage: u32) -> Result<(), ExecutionError>;

    async fn set_stop_loss(
        &mut self,
        symbol: &Symbol,
        side: PositionSide,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> Result<(), ExecutionError>;

    async fn set_take_profit(
        &mut self,
        symbol: &Symbol,
        side: PositionSide,
        quantity: Decimal,
        target_price: Decimal,
    ) -> Result<(), ExecutionError>;

    async fn cancel_orders(&mut self, symbol: &Symbol) -> Result<(), ExecutionError>;

    fn format_quantity(&self, symbol: &Symbol, quantity: Decimal) -> Decimal;

    /// Flushes durable state. A no-op for venues that hold state themselves.
    async fn persist(&mut self) -> Result<(), ExecutionError>;

    /// Copy of the local ledger, if this handler keeps one.
    fn ledger_snapshot(&self) -> Option<LedgerSnapshot>;
}
