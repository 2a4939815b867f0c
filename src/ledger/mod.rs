// src/ledger/mod.rs
pub mod store;

use crate::connectors::traits::ExecutionHandler;
use crate::error::{ExecutionError, LedgerError, PersistenceError};
use crate::types::{AccountSnapshot, Fill, Position, PositionKey, PositionSide, Symbol};
use crate::utils::precision::{round_quantity, DEFAULT_QUANTITY_DECIMALS};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use self::store::StateStore;

/// What gets persisted between restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub initial_balance: Decimal,
    pub balance: Decimal,
    pub realized_pnl: Decimal,
    pub positions: Vec<Position>,
    pub saved_at: DateTime<Utc>,
}

/// Balance and open positions, keyed so long and short on one symbol coexist.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerState {
    pub initial_balance: Decimal,
    pub balance: Decimal,
    pub realized_pnl: Decimal,
    pub positions: BTreeMap<PositionKey, Position>,
}

impl LedgerState {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            balance: initial_balance,
            realized_pnl: Decimal::ZERO,
            positions: BTreeMap::new(),
        }
    }

    /// View assembled from an exchange account, for venues that keep state remotely.
    pub fn from_account(account: &AccountSnapshot, positions: Vec<Position>) -> Self {
        Self {
            initial_balance: account.initial_balance,
            balance: account.wallet_balance,
            realized_pnl: account.realized_pnl,
            positions: positions.into_iter().map(|p| (p.key(), p)).collect(),
        }
    }

    pub fn position(&self, symbol: &Symbol, side: PositionSide) -> Option<&Position> {
        self.positions.get(&PositionKey::new(symbol.clone(), side))
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }

    pub fn margin_used(&self) -> Decimal {
        self.positions.values().map(|p| p.margin()).sum()
    }

    pub fn account(&self) -> AccountSnapshot {
        let unrealized = self.unrealized_pnl();
        let margin_used = self.margin_used();
        let total_equity = self.balance + unrealized;
        AccountSnapshot {
            initial_balance: self.initial_balance,
            wallet_balance: self.balance,
            total_equity,
            available_balance: (total_equity - margin_used).max(Decimal::ZERO),
            unrealized_pnl: unrealized,
            realized_pnl: self.realized_pnl,
            margin_used,
        }
    }

    fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            initial_balance: self.initial_balance,
            balance: self.balance,
            realized_pnl: self.realized_pnl,
            positions: self.positions.values().cloned().collect(),
            saved_at: Utc::now(),
        }
    }

    fn restore(snapshot: LedgerSnapshot) -> Self {
        Self {
            initial_balance: snapshot.initial_balance,
            balance: snapshot.balance,
            realized_pnl: snapshot.realized_pnl,
            positions: snapshot
                .positions
                .into_iter()
                .map(|p| (p.key(), p))
                .collect(),
        }
    }
}

/// Simulated futures account for one agent. The balance only moves by realized PnL.
pub struct Ledger {
    agent_id: String,
    state: LedgerState,
    quantity_precision: HashMap<Symbol, u32>,
    store: Option<Arc<dyn StateStore>>,
}

impl Ledger {
    pub fn new(agent_id: &str, initial_balance: Decimal) -> Result<Self, LedgerError> {
        if initial_balance <= Decimal::ZERO {
            return Err(LedgerError::InvalidInitialBalance(initial_balance));
        }
        Ok(Self {
            agent_id: agent_id.to_string(),
            state: LedgerState::new(initial_balance),
            quantity_precision: HashMap::new(),
            store: None,
        })
    }

    /// Restores the last snapshot for `agent_id` when the store has one.
    /// A store that fails to load is logged and the ledger starts fresh.
    pub async fn load(
        agent_id: &str,
        initial_balance: Decimal,
        store: Option<Arc<dyn StateStore>>,
    ) -> Result<Self, LedgerError> {
        let mut ledger = Self::new(agent_id, initial_balance)?;
        if let Some(store) = &store {
            match store.load(agent_id).await {
                Ok(Some(snapshot)) => {
                    info!(
                        agent = agent_id,
                        balance = %snapshot.balance,
                        positions = snapshot.positions.len(),
                        "💾 Restored ledger from {}",
                        snapshot.saved_at
                    );
                    ledger.state = LedgerState::restore(snapshot);
                }
                Ok(None) => debug!(agent = agent_id, "no saved ledger, starting fresh"),
                Err(e) => error!(agent = agent_id, error = %e, "failed to load ledger, starting fresh"),
            }
        }
        ledger.store = store;
        Ok(ledger)
    }

    pub fn with_precision(mut self, quantity_precision: HashMap<Symbol, u32>) -> Self {
        self.quantity_precision = quantity_precision;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn balance(&self) -> Decimal {
        self.state.balance
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.state.realized_pnl
    }

    pub fn position(&self, symbol: &Symbol, side: PositionSide) -> Option<&Position> {
        self.state.position(symbol, side)
    }

    pub fn account(&self) -> AccountSnapshot {
        self.state.account()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.state.snapshot()
    }

    pub fn open_long(&mut self, symbol: &Symbol, quantity: Decimal, price: Decimal, leverage: u32) -> Result<Fill, LedgerError> {
        self.open(symbol, PositionSide::Long, quantity, price, leverage)
    }

    pub fn open_short(&mut self, symbol: &Symbol, quantity: Decimal, price: Decimal, leverage: u32) -> Result<Fill, LedgerError> {
        self.open(symbol, PositionSide::Short, quantity, price, leverage)
    }

    pub fn close_long(&mut self, symbol: &Symbol, quantity: Decimal, price: Decimal) -> Result<Fill, LedgerError> {
        self.close(symbol, PositionSide::Long, quantity, price)
    }

    pub fn close_short(&mut self, symbol: &Symbol, quantity: Decimal, price: Decimal) -> Result<Fill, LedgerError> {
        self.close(symbol, PositionSide::Short, quantity, price)
    }

    fn open(
        &mut self,
        symbol: &Symbol,
        side: PositionSide,
        quantity: Decimal,
        price: Decimal,
        leverage: u32,
    ) -> Result<Fill, LedgerError> {
        if quantity <= Decimal::ZERO {
            return Err(LedgerError::InvalidQuantity(quantity));
        }
        if price <= Decimal::ZERO {
            return Err(LedgerError::InvalidPrice(price));
        }
        if leverage == 0 {
            return Err(LedgerError::InvalidLeverage(leverage));
        }

        let required = quantity * price / Decimal::from(leverage);
        let available = self.state.account().available_balance;
        if required > available {
            return Err(LedgerError::InsufficientMargin { required, available });
        }

        let key = PositionKey::new(symbol.clone(), side);
        let position = self.state.positions.entry(key).or_insert_with(|| Position {
            symbol: symbol.clone(),
            side,
            quantity: Decimal::ZERO,
            entry_price: price,
            leverage,
            unrealized_pnl: Decimal::ZERO,
        });
        // volume-weighted average entry
        let total = position.quantity + quantity;
        position.entry_price = (position.quantity * position.entry_price + quantity * price) / total;
        position.quantity = total;
        position.leverage = leverage;
        position.unrealized_pnl = position.pnl_at(price);

        info!(
            agent = %self.agent_id,
            "📝 Paper open {} {}: {} @ {} x{} (avg entry {})",
            side, symbol, quantity, price, leverage, position.entry_price
        );

        Ok(Fill {
            order_id: paper_order_id(),
            symbol: symbol.clone(),
            side,
            reduce_only: false,
            quantity,
            price,
            realized_pnl: None,
        })
    }

    fn close(
        &mut self,
        symbol: &Symbol,
        side: PositionSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Fill, LedgerError> {
        if price <= Decimal::ZERO {
            return Err(LedgerError::InvalidPrice(price));
        }
        let key = PositionKey::new(symbol.clone(), side);
        let Some(position) = self.state.positions.get_mut(&key) else {
            return Err(LedgerError::NoPosition {
                symbol: symbol.clone(),
                side,
            });
        };

        let quantity = if quantity <= Decimal::ZERO || quantity >= position.quantity {
            position.quantity
        } else {
            quantity
        };
        let pnl = (price - position.entry_price) * quantity * side.sign();
        position.quantity -= quantity;
        position.unrealized_pnl = position.pnl_at(price);
        if position.quantity.is_zero() {
            self.state.positions.remove(&key);
        }

        self.state.balance += pnl;
        self.state.realized_pnl += pnl;

        info!(
            agent = %self.agent_id,
            "📝 Paper close {} {}: {} @ {} (pnl {}, balance {})",
            side, symbol, quantity, price, pnl, self.state.balance
        );

        Ok(Fill {
            order_id: paper_order_id(),
            symbol: symbol.clone(),
            side,
            reduce_only: true,
            quantity,
            price,
            realized_pnl: Some(pnl),
        })
    }

    /// Revalues positions that have a mark; others keep their last value.
    pub fn mark_to_market(&mut self, marks: &HashMap<Symbol, Decimal>) {
        for position in self.state.positions.values_mut() {
            if let Some(mark) = marks.get(&position.symbol) {
                position.unrealized_pnl = position.pnl_at(*mark);
            }
        }
    }

    pub fn format_quantity(&self, symbol: &Symbol, quantity: Decimal) -> Decimal {
        let decimals = self
            .quantity_precision
            .get(symbol)
            .copied()
            .unwrap_or(DEFAULT_QUANTITY_DECIMALS);
        round_quantity(quantity, decimals)
    }

    pub async fn save_state(&self) -> Result<(), PersistenceError> {
        match &self.store {
            Some(store) => store.save(&self.agent_id, &self.state.snapshot()).await,
            None => Ok(()),
        }
    }
}

fn paper_order_id() -> String {
    format!("paper_{}", uuid::Uuid::new_v4().simple())
}

#[async_trait]
impl ExecutionHandler for Ledger {
    fn is_paper(&self) -> bool {
        true
    }

    async fn sync_account(
        &mut self,
        marks: &HashMap<Symbol, Decimal>,
    ) -> Result<AccountSnapshot, ExecutionError> {
        self.mark_to_market(marks);
        Ok(self.account())
    }

    async fn positions(&self) -> Result<Vec<Position>, ExecutionError> {
        Ok(self.state.positions.values().cloned().collect())
    }

    async fn open_position(
        &mut self,
        symbol: &Symbol,
        side: PositionSide,
        quantity: Decimal,
        price: Decimal,
        leverage: u32,
    ) -> Result<Fill, ExecutionError> {
        Ok(self.open(symbol, side, quantity, price, leverage)?)
    }

    async fn close_position(
        &mut self,
        symbol: &Symbol,
        side: PositionSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Fill, ExecutionError> {
        Ok(self.close(symbol, side, quantity, price)?)
    }

    async fn set_leverage(&mut self, symbol: &Symbol, leverage: u32) -> Result<(), ExecutionError> {
        debug!(agent = %self.agent_id, %symbol, leverage, "paper leverage is set per open");
        Ok(())
    }

    async fn set_stop_loss(
        &mut self,
        symbol: &Symbol,
        side: PositionSide,
        _quantity: Decimal,
        stop_price: Decimal,
    ) -> Result<(), ExecutionError> {
        debug!(agent = %self.agent_id, %symbol, %side, %stop_price, "paper stop loss not simulated");
        Ok(())
    }

    async fn set_take_profit(
        &mut self,
        symbol: &Symbol,
        side: PositionSide,
        _quantity: Decimal,
        target_price: Decimal,
    ) -> Result<(), ExecutionError> {
        debug!(agent = %self.agent_id, %symbol, %side, %target_price, "paper take profit not simulated");
        Ok(())
    }

    async fn cancel_orders(&mut self, _symbol: &Symbol) -> Result<(), ExecutionError> {
        Ok(())
    }

    fn format_quantity(&self, symbol: &Symbol, quantity: Decimal) -> Decimal {
        Ledger::format_quantity(self, symbol, quantity)
    }

    async fn persist(&mut self) -> Result<(), ExecutionError> {
        if let Err(e) = self.save_state().await {
            warn!(agent = %self.agent_id, error = %e, "ledger snapshot not saved");
            return Err(e.into());
        }
        Ok(())
    }

    fn ledger_snapshot(&self) -> Option<LedgerSnapshot> {
        Some(self.snapshot())
    }
}
