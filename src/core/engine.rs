// src/core/engine.rs
use crate::config::AgentConfig;
use crate::connectors::gateway::MarketGateway;
use crate::connectors::traits::ExecutionHandler;
use crate::core::history::{ActionOutcome, CycleRecord, DecisionHistory};
use crate::core::risk::{evaluate_batch, RiskVerdict};
use crate::decision::context::{DecisionContext, SymbolContext};
use crate::decision::traits::DecisionMaker;
use crate::decision::types::{Action, Decision, DecisionBatch};
use crate::error::{CycleError, ExecutionError};
use crate::indicators::IndicatorSet;
use crate::ledger::{LedgerSnapshot, LedgerState};
use crate::types::{AccountSnapshot, Exchange, Fill, Position, Symbol};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Collecting,
    Deciding,
    Enforcing,
    Executing,
    Recording,
    Sleeping,
    Stopped,
}

/// Read-only view of an agent, published after every state change.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub agent_id: String,
    pub exchange: Exchange,
    pub paper: bool,
    pub state: CycleState,
    pub cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub account: Option<AccountSnapshot>,
    pub ledger: Option<LedgerSnapshot>,
    pub last_record: Option<CycleRecord>,
}

impl AgentStatus {
    pub(crate) fn new(config: &AgentConfig) -> Self {
        Self {
            agent_id: config.id.clone(),
            exchange: config.exchange,
            paper: config.paper_trading,
            state: CycleState::Idle,
            cycles: 0,
            last_cycle_at: None,
            last_error: None,
            account: None,
            ledger: None,
            last_record: None,
        }
    }
}

/// Collaborators an agent is built from.
pub struct AgentComponents {
    pub gateway: Arc<MarketGateway>,
    pub decision_maker: Arc<dyn DecisionMaker>,
    pub executor: Box<dyn ExecutionHandler>,
}

struct Collected {
    markets: Vec<SymbolContext>,
    marks: HashMap<Symbol, Decimal>,
    account: AccountSnapshot,
    positions: Vec<Position>,
}

/// One trading identity: its own watch list, ledger (or live account),
/// collaborator and timer. Owns its executor exclusively.
pub struct TradingAgent {
    config: AgentConfig,
    watch_list: Vec<Symbol>,
    gateway: Arc<MarketGateway>,
    decision_maker: Arc<dyn DecisionMaker>,
    executor: Box<dyn ExecutionHandler>,
    history: DecisionHistory,
    cycle: u64,
    collaborator_timeout: Duration,
    status: watch::Sender<AgentStatus>,
}

impl TradingAgent {
    pub fn new(config: AgentConfig, components: AgentComponents, collaborator_timeout: Duration) -> Self {
        let mut status = AgentStatus::new(&config);
        status.ledger = components.executor.ledger_snapshot();
        let (status, _) = watch::channel(status);
        Self {
            watch_list: config.watch_list(),
            history: DecisionHistory::new(config.history_window),
            gateway: components.gateway,
            decision_maker: components.decision_maker,
            executor: components.executor,
            cycle: 0,
            collaborator_timeout,
            status,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> AgentStatus {
        self.status.borrow().clone()
    }

    pub fn history(&self) -> &DecisionHistory {
        &self.history
    }

    pub fn executor(&self) -> &dyn ExecutionHandler {
        self.executor.as_ref()
    }

    fn set_state(&self, state: CycleState) {
        self.status.send_modify(|s| s.state = state);
    }

    /// Runs cycles on the configured interval until `shutdown` turns true or
    /// its sender goes away. A failed cycle is logged and the loop goes on.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.cycle_interval_secs);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            agent = %self.config.id,
            exchange = %self.config.exchange,
            model = self.decision_maker.name(),
            symbols = self.watch_list.len(),
            paper = self.executor.is_paper(),
            "🚀 Agent started, cycle every {:?}",
            period
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown.borrow() {
                break;
            }

            let span = info_span!("cycle", agent = %self.config.id, cycle = self.cycle + 1);
            match self.run_cycle(&shutdown).instrument(span).await {
                Ok(_) => {}
                Err(CycleError::Cancelled) => break,
                Err(e) => {
                    error!(agent = %self.config.id, cycle = self.cycle, error = %e, "❌ Cycle failed");
                    let message = e.to_string();
                    self.status.send_modify(|s| {
                        s.last_error = Some(message);
                        s.last_cycle_at = Some(Utc::now());
                    });
                }
            }
            self.set_state(CycleState::Sleeping);
        }

        if let Err(e) = self.executor.persist().await {
            warn!(agent = %self.config.id, error = %e, "final save failed");
        }
        let ledger = self.executor.ledger_snapshot();
        self.status.send_modify(|s| {
            s.state = CycleState::Stopped;
            if ledger.is_some() {
                s.ledger = ledger;
            }
        });
        info!(agent = %self.config.id, cycles = self.cycle, "🛑 Agent stopped");
    }

    /// One collect → decide → enforce → execute → record pass. A stop request
    /// is honoured between steps, never inside one.
    pub async fn run_cycle(&mut self, shutdown: &watch::Receiver<bool>) -> Result<CycleRecord, CycleError> {
        self.cycle += 1;
        let started = Utc::now();

        self.checkpoint(shutdown, CycleState::Collecting)?;
        let collected = self.collect().await?;

        self.checkpoint(shutdown, CycleState::Deciding)?;
        let (batch, collaborator_error) = self.decide(&collected, started).await;

        self.checkpoint(shutdown, CycleState::Enforcing)?;
        let actionable: Vec<Decision> = batch
            .decisions
            .iter()
            .filter(|d| d.action != Action::Hold && !d.applies_to_all())
            .cloned()
            .collect();
        let risk_state = LedgerState::from_account(&collected.account, collected.positions.clone());
        let verdicts = evaluate_batch(&actionable, &collected.marks, &risk_state, &self.config.risk);

        self.checkpoint(shutdown, CycleState::Executing)?;
        let outcomes = self.execute(&actionable, &verdicts, &collected.marks).await;

        self.checkpoint(shutdown, CycleState::Recording)?;
        Ok(self.record(started, batch, outcomes, collaborator_error, &collected.marks).await)
    }

    fn checkpoint(&self, shutdown: &watch::Receiver<bool>, next: CycleState) -> Result<(), CycleError> {
        if *shutdown.borrow() {
            return Err(CycleError::Cancelled);
        }
        self.set_state(next);
        Ok(())
    }

    async fn collect(&mut self) -> Result<Collected, CycleError> {
        let cfg = &self.config;
        let fetches = self.watch_list.iter().map(|symbol| {
            self.gateway
                .snapshot(symbol, cfg.candle_interval, cfg.context_interval, cfg.candle_limit)
        });
        let results = join_all(fetches).await;

        let mut markets = Vec::with_capacity(results.len());
        let mut marks = HashMap::new();
        for (symbol, result) in self.watch_list.iter().zip(results) {
            match result {
                Ok(snapshot) => {
                    let indicators = IndicatorSet::compute(&snapshot);
                    marks.insert(symbol.clone(), snapshot.current_price);
                    markets.push(SymbolContext {
                        symbol: snapshot.symbol,
                        interval: snapshot.interval,
                        context_interval: snapshot.context_interval,
                        current_price: snapshot.current_price,
                        funding_rate: snapshot.funding_rate,
                        open_interest: snapshot.open_interest,
                        indicators,
                    });
                }
                Err(e) if !e.is_retryable() => {
                    warn!(agent = %cfg.id, %symbol, error = %e, "skipping symbol this cycle");
                }
                Err(e) => return Err(e.into()),
            }
        }
        if markets.is_empty() {
            return Err(CycleError::NoTradableSymbols);
        }

        let account = self.executor.sync_account(&marks).await?;
        let positions = self.executor.positions().await?;
        Ok(Collected {
            markets,
            marks,
            account,
            positions,
        })
    }

    async fn decide(&self, collected: &Collected, started: DateTime<Utc>) -> (DecisionBatch, Option<String>) {
        let context = DecisionContext {
            agent_id: self.config.id.clone(),
            cycle: self.cycle,
            timestamp: started,
            account: collected.account.clone(),
            positions: collected.positions.clone(),
            performance: self.history.performance(),
            markets: collected.markets.clone(),
        };

        match tokio::time::timeout(self.collaborator_timeout, self.decision_maker.decide(&context)).await {
            Ok(Ok(batch)) => {
                info!(
                    agent = %self.config.id,
                    decisions = batch.decisions.len(),
                    "🧠 {} answered",
                    self.decision_maker.name()
                );
                (batch, None)
            }
            Ok(Err(e)) => {
                warn!(agent = %self.config.id, error = %e, "collaborator failed, holding");
                (DecisionBatch::hold_all(e.to_string()), Some(e.to_string()))
            }
            Err(_) => {
                let message = format!("collaborator timed out after {:?}", self.collaborator_timeout);
                warn!(agent = %self.config.id, "{message}, holding");
                (DecisionBatch::hold_all(message.clone()), Some(message))
            }
        }
    }

    /// Closes first so freed margin is available to opens, then stop/target
    /// updates, then opens.
    async fn execute(
        &mut self,
        decisions: &[Decision],
        verdicts: &[RiskVerdict],
        marks: &HashMap<Symbol, Decimal>,
    ) -> Vec<ActionOutcome> {
        let mut order: Vec<usize> = (0..decisions.len()).collect();
        order.sort_by_key(|&i| {
            let action = decisions[i].action;
            if action.reduces_exposure() {
                0
            } else if action.is_adjustment() {
                1
            } else {
                2
            }
        });

        let mut outcomes = Vec::with_capacity(decisions.len());
        for i in order {
            let decision = &decisions[i];
            let mut outcome = ActionOutcome {
                symbol: decision.canonical_symbol().to_string(),
                action: decision.action,
                approved: verdicts[i].is_approved(),
                executed: false,
                detail: String::new(),
                fill: None,
            };

            if let RiskVerdict::Rejected { reason } = &verdicts[i] {
                info!(agent = %self.config.id, symbol = %outcome.symbol, action = %decision.action, "🚫 Risk gate: {reason}");
                outcome.detail = reason.clone();
                outcomes.push(outcome);
                continue;
            }

            let result = match decision.action {
                action if action.is_close() => self.close(decision, marks).await.map(Some),
                Action::PartialClose => self.partial_close(decision, marks).await.map(Some),
                action if action.is_adjustment() => self.adjust(decision).await.map(|_| None),
                _ => self.open(decision, marks).await.map(Some),
            };
            match result {
                Ok(fill) => {
                    outcome.executed = true;
                    outcome.fill = fill;
                }
                Err(ExecutionError::NoPosition { symbol, side }) => {
                    warn!(agent = %self.config.id, %symbol, %side, "nothing to close");
                    outcome.detail = format!("no {side} position open for {symbol}");
                }
                Err(e) => {
                    error!(agent = %self.config.id, symbol = %outcome.symbol, action = %decision.action, error = %e, "execution failed");
                    outcome.detail = e.to_string();
                }
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn price_for(&self, symbol: &Symbol, marks: &HashMap<Symbol, Decimal>) -> Result<Decimal, ExecutionError> {
        if let Some(price) = marks.get(symbol) {
            return Ok(*price);
        }
        self.gateway
            .price(symbol)
            .await
            .map_err(|e| ExecutionError::Transport(e.to_string()))
    }

    async fn close(&mut self, decision: &Decision, marks: &HashMap<Symbol, Decimal>) -> Result<Fill, ExecutionError> {
        let symbol = decision.canonical_symbol();
        let Some(side) = decision.action.position_side() else {
            return Err(ExecutionError::Rejected("not a close".into()));
        };
        let price = self.price_for(&symbol, marks).await?;
        let fill = self
            .executor
            .close_position(&symbol, side, Decimal::ZERO, price)
            .await?;
        if let Err(e) = self.executor.cancel_orders(&symbol).await {
            warn!(agent = %self.config.id, %symbol, error = %e, "leftover protective orders not cancelled");
        }
        info!(
            agent = %self.config.id,
            "✅ Closed {} {} qty {} @ {} (pnl {})",
            side,
            symbol,
            fill.quantity,
            fill.price,
            fill.realized_pnl.unwrap_or_default()
        );
        Ok(fill)
    }

    /// The one open position on `symbol`. Actions that do not name a side
    /// refuse to guess when both sides are open.
    async fn held_position(&self, symbol: &Symbol) -> Result<Position, ExecutionError> {
        let mut held: Vec<Position> = self
            .executor
            .positions()
            .await?
            .into_iter()
            .filter(|p| &p.symbol == symbol)
            .collect();
        match held.len() {
            0 => Err(ExecutionError::Rejected(format!("no open position on {symbol}"))),
            1 => Ok(held.remove(0)),
            _ => Err(ExecutionError::Rejected(format!(
                "both sides of {symbol} are open, name the side with close_long or close_short"
            ))),
        }
    }

    async fn partial_close(&mut self, decision: &Decision, marks: &HashMap<Symbol, Decimal>) -> Result<Fill, ExecutionError> {
        let symbol = decision.canonical_symbol();
        let pct = decision.close_percentage.unwrap_or(Decimal::ONE_HUNDRED);
        let position = self.held_position(&symbol).await?;
        let price = self.price_for(&symbol, marks).await?;
        let quantity = self
            .executor
            .format_quantity(&symbol, position.quantity * pct / Decimal::ONE_HUNDRED);
        if quantity <= Decimal::ZERO {
            return Err(ExecutionError::Rejected(format!(
                "{pct}% of {} {symbol} rounds to zero quantity",
                position.quantity
            )));
        }

        let fill = self
            .executor
            .close_position(&symbol, position.side, quantity, price)
            .await?;
        if fill.quantity >= position.quantity {
            if let Err(e) = self.executor.cancel_orders(&symbol).await {
                warn!(agent = %self.config.id, %symbol, error = %e, "leftover protective orders not cancelled");
            }
        }
        info!(
            agent = %self.config.id,
            "✂️ Closed {}% of {} {}: qty {} @ {} (pnl {})",
            pct,
            position.side,
            symbol,
            fill.quantity,
            fill.price,
            fill.realized_pnl.unwrap_or_default()
        );
        Ok(fill)
    }

    async fn adjust(&mut self, decision: &Decision) -> Result<(), ExecutionError> {
        let symbol = decision.canonical_symbol();
        let position = self.held_position(&symbol).await?;
        match (decision.action, decision.new_stop_loss, decision.new_take_profit) {
            (Action::UpdateStopLoss, Some(stop), _) => {
                self.executor
                    .set_stop_loss(&symbol, position.side, position.quantity, stop)
                    .await?;
                info!(agent = %self.config.id, "🛡️ Stop loss for {} {} moved to {}", position.side, symbol, stop);
            }
            (Action::UpdateTakeProfit, _, Some(target)) => {
                self.executor
                    .set_take_profit(&symbol, position.side, position.quantity, target)
                    .await?;
                info!(agent = %self.config.id, "🎯 Take profit for {} {} moved to {}", position.side, symbol, target);
            }
            _ => return Err(ExecutionError::Rejected("update without a new price".into())),
        }
        Ok(())
    }

    async fn open(&mut self, decision: &Decision, marks: &HashMap<Symbol, Decimal>) -> Result<Fill, ExecutionError> {
        let symbol = decision.canonical_symbol();
        let (Some(side), Some(size)) = (decision.action.position_side(), decision.size_usd) else {
            return Err(ExecutionError::Rejected("open without side or size".into()));
        };
        let price = self.price_for(&symbol, marks).await?;
        let quantity = self.executor.format_quantity(&symbol, size / price);
        if quantity <= Decimal::ZERO {
            return Err(ExecutionError::Rejected(format!(
                "{size} at {price} rounds to zero quantity"
            )));
        }

        info!(
            agent = %self.config.id,
            "🚀 Opening {} {} qty {} @ {} x{}",
            side, symbol, quantity, price, decision.leverage
        );
        self.executor.set_leverage(&symbol, decision.leverage).await?;
        let fill = self
            .executor
            .open_position(&symbol, side, quantity, price, decision.leverage)
            .await?;

        if let Some(stop) = decision.stop_loss.filter(|p| *p > Decimal::ZERO) {
            if let Err(e) = self.executor.set_stop_loss(&symbol, side, fill.quantity, stop).await {
                error!(agent = %self.config.id, %symbol, error = %e, "stop loss not placed");
            }
        }
        if let Some(target) = decision.take_profit.filter(|p| *p > Decimal::ZERO) {
            if let Err(e) = self.executor.set_take_profit(&symbol, side, fill.quantity, target).await {
                error!(agent = %self.config.id, %symbol, error = %e, "take profit not placed");
            }
        }
        Ok(fill)
    }

    async fn record(
        &mut self,
        started: DateTime<Utc>,
        batch: DecisionBatch,
        outcomes: Vec<ActionOutcome>,
        collaborator_error: Option<String>,
        marks: &HashMap<Symbol, Decimal>,
    ) -> CycleRecord {
        if let Err(e) = self.executor.persist().await {
            // state stays in memory, the next cycle saves again
            error!(agent = %self.config.id, error = %e, "💾 Ledger save failed");
        }

        let account = match self.executor.sync_account(marks).await {
            Ok(account) => Some(account),
            Err(e) => {
                warn!(agent = %self.config.id, error = %e, "account refresh after execution failed");
                None
            }
        };

        let record = CycleRecord {
            cycle: self.cycle,
            timestamp: started,
            reasoning: batch.reasoning,
            outcomes,
            account: account.clone(),
            error: collaborator_error.clone(),
        };
        self.history.push(record.clone());

        let executed = record.outcomes.iter().filter(|o| o.executed).count();
        info!(
            agent = %self.config.id,
            cycle = self.cycle,
            executed,
            equity = %account.as_ref().map(|a| a.total_equity).unwrap_or_default(),
            "📒 Cycle recorded"
        );

        let ledger = self.executor.ledger_snapshot();
        let cycle = self.cycle;
        let last = record.clone();
        self.status.send_modify(move |s| {
            s.cycles = cycle;
            s.last_cycle_at = Some(started);
            s.last_error = collaborator_error;
            if account.is_some() {
                s.account = account;
            }
            if ledger.is_some() {
                s.ledger = ledger;
            }
            s.last_record = Some(last);
        });
        record
    }
}
