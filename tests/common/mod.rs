// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use autopilot::config::AgentConfig;
use autopilot::connectors::gateway::{MarketGateway, RetryPolicy};
use autopilot::connectors::traits::MarketDataAdapter;
use autopilot::core::engine::{AgentComponents, TradingAgent};
use autopilot::decision::context::DecisionContext;
use autopilot::decision::traits::DecisionMaker;
use autopilot::decision::types::{Action, Decision, DecisionBatch};
use autopilot::error::{AdapterError, CollaboratorError, PersistenceError};
use autopilot::ledger::store::StateStore;
use autopilot::ledger::{Ledger, LedgerSnapshot};
use autopilot::types::{Candle, Exchange, Instrument, InstrumentStatus, Interval, Symbol};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Exchange stand-in with settable prices and a switchable outage.
pub struct ScriptedMarket {
    listed: Vec<Symbol>,
    prices: Mutex<HashMap<Symbol, Decimal>>,
    no_history: Mutex<HashSet<Symbol>>,
    pub outage: AtomicBool,
    pub candle_calls: AtomicUsize,
}

impl ScriptedMarket {
    pub fn new(prices: &[(&str, Decimal)]) -> Arc<Self> {
        let prices: HashMap<Symbol, Decimal> = prices
            .iter()
            .map(|(s, p)| (Symbol::normalize(s), *p))
            .collect();
        Arc::new(Self {
            listed: prices.keys().cloned().collect(),
            prices: Mutex::new(prices),
            no_history: Mutex::new(HashSet::new()),
            outage: AtomicBool::new(false),
            candle_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices
            .lock()
            .unwrap()
            .insert(Symbol::normalize(symbol), price);
    }

    /// Listed and priced, but with no candles yet.
    pub fn without_history(&self, symbol: &str) {
        self.no_history
            .lock()
            .unwrap()
            .insert(Symbol::normalize(symbol));
    }

    fn price_of(&self, symbol: &Symbol) -> Option<Decimal> {
        self.prices.lock().unwrap().get(symbol).copied()
    }
}

pub fn candles_ending_at(price: f64, interval: Interval, n: usize) -> Vec<Candle> {
    let step = interval.duration_ms();
    (0..n)
        .map(|i| {
            let close = price * (1.0 - 0.001 * (n - 1 - i) as f64);
            let open = close * 0.999;
            let open_time = 1_700_000_000_000 + i as i64 * step;
            Candle {
                open_time,
                close_time: interval.close_time(open_time),
                open,
                high: close * 1.001,
                low: open * 0.999,
                close,
                volume: 10.0 + i as f64,
                quote_volume: (10.0 + i as f64) * close,
                trade_count: 100,
            }
        })
        .collect()
}

#[async_trait]
impl MarketDataAdapter for ScriptedMarket {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, AdapterError> {
        self.candle_calls.fetch_add(1, Ordering::SeqCst);
        if self.outage.load(Ordering::SeqCst) {
            return Err(AdapterError::transport(Exchange::Binance, "connection reset by peer"));
        }
        if self.no_history.lock().unwrap().contains(symbol) {
            return Ok(Vec::new());
        }
        let price = self.price_of(symbol).and_then(|p| p.to_f64()).unwrap_or(1.0);
        Ok(candles_ending_at(price, interval, limit))
    }

    async fn fetch_price(&self, symbol: &Symbol) -> Result<Decimal, AdapterError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(AdapterError::transport(Exchange::Binance, "connection reset by peer"));
        }
        self.price_of(symbol)
            .ok_or_else(|| AdapterError::malformed(Exchange::Binance, "no price"))
    }

    async fn fetch_instruments(&self) -> Result<Vec<Instrument>, AdapterError> {
        Ok(self
            .listed
            .iter()
            .map(|s| Instrument {
                symbol: s.clone(),
                native: s.to_string(),
                status: InstrumentStatus::Trading,
                quantity_precision: Some(3),
                price_precision: Some(2),
                max_leverage: Some(20),
            })
            .collect())
    }

    async fn fetch_funding_rate(&self, _symbol: &Symbol) -> Result<Option<f64>, AdapterError> {
        Ok(Some(0.0001))
    }
}

/// Replays queued batches, then holds.
#[derive(Default)]
pub struct ScriptedTrader {
    script: Mutex<VecDeque<Result<DecisionBatch, CollaboratorError>>>,
    delay: Option<Duration>,
    stop_on_decide: Option<watch::Sender<bool>>,
    pub calls: AtomicUsize,
    pub last_context: Mutex<Option<DecisionContext>>,
}

impl ScriptedTrader {
    pub fn new(script: Vec<Result<DecisionBatch, CollaboratorError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// Raises `stop` while answering, as if the agent were stopped mid-cycle.
    pub fn stopping(stop: watch::Sender<bool>, script: Vec<Result<DecisionBatch, CollaboratorError>>) -> Self {
        Self {
            stop_on_decide: Some(stop),
            ..Self::new(script)
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }
}

#[async_trait]
impl DecisionMaker for ScriptedTrader {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(&self, context: &DecisionContext) -> Result<DecisionBatch, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_context.lock().unwrap() = Some(context.clone());
        if let Some(stop) = &self.stop_on_decide {
            stop.send_replace(true);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(DecisionBatch::hold_all("nothing scripted")))
    }
}

pub fn batch(decisions: Vec<Decision>) -> DecisionBatch {
    DecisionBatch {
        reasoning: "scripted".to_string(),
        decisions,
    }
}

pub fn open_long(symbol: &str, leverage: u32, size: Decimal, stop: Decimal, target: Decimal) -> Decision {
    Decision {
        symbol: symbol.to_string(),
        action: Action::OpenLong,
        leverage,
        size_usd: Some(size),
        stop_loss: Some(stop),
        take_profit: Some(target),
        confidence: Some(75.0),
        reasoning: "breakout".to_string(),
        close_percentage: None,
        new_stop_loss: None,
        new_take_profit: None,
    }
}

pub fn close(symbol: &str, action: Action) -> Decision {
    Decision {
        action,
        ..Decision::hold(symbol, "exit")
    }
}

pub fn partial_close(symbol: &str, percentage: Decimal) -> Decision {
    Decision {
        action: Action::PartialClose,
        close_percentage: Some(percentage),
        ..Decision::hold(symbol, "trim")
    }
}

pub fn move_stop(symbol: &str, price: Decimal) -> Decision {
    Decision {
        action: Action::UpdateStopLoss,
        new_stop_loss: Some(price),
        ..Decision::hold(symbol, "trail")
    }
}

/// Store whose first `failures` saves fail with an I/O error.
pub struct FlakyStore {
    failures_left: AtomicUsize,
    pub saves: AtomicUsize,
    pub saved: Mutex<Option<LedgerSnapshot>>,
}

impl FlakyStore {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicUsize::new(failures),
            saves: AtomicUsize::new(0),
            saved: Mutex::new(None),
        })
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn load(&self, _agent_id: &str) -> Result<Option<LedgerSnapshot>, PersistenceError> {
        Ok(None)
    }

    async fn save(&self, agent_id: &str, snapshot: &LedgerSnapshot) -> Result<(), PersistenceError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(PersistenceError::Io {
                agent: agent_id.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        *self.saved.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }
}

pub fn fast_gateway(market: Arc<ScriptedMarket>) -> Arc<MarketGateway> {
    Arc::new(MarketGateway::new(
        market,
        RetryPolicy {
            attempts: 1,
            backoff: Duration::from_millis(1),
            timeout: Duration::from_secs(2),
        },
    ))
}

pub fn agent_config(id: &str, symbols: &[&str]) -> AgentConfig {
    let mut config = AgentConfig::new(id, Exchange::Binance, symbols, Decimal::from(10_000));
    config.risk.major_max_leverage = 10;
    config.candle_limit = 60;
    config
}

pub fn paper_agent(
    config: AgentConfig,
    market: Arc<ScriptedMarket>,
    trader: Arc<dyn DecisionMaker>,
    collaborator_timeout: Duration,
) -> TradingAgent {
    let ledger = Ledger::new(&config.id, config.initial_balance).unwrap();
    agent_with_ledger(config, market, trader, ledger, collaborator_timeout)
}

pub fn agent_with_ledger(
    config: AgentConfig,
    market: Arc<ScriptedMarket>,
    trader: Arc<dyn DecisionMaker>,
    ledger: Ledger,
    collaborator_timeout: Duration,
) -> TradingAgent {
    TradingAgent::new(
        config,
        AgentComponents {
            gateway: fast_gateway(market),
            decision_maker: trader,
            executor: Box::new(ledger),
        },
        collaborator_timeout,
    )
}
