// tests/agent_cycle.rs
mod common;

use common::*;
use autopilot::core::engine::CycleState;
use autopilot::decision::types::Action;
use autopilot::error::{CollaboratorError, CycleError};
use autopilot::indicators::IndicatorSet;
use autopilot::ledger::store::StateStore;
use autopilot::ledger::Ledger;
use autopilot::types::{PositionSide, Symbol};
use rust_decimal_macros::dec;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const PATIENT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn opens_then_closes_a_long_at_a_profit() {
    let market = ScriptedMarket::new(&[("BTC", dec!(50000))]);
    let trader = Arc::new(ScriptedTrader::new(vec![
        Ok(batch(vec![open_long("BTC", 10, dec!(5000), dec!(48000), dec!(55000))])),
        Ok(batch(vec![close("BTCUSDT", Action::CloseLong)])),
    ]));
    let mut agent = paper_agent(agent_config("swing", &["BTC"]), market.clone(), trader, PATIENT);
    let (_stop, shutdown) = watch::channel(false);

    let first = agent.run_cycle(&shutdown).await.unwrap();
    assert_eq!(first.outcomes.len(), 1);
    let opened = &first.outcomes[0];
    assert!(opened.approved && opened.executed, "{}", opened.detail);
    let fill = opened.fill.as_ref().unwrap();
    assert_eq!(fill.quantity, dec!(0.1));
    assert_eq!(fill.price, dec!(50000));

    let ledger = agent.executor().ledger_snapshot().unwrap();
    assert_eq!(ledger.positions.len(), 1);
    assert_eq!(ledger.positions[0].side, PositionSide::Long);
    assert_eq!(ledger.positions[0].leverage, 10);

    market.set_price("BTC", dec!(55000));
    let second = agent.run_cycle(&shutdown).await.unwrap();
    let closed = &second.outcomes[0];
    assert!(closed.executed, "{}", closed.detail);
    assert_eq!(closed.fill.as_ref().unwrap().realized_pnl, Some(dec!(500)));

    let ledger = agent.executor().ledger_snapshot().unwrap();
    assert!(ledger.positions.is_empty());
    assert_eq!(ledger.balance, dec!(10500));
    assert_eq!(ledger.realized_pnl, dec!(500));

    assert_eq!(agent.history().len(), 2);
    let performance = agent.history().performance();
    assert_eq!(performance.trades, 1);
    assert_eq!(performance.wins, 1);
    assert_eq!(agent.status().cycles, 2);
    assert_eq!(second.account.unwrap().total_equity, dec!(10500));
}

#[tokio::test]
async fn over_leveraged_open_is_refused() {
    let market = ScriptedMarket::new(&[("BTC", dec!(50000))]);
    let trader = Arc::new(ScriptedTrader::new(vec![Ok(batch(vec![open_long(
        "BTC",
        25,
        dec!(1000),
        dec!(48000),
        dec!(55000),
    )]))]));
    let mut agent = paper_agent(agent_config("risky", &["BTC"]), market, trader, PATIENT);
    let (_stop, shutdown) = watch::channel(false);

    let record = agent.run_cycle(&shutdown).await.unwrap();
    let outcome = &record.outcomes[0];
    assert!(!outcome.approved);
    assert!(!outcome.executed);
    assert!(outcome.fill.is_none());
    assert!(!outcome.detail.is_empty());

    let ledger = agent.executor().ledger_snapshot().unwrap();
    assert!(ledger.positions.is_empty());
    assert_eq!(ledger.balance, dec!(10000));
}

#[tokio::test]
async fn close_without_position_is_reported_not_fatal() {
    let market = ScriptedMarket::new(&[("ETH", dec!(3000))]);
    let trader = Arc::new(ScriptedTrader::new(vec![Ok(batch(vec![close(
        "ETH",
        Action::CloseShort,
    )]))]));
    let mut agent = paper_agent(agent_config("idle", &["ETH"]), market, trader, PATIENT);
    let (_stop, shutdown) = watch::channel(false);

    let record = agent.run_cycle(&shutdown).await.unwrap();
    let outcome = &record.outcomes[0];
    assert!(outcome.approved);
    assert!(!outcome.executed);
    assert!(outcome.detail.contains("no"), "{}", outcome.detail);
}

#[tokio::test]
async fn collaborator_failure_holds_everything() {
    let market = ScriptedMarket::new(&[("BTC", dec!(50000))]);
    let trader = Arc::new(ScriptedTrader::new(vec![Err(CollaboratorError::EmptyResponse)]));
    let mut agent = paper_agent(agent_config("quiet", &["BTC"]), market, trader, PATIENT);
    let (_stop, shutdown) = watch::channel(false);

    let record = agent.run_cycle(&shutdown).await.unwrap();
    assert!(record.outcomes.is_empty());
    assert!(record.error.as_deref().unwrap().contains("empty response"));
    assert_eq!(agent.status().last_error, record.error);
    assert_eq!(agent.executor().ledger_snapshot().unwrap().balance, dec!(10000));
}

#[tokio::test]
async fn slow_collaborator_times_out_into_a_hold() {
    let market = ScriptedMarket::new(&[("BTC", dec!(50000))]);
    let trader = Arc::new(ScriptedTrader::slow(Duration::from_millis(500)));
    let mut agent = paper_agent(
        agent_config("slow", &["BTC"]),
        market,
        trader,
        Duration::from_millis(20),
    );
    let (_stop, shutdown) = watch::channel(false);

    let record = agent.run_cycle(&shutdown).await.unwrap();
    assert!(record.outcomes.is_empty());
    assert!(record.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn unlisted_symbols_are_skipped_and_cannot_be_traded() {
    let market = ScriptedMarket::new(&[("BTC", dec!(50000))]);
    let trader = Arc::new(ScriptedTrader::new(vec![Ok(batch(vec![open_long(
        "DOGE",
        3,
        dec!(100),
        dec!(0.05),
        dec!(0.2),
    )]))]));
    let mut agent = paper_agent(agent_config("mixed", &["BTC", "DOGE"]), market, trader, PATIENT);
    let (_stop, shutdown) = watch::channel(false);

    let record = agent.run_cycle(&shutdown).await.unwrap();
    assert_eq!(record.outcomes.len(), 1);
    assert_eq!(record.outcomes[0].symbol, Symbol::normalize("DOGE").to_string());
    assert!(!record.outcomes[0].approved);
}

#[tokio::test]
async fn nothing_tradable_fails_the_cycle() {
    let market = ScriptedMarket::new(&[("BTC", dec!(50000))]);
    let trader = Arc::new(ScriptedTrader::default());
    let mut agent = paper_agent(agent_config("lost", &["DOGE"]), market, trader.clone(), PATIENT);
    let (_stop, shutdown) = watch::channel(false);

    let err = agent.run_cycle(&shutdown).await.unwrap_err();
    assert!(matches!(err, CycleError::NoTradableSymbols));
    assert_eq!(trader.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn exchange_outage_aborts_before_deciding() {
    let market = ScriptedMarket::new(&[("BTC", dec!(50000))]);
    market.outage.store(true, Ordering::SeqCst);
    let trader = Arc::new(ScriptedTrader::default());
    let mut agent = paper_agent(agent_config("offline", &["BTC"]), market, trader.clone(), PATIENT);
    let (_stop, shutdown) = watch::channel(false);

    let err = agent.run_cycle(&shutdown).await.unwrap_err();
    assert!(matches!(err, CycleError::MarketData(_)));
    assert_eq!(trader.calls.load(Ordering::SeqCst), 0);
    assert!(agent.history().is_empty());
}

#[tokio::test]
async fn stop_request_cancels_before_any_work() {
    let market = ScriptedMarket::new(&[("BTC", dec!(50000))]);
    let trader = Arc::new(ScriptedTrader::default());
    let mut agent = paper_agent(agent_config("halt", &["BTC"]), market.clone(), trader, PATIENT);
    let (_stop, shutdown) = watch::channel(true);

    let err = agent.run_cycle(&shutdown).await.unwrap_err();
    assert!(matches!(err, CycleError::Cancelled));
    assert_eq!(market.candle_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn agents_keep_separate_ledgers() {
    let market = ScriptedMarket::new(&[("BTC", dec!(50000))]);
    let bull = Arc::new(ScriptedTrader::new(vec![Ok(batch(vec![open_long(
        "BTC",
        5,
        dec!(2000),
        dec!(48000),
        dec!(55000),
    )]))]));
    let bear = Arc::new(ScriptedTrader::default());
    let mut a = paper_agent(agent_config("a", &["BTC"]), market.clone(), bull, PATIENT);
    let mut b = paper_agent(agent_config("b", &["BTC"]), market, bear, PATIENT);
    let (_stop, shutdown) = watch::channel(false);

    a.run_cycle(&shutdown).await.unwrap();
    b.run_cycle(&shutdown).await.unwrap();

    assert_eq!(a.executor().ledger_snapshot().unwrap().positions.len(), 1);
    assert!(b.executor().ledger_snapshot().unwrap().positions.is_empty());
}

#[tokio::test]
async fn symbol_without_history_stays_in_view() {
    let market = ScriptedMarket::new(&[("BTC", dec!(50000)), ("NEW", dec!(2))]);
    market.without_history("NEW");
    let trader = Arc::new(ScriptedTrader::new(vec![Ok(batch(vec![open_long(
        "BTC",
        10,
        dec!(5000),
        dec!(48000),
        dec!(55000),
    )]))]));
    let mut agent = paper_agent(agent_config("fresh", &["BTC", "NEW"]), market, trader.clone(), PATIENT);
    let (_stop, shutdown) = watch::channel(false);

    let first = agent.run_cycle(&shutdown).await.unwrap();
    assert!(first.outcomes[0].executed, "{}", first.outcomes[0].detail);
    agent.run_cycle(&shutdown).await.unwrap();
    agent.run_cycle(&shutdown).await.unwrap();
    assert_eq!(agent.status().cycles, 3);

    let context = trader.last_context.lock().unwrap().clone().unwrap();
    let fresh = context
        .markets
        .iter()
        .find(|m| m.symbol == Symbol::normalize("NEW"))
        .expect("listed symbol without candles is still offered");
    assert_eq!(fresh.indicators, IndicatorSet::default());
    assert_eq!(fresh.current_price, dec!(2));
}

#[tokio::test]
async fn partial_close_trims_half_the_position() {
    let market = ScriptedMarket::new(&[("BTC", dec!(50000))]);
    let trader = Arc::new(ScriptedTrader::new(vec![
        Ok(batch(vec![open_long("BTC", 10, dec!(5000), dec!(48000), dec!(55000))])),
        Ok(batch(vec![partial_close("BTC", dec!(50))])),
    ]));
    let mut agent = paper_agent(agent_config("trim", &["BTC"]), market.clone(), trader, PATIENT);
    let (_stop, shutdown) = watch::channel(false);

    agent.run_cycle(&shutdown).await.unwrap();
    market.set_price("BTC", dec!(55000));
    let record = agent.run_cycle(&shutdown).await.unwrap();
    let trimmed = &record.outcomes[0];
    assert_eq!(trimmed.action, Action::PartialClose);
    assert!(trimmed.executed, "{}", trimmed.detail);
    let fill = trimmed.fill.as_ref().unwrap();
    assert_eq!(fill.quantity, dec!(0.05));
    assert_eq!(fill.realized_pnl, Some(dec!(250)));

    let ledger = agent.executor().ledger_snapshot().unwrap();
    assert_eq!(ledger.positions.len(), 1);
    assert_eq!(ledger.positions[0].quantity, dec!(0.05));
    assert_eq!(ledger.realized_pnl, dec!(250));
}

#[tokio::test]
async fn out_of_range_partial_close_is_refused() {
    let market = ScriptedMarket::new(&[("BTC", dec!(50000))]);
    let trader = Arc::new(ScriptedTrader::new(vec![
        Ok(batch(vec![open_long("BTC", 10, dec!(5000), dec!(48000), dec!(55000))])),
        Ok(batch(vec![partial_close("BTC", dec!(150))])),
    ]));
    let mut agent = paper_agent(agent_config("greedy", &["BTC"]), market, trader, PATIENT);
    let (_stop, shutdown) = watch::channel(false);

    agent.run_cycle(&shutdown).await.unwrap();
    let record = agent.run_cycle(&shutdown).await.unwrap();
    assert!(!record.outcomes[0].approved);
    let ledger = agent.executor().ledger_snapshot().unwrap();
    assert_eq!(ledger.positions[0].quantity, dec!(0.1));
}

#[tokio::test]
async fn stop_update_needs_an_open_position() {
    let market = ScriptedMarket::new(&[("BTC", dec!(50000))]);
    let trader = Arc::new(ScriptedTrader::new(vec![
        Ok(batch(vec![move_stop("BTC", dec!(49000))])),
        Ok(batch(vec![open_long("BTC", 10, dec!(5000), dec!(48000), dec!(55000))])),
        Ok(batch(vec![move_stop("BTC", dec!(49500))])),
    ]));
    let mut agent = paper_agent(agent_config("trail", &["BTC"]), market, trader, PATIENT);
    let (_stop, shutdown) = watch::channel(false);

    let early = agent.run_cycle(&shutdown).await.unwrap();
    assert!(early.outcomes[0].approved);
    assert!(!early.outcomes[0].executed);
    assert!(early.outcomes[0].detail.contains("no open position"), "{}", early.outcomes[0].detail);

    agent.run_cycle(&shutdown).await.unwrap();
    let moved = agent.run_cycle(&shutdown).await.unwrap();
    assert!(moved.outcomes[0].executed, "{}", moved.outcomes[0].detail);
    assert!(moved.outcomes[0].fill.is_none());
    assert_eq!(agent.executor().ledger_snapshot().unwrap().positions.len(), 1);
}

#[tokio::test]
async fn stop_raised_while_deciding_cancels_before_execution() {
    let market = ScriptedMarket::new(&[("BTC", dec!(50000))]);
    let (stop, shutdown) = watch::channel(false);
    let trader = Arc::new(ScriptedTrader::stopping(
        stop,
        vec![Ok(batch(vec![open_long("BTC", 10, dec!(5000), dec!(48000), dec!(55000))]))],
    ));
    let mut agent = paper_agent(agent_config("interrupted", &["BTC"]), market, trader.clone(), PATIENT);

    let err = agent.run_cycle(&shutdown).await.unwrap_err();
    assert!(matches!(err, CycleError::Cancelled));
    assert_eq!(trader.calls.load(Ordering::SeqCst), 1);

    let ledger = agent.executor().ledger_snapshot().unwrap();
    assert!(ledger.positions.is_empty());
    assert_eq!(ledger.balance, dec!(10000));
    assert!(agent.history().is_empty());
}

#[tokio::test]
async fn failed_save_is_retried_next_cycle() {
    let market = ScriptedMarket::new(&[("BTC", dec!(50000))]);
    let trader = Arc::new(ScriptedTrader::new(vec![Ok(batch(vec![open_long(
        "BTC",
        10,
        dec!(5000),
        dec!(48000),
        dec!(55000),
    )]))]));
    let store = FlakyStore::new(1);
    let config = agent_config("durable", &["BTC"]);
    let shared: Arc<dyn StateStore> = store.clone();
    let ledger = Ledger::load(&config.id, config.initial_balance, Some(shared))
        .await
        .unwrap();
    let mut agent = agent_with_ledger(config, market, trader, ledger, PATIENT);
    let (_stop, shutdown) = watch::channel(false);

    let first = agent.run_cycle(&shutdown).await.unwrap();
    assert!(first.outcomes[0].executed);
    assert_eq!(agent.history().len(), 1);
    assert_eq!(store.saves.load(Ordering::SeqCst), 1);
    assert!(store.saved.lock().unwrap().is_none());

    agent.run_cycle(&shutdown).await.unwrap();
    assert_eq!(store.saves.load(Ordering::SeqCst), 2);
    let saved = store.saved.lock().unwrap().clone().unwrap();
    assert_eq!(saved.positions.len(), 1);
}

#[tokio::test]
async fn run_loop_survives_a_failed_cycle() {
    let market = ScriptedMarket::new(&[("BTC", dec!(50000))]);
    market.outage.store(true, Ordering::SeqCst);
    let mut config = agent_config("resilient", &["BTC"]);
    config.cycle_interval_secs = 1;
    let agent = paper_agent(config, market.clone(), Arc::new(ScriptedTrader::default()), PATIENT);
    let status = agent.subscribe();
    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn(agent.run(shutdown));

    let mut failed = false;
    for _ in 0..100 {
        if status.borrow().last_error.is_some() {
            failed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(failed, "first cycle should fail during the outage");
    assert_eq!(status.borrow().cycles, 0);

    market.outage.store(false, Ordering::SeqCst);
    let mut recovered = false;
    for _ in 0..200 {
        if status.borrow().cycles > 0 {
            recovered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(recovered, "loop should keep ticking after a failure");
    assert!(status.borrow().last_error.is_none());

    stop.send(true).unwrap();
    tokio::time::timeout(PATIENT, task).await.unwrap().unwrap();
    assert_eq!(status.borrow().state, CycleState::Stopped);
}
