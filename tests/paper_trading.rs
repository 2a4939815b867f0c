// tests/paper_trading.rs
use autopilot::config::AgentConfig;
use autopilot::connectors::traits::ExecutionHandler;
use autopilot::core::risk::{evaluate, RiskVerdict};
use autopilot::decision::types::{Action, Decision};
use autopilot::error::LedgerError;
use autopilot::ledger::store::{JsonFileStore, StateStore};
use autopilot::ledger::Ledger;
use autopilot::types::{Exchange, PositionSide, Symbol};
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;

fn btc() -> Symbol {
    Symbol::normalize("BTC")
}

#[test]
fn long_round_trip_books_profit() {
    let mut ledger = Ledger::new("paper", dec!(10000)).unwrap();

    let open = ledger.open_long(&btc(), dec!(0.1), dec!(50000), 10).unwrap();
    assert_eq!(open.quantity, dec!(0.1));
    assert_eq!(ledger.account().margin_used, dec!(500));
    assert_eq!(ledger.account().available_balance, dec!(9500));

    let close = ledger.close_long(&btc(), dec!(0), dec!(55000)).unwrap();
    assert_eq!(close.realized_pnl, Some(dec!(500)));
    assert!(close.reduce_only);

    assert_eq!(ledger.realized_pnl(), dec!(500));
    assert_eq!(ledger.balance(), dec!(10500));
    assert!(ledger.position(&btc(), PositionSide::Long).is_none());
    assert_eq!(ledger.account().total_equity, dec!(10500));
}

#[test]
fn short_loses_when_price_rises() {
    let mut ledger = Ledger::new("paper", dec!(10000)).unwrap();
    let eth = Symbol::normalize("ETHUSDT");
    ledger.open_short(&eth, dec!(2), dec!(3000), 5).unwrap();

    let mut marks = HashMap::new();
    marks.insert(eth.clone(), dec!(3100));
    ledger.mark_to_market(&marks);
    assert_eq!(ledger.account().unrealized_pnl, dec!(-200));

    let fill = ledger.close_short(&eth, dec!(2), dec!(3100)).unwrap();
    assert_eq!(fill.realized_pnl, Some(dec!(-200)));
    assert_eq!(ledger.balance(), dec!(9800));
}

#[test]
fn closing_nothing_leaves_state_alone() {
    let mut ledger = Ledger::new("paper", dec!(10000)).unwrap();
    ledger.open_long(&btc(), dec!(0.1), dec!(50000), 10).unwrap();
    let before = ledger.state().clone();

    let err = ledger.close_short(&btc(), dec!(0), dec!(50000)).unwrap_err();
    assert!(matches!(err, LedgerError::NoPosition { .. }));
    assert_eq!(ledger.state(), &before);
}

#[test]
fn rejected_decision_never_reaches_the_ledger() {
    let ledger = Ledger::new("paper", dec!(10000)).unwrap();
    let limits = AgentConfig::new("paper", Exchange::Binance, &["BTC"], dec!(10000)).risk;
    let decision = Decision {
        symbol: "BTCUSDT".to_string(),
        action: Action::OpenLong,
        leverage: 50,
        size_usd: Some(dec!(1000)),
        stop_loss: Some(dec!(48000)),
        take_profit: Some(dec!(55000)),
        confidence: None,
        reasoning: String::new(),
        close_percentage: None,
        new_stop_loss: None,
        new_take_profit: None,
    };

    let verdict = evaluate(&decision, dec!(50000), ledger.state(), &limits);
    assert!(matches!(verdict, RiskVerdict::Rejected { .. }));
    assert_eq!(ledger.balance(), dec!(10000));
    assert_eq!(ledger.state().open_count(), 0);
}

#[tokio::test]
async fn ledger_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::new(dir.path()));

    {
        let mut ledger = Ledger::load("swing", dec!(10000), Some(store.clone())).await.unwrap();
        ledger.open_long(&btc(), dec!(0.1), dec!(50000), 10).unwrap();
        ledger.open_long(&btc(), dec!(0.1), dec!(52000), 10).unwrap();
        ledger.persist().await.unwrap();
    }

    let restored = Ledger::load("swing", dec!(10000), Some(store)).await.unwrap();
    let position = restored.position(&btc(), PositionSide::Long).unwrap();
    assert_eq!(position.quantity, dec!(0.2));
    assert_eq!(position.entry_price, dec!(51000));
    assert_eq!(restored.balance(), dec!(10000));
    assert!(restored.ledger_snapshot().is_some());
}

#[tokio::test]
async fn unreadable_state_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path());
    std::fs::write(store.path_for("broken"), "not json at all").unwrap();

    let ledger = Ledger::load("broken", dec!(2500), Some(Arc::new(store)))
        .await
        .unwrap();
    assert_eq!(ledger.balance(), dec!(2500));
    assert_eq!(ledger.state().open_count(), 0);
}
