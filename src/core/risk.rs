// src/core/risk.rs
//! Pre-execution checks on collaborator decisions. Pure: nothing here
//! touches the ledger.

use crate::config::RiskLimits;
use crate::decision::types::{Action, Decision};
use crate::ledger::LedgerState;
use crate::types::{Position, PositionKey, PositionSide, Symbol};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetClass {
    Major,
    Altcoin,
}

impl AssetClass {
    pub fn of(symbol: &Symbol) -> Self {
        match symbol.base_asset() {
            "BTC" | "ETH" => AssetClass::Major,
            _ => AssetClass::Altcoin,
        }
    }

    pub fn max_leverage(&self, limits: &RiskLimits) -> u32 {
        match self {
            AssetClass::Major => limits.major_max_leverage,
            AssetClass::Altcoin => limits.altcoin_max_leverage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum RiskVerdict {
    Approved,
    Rejected { reason: String },
}

impl RiskVerdict {
    fn reject(reason: impl Into<String>) -> Self {
        RiskVerdict::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, RiskVerdict::Approved)
    }
}

impl fmt::Display for RiskVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskVerdict::Approved => f.write_str("approved"),
            RiskVerdict::Rejected { reason } => write!(f, "rejected: {reason}"),
        }
    }
}

/// Checks one decision against `state`, first failure wins:
/// leverage cap, size bounds, stop loss / take profit, concurrent positions.
/// Holds and full closes always pass; partial closes and stop/target updates
/// only need well-formed parameters.
pub fn evaluate(
    decision: &Decision,
    price: Decimal,
    state: &LedgerState,
    limits: &RiskLimits,
) -> RiskVerdict {
    let side = match decision.action {
        Action::OpenLong => PositionSide::Long,
        Action::OpenShort => PositionSide::Short,
        Action::PartialClose => return check_close_percentage(decision.close_percentage),
        Action::UpdateStopLoss => return check_new_price("stop loss", decision.new_stop_loss),
        Action::UpdateTakeProfit => return check_new_price("take profit", decision.new_take_profit),
        Action::CloseLong | Action::CloseShort | Action::Hold => return RiskVerdict::Approved,
    };
    let symbol = decision.canonical_symbol();

    let cap = AssetClass::of(&symbol).max_leverage(limits);
    if decision.leverage == 0 || decision.leverage > cap {
        return RiskVerdict::reject(format!(
            "leverage {} outside 1..={} for {}",
            decision.leverage, cap, symbol
        ));
    }

    let size = match decision.size_usd {
        Some(size) if size > Decimal::ZERO => size,
        _ => return RiskVerdict::reject("position size must be positive"),
    };
    if size < limits.min_position_usd {
        return RiskVerdict::reject(format!(
            "position size {} below minimum {}",
            size, limits.min_position_usd
        ));
    }
    let existing = state
        .position(&symbol, side)
        .map(Position::notional_at_entry)
        .unwrap_or_default();
    if existing + size > limits.max_position_notional {
        return RiskVerdict::reject(format!(
            "notional {} exceeds cap {}",
            existing + size,
            limits.max_position_notional
        ));
    }

    let stop = decision.stop_loss.filter(|p| *p > Decimal::ZERO);
    let target = decision.take_profit.filter(|p| *p > Decimal::ZERO);
    if limits.require_stop_loss_take_profit && (stop.is_none() || target.is_none()) {
        return RiskVerdict::reject("stop loss and take profit are required");
    }
    if let Some(reason) = protective_order_problem(side, price, stop, target) {
        return RiskVerdict::reject(reason);
    }

    let is_new = state.position(&symbol, side).is_none();
    if is_new && state.open_count() >= limits.max_concurrent_positions {
        return RiskVerdict::reject(format!(
            "already holding {} positions (max {})",
            state.open_count(),
            limits.max_concurrent_positions
        ));
    }

    RiskVerdict::Approved
}

fn check_close_percentage(pct: Option<Decimal>) -> RiskVerdict {
    match pct {
        Some(p) if p > Decimal::ZERO && p <= Decimal::ONE_HUNDRED => RiskVerdict::Approved,
        Some(p) => RiskVerdict::reject(format!("close percentage {p} outside (0, 100]")),
        None => RiskVerdict::reject("partial close needs close_percentage"),
    }
}

fn check_new_price(what: &str, price: Option<Decimal>) -> RiskVerdict {
    match price {
        Some(p) if p > Decimal::ZERO => RiskVerdict::Approved,
        _ => RiskVerdict::reject(format!("new {what} must be a positive price")),
    }
}

fn protective_order_problem(
    side: PositionSide,
    price: Decimal,
    stop: Option<Decimal>,
    target: Option<Decimal>,
) -> Option<String> {
    let (stop_ok, target_ok) = match side {
        PositionSide::Long => (stop.map_or(true, |s| s < price), target.map_or(true, |t| t > price)),
        PositionSide::Short => (stop.map_or(true, |s| s > price), target.map_or(true, |t| t < price)),
    };
    if !stop_ok {
        let rel = if side == PositionSide::Long { "below" } else { "above" };
        return Some(format!("{side} stop loss must be {rel} price {price}"));
    }
    if !target_ok {
        let rel = if side == PositionSide::Long { "above" } else { "below" };
        return Some(format!("{side} take profit must be {rel} price {price}"));
    }
    None
}

/// Evaluates a whole batch in execution order (closes first, then opens)
/// against a projection of the ledger, so approvals within one cycle cannot
/// jointly exceed the limits. Output keeps the input order.
pub fn evaluate_batch(
    decisions: &[Decision],
    prices: &HashMap<Symbol, Decimal>,
    state: &LedgerState,
    limits: &RiskLimits,
) -> Vec<RiskVerdict> {
    let mut projected = state.clone();
    let mut verdicts = vec![RiskVerdict::Approved; decisions.len()];

    for decision in decisions {
        if decision.action.is_close() {
            if let Some(side) = decision.action.position_side() {
                projected
                    .positions
                    .remove(&PositionKey::new(decision.canonical_symbol(), side));
            }
        }
    }

    for (i, decision) in decisions.iter().enumerate() {
        let symbol = decision.canonical_symbol();
        if !decision.action.is_open() {
            let price = prices.get(&symbol).copied().unwrap_or_default();
            verdicts[i] = evaluate(decision, price, &projected, limits);
            continue;
        }
        let Some(price) = prices.get(&symbol).copied() else {
            verdicts[i] = RiskVerdict::reject(format!("{symbol} is not in the watch list"));
            continue;
        };
        let verdict = evaluate(decision, price, &projected, limits);
        if verdict.is_approved() {
            project_open(&mut projected, decision, &symbol, price);
        }
        verdicts[i] = verdict;
    }
    verdicts
}

fn project_open(state: &mut LedgerState, decision: &Decision, symbol: &Symbol, price: Decimal) {
    let (Some(side), Some(size)) = (decision.action.position_side(), decision.size_usd) else {
        return;
    };
    let key = PositionKey::new(symbol.clone(), side);
    let position = state.positions.entry(key).or_insert_with(|| Position {
        symbol: symbol.clone(),
        side,
        quantity: Decimal::ZERO,
        entry_price: price,
        leverage: decision.leverage,
        unrealized_pnl: Decimal::ZERO,
    });
    // keep notional_at_entry additive
    let notional = position.notional_at_entry() + size;
    position.entry_price = price;
    position.quantity = notional / price;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn open(symbol: &str, action: Action, leverage: u32, size: Decimal, sl: Decimal, tp: Decimal) -> Decision {
        Decision {
            symbol: symbol.into(),
            action,
            leverage,
            size_usd: Some(size),
            stop_loss: Some(sl),
            take_profit: Some(tp),
            close_percentage: None,
            new_stop_loss: None,
            new_take_profit: None,
            confidence: Some(80.0),
            reasoning: String::new(),
        }
    }

    fn limits() -> RiskLimits {
        RiskLimits {
            major_max_leverage: 10,
            altcoin_max_leverage: 5,
            max_position_notional: dec!(5000),
            min_position_usd: dec!(12),
            require_stop_loss_take_profit: true,
            max_concurrent_positions: 2,
        }
    }

    fn holding(symbols: &[&str]) -> LedgerState {
        let mut state = LedgerState::new(dec!(10000));
        for s in symbols {
            let p = Position {
                symbol: Symbol::normalize(s),
                side: PositionSide::Long,
                quantity: dec!(1),
                entry_price: dec!(100),
                leverage: 2,
                unrealized_pnl: dec!(0),
            };
            state.positions.insert(p.key(), p);
        }
        state
    }

    fn reason(verdict: RiskVerdict) -> String {
        match verdict {
            RiskVerdict::Rejected { reason } => reason,
            RiskVerdict::Approved => panic!("expected rejection"),
        }
    }

    #[test]
    fn leverage_cap_depends_on_asset_class() {
        let state = holding(&[]);
        let btc = open("BTCUSDT", Action::OpenLong, 10, dec!(1000), dec!(45000), dec!(55000));
        assert!(evaluate(&btc, dec!(50000), &state, &limits()).is_approved());

        let sol = open("SOLUSDT", Action::OpenLong, 10, dec!(1000), dec!(90), dec!(120));
        assert!(reason(evaluate(&sol, dec!(100), &state, &limits())).contains("leverage 10"));

        let zero = open("SOLUSDT", Action::OpenLong, 0, dec!(1000), dec!(90), dec!(120));
        assert!(!evaluate(&zero, dec!(100), &state, &limits()).is_approved());
    }

    #[test]
    fn first_failing_check_wins() {
        // bad leverage and missing stop: leverage is reported
        let mut d = open("SOLUSDT", Action::OpenShort, 50, dec!(1000), dec!(0), dec!(90));
        d.stop_loss = None;
        assert!(reason(evaluate(&d, dec!(100), &holding(&[]), &limits())).contains("leverage"));
    }

    #[test]
    fn notional_includes_existing_position() {
        let state = holding(&["SOL"]);
        let d = open("SOL", Action::OpenLong, 2, dec!(4950), dec!(90), dec!(120));
        assert!(reason(evaluate(&d, dec!(100), &state, &limits())).contains("notional 5050"));

        let d = open("SOL", Action::OpenLong, 2, dec!(4900), dec!(90), dec!(120));
        assert!(evaluate(&d, dec!(100), &state, &limits()).is_approved());
    }

    #[test]
    fn protective_orders_required_and_on_the_right_side() {
        let state = holding(&[]);
        let mut d = open("ETH", Action::OpenLong, 3, dec!(500), dec!(2900), dec!(3300));
        d.take_profit = None;
        assert!(reason(evaluate(&d, dec!(3000), &state, &limits())).contains("required"));

        let d = open("ETH", Action::OpenShort, 3, dec!(500), dec!(2900), dec!(3300));
        assert!(reason(evaluate(&d, dec!(3000), &state, &limits())).contains("stop loss must be above"));

        let mut relaxed = limits();
        relaxed.require_stop_loss_take_profit = false;
        let mut d = open("ETH", Action::OpenShort, 3, dec!(500), dec!(3100), dec!(2800));
        d.take_profit = None;
        assert!(evaluate(&d, dec!(3000), &state, &relaxed).is_approved());
    }

    #[test]
    fn concurrent_limit_only_counts_new_positions() {
        let state = holding(&["SOL", "DOGE"]);
        let new = open("ADA", Action::OpenLong, 2, dec!(100), dec!(0.4), dec!(0.6));
        assert!(reason(evaluate(&new, dec!(0.5), &state, &limits())).contains("already holding 2"));

        let add = open("SOL", Action::OpenLong, 2, dec!(100), dec!(90), dec!(120));
        assert!(evaluate(&add, dec!(100), &state, &limits()).is_approved());
    }

    #[test]
    fn holds_and_closes_pass() {
        let state = holding(&[]);
        let mut d = Decision::hold("ALL", "");
        assert!(evaluate(&d, dec!(1), &state, &limits()).is_approved());
        d.action = Action::CloseShort;
        d.leverage = 100;
        assert!(evaluate(&d, dec!(1), &state, &limits()).is_approved());
    }

    #[test]
    fn dust_opens_are_refused() {
        let state = holding(&[]);
        let d = open("SOLUSDT", Action::OpenLong, 3, dec!(5), dec!(10), dec!(200));
        assert!(reason(evaluate(&d, dec!(100), &state, &limits())).contains("below minimum 12"));

        let d = open("SOLUSDT", Action::OpenLong, 3, dec!(12), dec!(90), dec!(200));
        assert!(evaluate(&d, dec!(100), &state, &limits()).is_approved());
    }

    #[test]
    fn partial_close_percentage_bounds() {
        let state = holding(&["ETH"]);
        for pct in [dec!(0), dec!(-10), dec!(150)] {
            let d = Decision {
                action: Action::PartialClose,
                close_percentage: Some(pct),
                ..Decision::hold("ETHUSDT", "")
            };
            assert!(reason(evaluate(&d, dec!(3000), &state, &limits())).contains("close percentage"));
        }
        let missing = Decision {
            action: Action::PartialClose,
            ..Decision::hold("ETHUSDT", "")
        };
        assert!(!evaluate(&missing, dec!(3000), &state, &limits()).is_approved());

        let half = Decision {
            action: Action::PartialClose,
            close_percentage: Some(dec!(50)),
            ..Decision::hold("ETHUSDT", "")
        };
        assert!(evaluate(&half, dec!(3000), &state, &limits()).is_approved());
        let all = Decision {
            close_percentage: Some(dec!(100)),
            ..half
        };
        assert!(evaluate(&all, dec!(3000), &state, &limits()).is_approved());
    }

    #[test]
    fn stop_and_target_updates_need_positive_prices() {
        let state = holding(&["BTC"]);
        let zero_stop = Decision {
            action: Action::UpdateStopLoss,
            new_stop_loss: Some(dec!(0)),
            ..Decision::hold("BTCUSDT", "")
        };
        assert!(reason(evaluate(&zero_stop, dec!(50000), &state, &limits())).contains("stop loss"));

        let stop = Decision {
            new_stop_loss: Some(dec!(48000)),
            ..zero_stop
        };
        assert!(evaluate(&stop, dec!(50000), &state, &limits()).is_approved());

        let no_target = Decision {
            action: Action::UpdateTakeProfit,
            ..Decision::hold("BTCUSDT", "")
        };
        assert!(reason(evaluate(&no_target, dec!(50000), &state, &limits())).contains("take profit"));
    }

    #[test]
    fn batch_checks_position_management_too() {
        let state = holding(&["SOL"]);
        let decisions = vec![Decision {
            action: Action::PartialClose,
            close_percentage: Some(dec!(120)),
            ..Decision::hold("SOL", "")
        }];
        let verdicts = evaluate_batch(&decisions, &HashMap::new(), &state, &limits());
        assert!(!verdicts[0].is_approved());
    }

    #[test]
    fn batch_frees_slots_with_closes_and_counts_earlier_opens() {
        let state = holding(&["SOL", "DOGE"]);
        let prices = HashMap::from([
            (Symbol::normalize("ADA"), dec!(0.5)),
            (Symbol::normalize("XRP"), dec!(0.6)),
            (Symbol::normalize("SOL"), dec!(100)),
        ]);
        let decisions = vec![
            open("ADA", Action::OpenLong, 2, dec!(100), dec!(0.4), dec!(0.6)),
            open("XRP", Action::OpenLong, 2, dec!(100), dec!(0.5), dec!(0.7)),
            Decision {
                action: Action::CloseLong,
                ..Decision::hold("SOL", "")
            },
            open("LINK", Action::OpenLong, 2, dec!(100), dec!(9), dec!(12)),
        ];
        let verdicts = evaluate_batch(&decisions, &prices, &state, &limits());
        // SOL close frees one slot, ADA takes it, XRP has none left
        assert!(verdicts[0].is_approved());
        assert!(!verdicts[1].is_approved());
        assert!(verdicts[2].is_approved());
        assert!(reason(verdicts[3].clone()).contains("watch list"));
    }
}
