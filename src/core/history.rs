// src/core/history.rs
use crate::decision::types::Action;
use crate::types::{AccountSnapshot, Fill};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;

/// What happened to one decision during a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub symbol: String,
    pub action: Action,
    pub approved: bool,
    pub executed: bool,
    /// Rejection reason or execution error, empty on success.
    pub detail: String,
    pub fill: Option<Fill>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleRecord {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub reasoning: String,
    pub outcomes: Vec<ActionOutcome>,
    pub account: Option<AccountSnapshot>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Percent of closing trades with positive PnL.
    pub win_rate: f64,
    pub total_pnl: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    /// `None` until there is at least one loss.
    pub profit_factor: Option<f64>,
}

/// Rolling window of recent cycles, oldest dropped first.
#[derive(Debug, Clone)]
pub struct DecisionHistory {
    capacity: usize,
    records: VecDeque<CycleRecord>,
}

impl DecisionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: CycleRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn latest(&self) -> Option<&CycleRecord> {
        self.records.back()
    }

    pub fn records(&self) -> impl Iterator<Item = &CycleRecord> {
        self.records.iter()
    }

    /// Summary over realized PnL of every closing fill in the window.
    pub fn performance(&self) -> PerformanceSummary {
        let mut summary = PerformanceSummary::default();
        let realized = self
            .records
            .iter()
            .flat_map(|r| r.outcomes.iter())
            .filter_map(|o| o.fill.as_ref()?.realized_pnl);

        for pnl in realized {
            summary.trades += 1;
            summary.total_pnl += pnl;
            if pnl > Decimal::ZERO {
                summary.wins += 1;
                summary.gross_profit += pnl;
            } else if pnl < Decimal::ZERO {
                summary.losses += 1;
                summary.gross_loss += pnl.abs();
            }
        }

        if summary.trades > 0 {
            summary.win_rate = summary.wins as f64 / summary.trades as f64 * 100.0;
        }
        if summary.gross_loss > Decimal::ZERO {
            summary.profit_factor = (summary.gross_profit / summary.gross_loss).to_f64();
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PositionSide, Symbol};
    use rust_decimal_macros::dec;

    fn closing(cycle: u64, pnl: Decimal) -> CycleRecord {
        CycleRecord {
            cycle,
            timestamp: Utc::now(),
            reasoning: String::new(),
            outcomes: vec![ActionOutcome {
                symbol: "BTCUSDT".into(),
                action: Action::CloseLong,
                approved: true,
                executed: true,
                detail: String::new(),
                fill: Some(Fill {
                    order_id: format!("paper_{cycle}"),
                    symbol: Symbol::normalize("BTC"),
                    side: PositionSide::Long,
                    reduce_only: true,
                    quantity: dec!(0.1),
                    price: dec!(50000),
                    realized_pnl: Some(pnl),
                }),
            }],
            account: None,
            error: None,
        }
    }

    #[test]
    fn empty_history_has_neutral_summary() {
        let history = DecisionHistory::new(5);
        assert_eq!(history.performance(), PerformanceSummary::default());
    }

    #[test]
    fn win_rate_and_profit_factor() {
        let mut history = DecisionHistory::new(10);
        history.push(closing(1, dec!(300)));
        history.push(closing(2, dec!(-100)));
        history.push(closing(3, dec!(100)));
        history.push(closing(4, dec!(-100)));

        let summary = history.performance();
        assert_eq!(summary.trades, 4);
        assert_eq!(summary.wins, 2);
        assert_eq!(summary.losses, 2);
        assert_eq!(summary.win_rate, 50.0);
        assert_eq!(summary.total_pnl, dec!(200));
        assert_eq!(summary.profit_factor, Some(2.0));
    }

    #[test]
    fn window_drops_oldest_cycles() {
        let mut history = DecisionHistory::new(2);
        history.push(closing(1, dec!(-500)));
        history.push(closing(2, dec!(10)));
        history.push(closing(3, dec!(20)));
        assert_eq!(history.len(), 2);
        assert_eq!(history.records().next().map(|r| r.cycle), Some(2));

        let summary = history.performance();
        assert_eq!(summary.total_pnl, dec!(30));
        assert_eq!(summary.profit_factor, None);
        assert_eq!(summary.win_rate, 100.0);
    }
}
