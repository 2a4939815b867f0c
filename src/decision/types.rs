// src/decision/types.rs
use crate::types::{PositionSide, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Symbol used by a decision that applies to the whole watch list.
pub const ALL_SYMBOLS: &str = "ALL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
    /// Closes `close_percentage` percent of whichever side is open.
    PartialClose,
    UpdateStopLoss,
    UpdateTakeProfit,
    #[serde(alias = "wait")]
    Hold,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::OpenLong => "open_long",
            Action::OpenShort => "open_short",
            Action::CloseLong => "close_long",
            Action::CloseShort => "close_short",
            Action::PartialClose => "partial_close",
            Action::UpdateStopLoss => "update_stop_loss",
            Action::UpdateTakeProfit => "update_take_profit",
            Action::Hold => "hold",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Action::OpenLong | Action::OpenShort)
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Action::CloseLong | Action::CloseShort)
    }

    /// Full and partial closes. These run before anything else in a cycle.
    pub fn reduces_exposure(&self) -> bool {
        self.is_close() || *self == Action::PartialClose
    }

    /// Acts on an existing position without opening or closing it.
    pub fn is_adjustment(&self) -> bool {
        matches!(self, Action::UpdateStopLoss | Action::UpdateTakeProfit)
    }

    /// The side named by the action itself. `None` when the side comes from
    /// the open position (partial close, updates) or for hold.
    pub fn position_side(&self) -> Option<PositionSide> {
        match self {
            Action::OpenLong | Action::CloseLong => Some(PositionSide::Long),
            Action::OpenShort | Action::CloseShort => Some(PositionSide::Short),
            Action::PartialClose | Action::UpdateStopLoss | Action::UpdateTakeProfit | Action::Hold => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One instruction from the reasoning collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub symbol: String,
    pub action: Action,
    #[serde(default)]
    pub leverage: u32,
    /// Notional in quote currency.
    #[serde(default, alias = "position_size_usd")]
    pub size_usd: Option<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    /// Share of the position to close, in (0, 100].
    #[serde(default)]
    pub close_percentage: Option<Decimal>,
    #[serde(default)]
    pub new_stop_loss: Option<Decimal>,
    #[serde(default)]
    pub new_take_profit: Option<Decimal>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reasoning: String,
}

impl Decision {
    pub fn hold(symbol: &str, reasoning: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            action: Action::Hold,
            leverage: 0,
            size_usd: None,
            stop_loss: None,
            take_profit: None,
            close_percentage: None,
            new_stop_loss: None,
            new_take_profit: None,
            confidence: None,
            reasoning: reasoning.into(),
        }
    }

    pub fn canonical_symbol(&self) -> Symbol {
        Symbol::normalize(&self.symbol)
    }

    pub fn applies_to_all(&self) -> bool {
        self.symbol.trim().eq_ignore_ascii_case(ALL_SYMBOLS)
    }
}

/// Everything one collaborator call produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecisionBatch {
    /// Free-form reasoning preceding the structured decisions.
    pub reasoning: String,
    pub decisions: Vec<Decision>,
}

impl DecisionBatch {
    pub fn hold_all(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            decisions: vec![Decision::hold(ALL_SYMBOLS, reason.clone())],
            reasoning: reason,
        }
    }

    pub fn is_hold_all(&self) -> bool {
        self.decisions.iter().all(|d| d.action == Action::Hold)
    }
}
