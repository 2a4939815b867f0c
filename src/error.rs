// src/error.rs
use crate::types::{Exchange, PositionSide, Symbol};
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a market data adapter, tagged with the exchange it came from.
#[derive(Debug, Error)]
#[error("{exchange}: {kind}")]
pub struct AdapterError {
    pub exchange: Exchange,
    pub kind: AdapterErrorKind,
}

#[derive(Debug, Error)]
pub enum AdapterErrorKind {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("exchange rejected request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("symbol {0} is not listed")]
    UnknownSymbol(Symbol),

    #[error("symbol {0} is not trading")]
    NotTrading(Symbol),

    #[error("missing API credentials")]
    MissingCredentials,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl AdapterError {
    pub fn new(exchange: Exchange, kind: AdapterErrorKind) -> Self {
        Self { exchange, kind }
    }

    pub fn transport(exchange: Exchange, err: impl std::fmt::Display) -> Self {
        Self::new(exchange, AdapterErrorKind::Transport(err.to_string()))
    }

    pub fn malformed(exchange: Exchange, detail: impl Into<String>) -> Self {
        Self::new(exchange, AdapterErrorKind::MalformedPayload(detail.into()))
    }

    pub fn rejected(exchange: Exchange, code: i64, message: impl Into<String>) -> Self {
        Self::new(
            exchange,
            AdapterErrorKind::Rejected {
                code,
                message: message.into(),
            },
        )
    }

    pub fn from_reqwest(exchange: Exchange, err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::malformed(exchange, err.to_string());
        }
        Self::transport(exchange, err)
    }

    /// False for failures a retry next cycle cannot fix.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind,
            AdapterErrorKind::MissingCredentials
                | AdapterErrorKind::UnknownSymbol(_)
                | AdapterErrorKind::NotTrading(_)
                | AdapterErrorKind::Unsupported(_)
        )
    }

    /// Worth an immediate in-call retry (network hiccups only).
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            AdapterErrorKind::Transport(_) | AdapterErrorKind::Timeout(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("state store I/O failed for agent {agent}: {source}")]
    Io {
        agent: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot for agent {agent} is corrupt: {source}")]
    Corrupt {
        agent: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no {side} position open for {symbol}")]
    NoPosition { symbol: Symbol, side: PositionSide },

    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(Decimal),

    #[error("price must be positive, got {0}")]
    InvalidPrice(Decimal),

    #[error("leverage must be at least 1, got {0}")]
    InvalidLeverage(u32),

    #[error("insufficient margin: required {required}, available {available}")]
    InsufficientMargin {
        required: Decimal,
        available: Decimal,
    },

    #[error("initial balance must be positive, got {0}")]
    InvalidInitialBalance(Decimal),
}

/// Failure of an execution call, paper or live.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("no {side} position open for {symbol}")]
    NoPosition { symbol: Symbol, side: PositionSide },

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("exchange request failed: {0}")]
    Transport(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl From<LedgerError> for ExecutionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NoPosition { symbol, side } => ExecutionError::NoPosition { symbol, side },
            other => ExecutionError::Rejected(other.to_string()),
        }
    }
}

/// Failure talking to the decision collaborator. Always degrades to a hold.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("collaborator timed out after {0:?}")]
    Timeout(Duration),

    #[error("collaborator returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("collaborator returned an empty response")]
    EmptyResponse,

    #[error("malformed decision payload: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        CollaboratorError::Transport(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("agent '{agent}': {reason}")]
    InvalidAgent { agent: String, reason: String },

    #[error("duplicate agent id '{0}'")]
    DuplicateAgent(String),

    #[error(transparent)]
    Load(#[from] config::ConfigError),
}

impl ConfigError {
    pub fn invalid(agent: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidAgent {
            agent: agent.to_string(),
            reason: reason.into(),
        }
    }
}

/// Reasons a single decision cycle stops early. The agent loop keeps running.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("market data unavailable: {0}")]
    MarketData(#[from] AdapterError),

    #[error("account sync failed: {0}")]
    Account(#[from] ExecutionError),

    #[error("no tradable symbols left in the watch list")]
    NoTradableSymbols,

    #[error("cycle cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unknown agent '{0}'")]
    UnknownAgent(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("agent '{agent}' failed to start: {reason}")]
    Startup { agent: String, reason: String },
}
