// src/types.rs
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Quote asset every canonical symbol is expressed against.
pub const QUOTE_ASSET: &str = "USDT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exchange {
    Binance,
    BinanceUs,
    Bybit,
    Hyperliquid,
    Finnhub,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Binance => "binance",
            Exchange::BinanceUs => "binance_us",
            Exchange::Bybit => "bybit",
            Exchange::Hyperliquid => "hyperliquid",
            Exchange::Finnhub => "finnhub",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical trading pair, e.g. `BTCUSDT`.
///
/// Construction always goes through [`Symbol::normalize`], so two symbols
/// compare equal exactly when they name the same market.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Uppercases, strips separators and appends the quote asset when missing.
    /// `normalize(normalize(s)) == normalize(s)` for every input.
    pub fn normalize(raw: &str) -> Self {
        let mut canonical: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '/' | '_' | ' ' | ':'))
            .collect::<String>()
            .to_uppercase();
        if !canonical.ends_with(QUOTE_ASSET) {
            canonical.push_str(QUOTE_ASSET);
        }
        Symbol(canonical)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `BTCUSDT` -> `BTC`
    pub fn base_asset(&self) -> &str {
        self.0.strip_suffix(QUOTE_ASSET).unwrap_or(&self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(raw: &str) -> Self {
        Symbol::normalize(raw)
    }
}

impl From<String> for Symbol {
    fn from(raw: String) -> Self {
        Symbol::normalize(&raw)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Order direction as sent to an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Position direction. Long and short on the same symbol are independent (hedge mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }

    pub fn sign(&self) -> Decimal {
        match self {
            PositionSide::Long => Decimal::ONE,
            PositionSide::Short => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn entry_side(&self) -> Side {
        match self {
            PositionSide::Long => Side::Buy,
            PositionSide::Short => Side::Sell,
        }
    }

    pub fn exit_side(&self) -> Side {
        match self {
            PositionSide::Long => Side::Sell,
            PositionSide::Short => Side::Buy,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown candle interval '{0}'")]
pub struct UnknownInterval(pub String);

/// Canonical candle interval vocabulary. Adapters translate it to their native spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    OneMinute,
    ThreeMinutes,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    TwoHours,
    FourHours,
    SixHours,
    EightHours,
    TwelveHours,
    OneDay,
    OneWeek,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::ThreeMinutes => "3m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
            Interval::TwoHours => "2h",
            Interval::FourHours => "4h",
            Interval::SixHours => "6h",
            Interval::EightHours => "8h",
            Interval::TwelveHours => "12h",
            Interval::OneDay => "1d",
            Interval::OneWeek => "1w",
        }
    }

    pub fn duration_ms(&self) -> i64 {
        const MINUTE: i64 = 60_000;
        match self {
            Interval::OneMinute => MINUTE,
            Interval::ThreeMinutes => 3 * MINUTE,
            Interval::FiveMinutes => 5 * MINUTE,
            Interval::FifteenMinutes => 15 * MINUTE,
            Interval::ThirtyMinutes => 30 * MINUTE,
            Interval::OneHour => 60 * MINUTE,
            Interval::TwoHours => 120 * MINUTE,
            Interval::FourHours => 240 * MINUTE,
            Interval::SixHours => 360 * MINUTE,
            Interval::EightHours => 480 * MINUTE,
            Interval::TwelveHours => 720 * MINUTE,
            Interval::OneDay => 1_440 * MINUTE,
            Interval::OneWeek => 10_080 * MINUTE,
        }
    }

    /// Close time for a candle opening at `open_time` when the source omits it.
    pub fn close_time(&self, open_time: i64) -> i64 {
        open_time + self.duration_ms() - 1
    }
}

impl FromStr for Interval {
    type Err = UnknownInterval;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let interval = match s.trim() {
            "1m" => Interval::OneMinute,
            "3m" => Interval::ThreeMinutes,
            "5m" => Interval::FiveMinutes,
            "15m" => Interval::FifteenMinutes,
            "30m" => Interval::ThirtyMinutes,
            "1h" => Interval::OneHour,
            "2h" => Interval::TwoHours,
            "4h" => Interval::FourHours,
            "6h" => Interval::SixHours,
            "8h" => Interval::EightHours,
            "12h" => Interval::TwelveHours,
            "1d" => Interval::OneDay,
            "1w" => Interval::OneWeek,
            other => return Err(UnknownInterval(other.to_string())),
        };
        Ok(interval)
    }
}

impl TryFrom<String> for Interval {
    type Error = UnknownInterval;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.as_str().to_string()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OHLCV bar. Timestamps are epoch milliseconds regardless of the source exchange.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trade_count: u64,
}

impl Candle {
    pub fn is_well_formed(&self) -> bool {
        let finite = [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite());
        finite
            && self.open_time < self.close_time
            && self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentStatus {
    Trading,
    Halted,
    Delisted,
}

/// A tradable market as listed by an exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: Symbol,
    /// Exchange spelling, e.g. `BTC` on Hyperliquid or `BINANCE:BTCUSDT` on Finnhub.
    pub native: String,
    pub status: InstrumentStatus,
    pub quantity_precision: Option<u32>,
    pub price_precision: Option<u32>,
    pub max_leverage: Option<u32>,
}

impl Instrument {
    pub fn is_tradable(&self) -> bool {
        self.status == InstrumentStatus::Trading
    }
}

/// Everything one decision cycle knows about one symbol. Built per cycle, never shared.
#[derive(Debug)]
pub struct MarketSnapshot {
    pub symbol: Symbol,
    pub interval: Interval,
    /// Primary window, oldest first.
    pub candles: Vec<Candle>,
    pub context_interval: Interval,
    /// Longer timeframe window, oldest first. May be empty.
    pub context_candles: Vec<Candle>,
    pub current_price: Decimal,
    pub funding_rate: Option<f64>,
    pub open_interest: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
    pub unrealized_pnl: Decimal,
}

impl Position {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.symbol.clone(), self.side)
    }

    pub fn notional_at_entry(&self) -> Decimal {
        self.quantity * self.entry_price
    }

    pub fn margin(&self) -> Decimal {
        if self.leverage == 0 {
            return self.notional_at_entry();
        }
        self.notional_at_entry() / Decimal::from(self.leverage)
    }

    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.quantity * self.side.sign()
    }

    /// Isolated-margin approximation without maintenance margin.
    pub fn liquidation_price(&self) -> Decimal {
        if self.leverage == 0 {
            return Decimal::ZERO;
        }
        let step = Decimal::ONE / Decimal::from(self.leverage);
        match self.side {
            PositionSide::Long => self.entry_price * (Decimal::ONE - step),
            PositionSide::Short => self.entry_price * (Decimal::ONE + step),
        }
    }
}

/// Positions are unique per (symbol, side).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PositionKey {
    pub symbol: Symbol,
    pub side: PositionSide,
}

impl PositionKey {
    pub fn new(symbol: Symbol, side: PositionSide) -> Self {
        Self { symbol, side }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.symbol, self.side)
    }
}

/// Result of an executed open or close, paper or live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub symbol: Symbol,
    pub side: PositionSide,
    pub reduce_only: bool,
    pub quantity: Decimal,
    pub price: Decimal,
    pub realized_pnl: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub initial_balance: Decimal,
    pub wallet_balance: Decimal,
    pub total_equity: Decimal,
    pub available_balance: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub margin_used: Decimal,
}
