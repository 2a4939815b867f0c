// src/indicators/mod.rs
pub mod core;
pub mod oscillators;
pub mod series;
pub mod trend;

use crate::types::{Interval, MarketSnapshot};
use serde::Serialize;

use self::oscillators::{QqeMod, RsiPatterns, Tsi, UltimateRsi};
use self::series::{IntradaySeries, LongerTermContext};
use self::trend::{Dpsd, Kemad, RangeFilter, SslExit, VolatilityBands, ZeroLagTrend};

/// Direction read of a composite indicator, rendered as -1 / 0 / 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(into = "i8")]
pub enum Trend {
    Down,
    #[default]
    Flat,
    Up,
}

impl Trend {
    pub fn from_sign(value: f64) -> Self {
        if value > 0.0 {
            Trend::Up
        } else if value < 0.0 {
            Trend::Down
        } else {
            Trend::Flat
        }
    }

    pub fn value(&self) -> i8 {
        match self {
            Trend::Down => -1,
            Trend::Flat => 0,
            Trend::Up => 1,
        }
    }
}

impl From<Trend> for i8 {
    fn from(trend: Trend) -> Self {
        trend.value()
    }
}

/// Everything computed from one symbol's snapshot for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorSet {
    pub ema20: f64,
    pub macd: f64,
    pub rsi7: f64,
    pub rsi14: f64,
    pub atr14: f64,
    pub price_change_1h: f64,
    /// Change against the previous bar of the longer timeframe.
    pub price_change_context: f64,
    pub tsi: Tsi,
    pub kemad: Kemad,
    pub volatility_bands: VolatilityBands,
    pub ssl_exit: SslExit,
    pub zero_lag: ZeroLagTrend,
    pub qqe: QqeMod,
    pub range_filter: RangeFilter,
    pub dpsd: Dpsd,
    pub ultimate_rsi: UltimateRsi,
    pub rsi_patterns: RsiPatterns,
    pub intraday: IntradaySeries,
    pub longer_term: LongerTermContext,
}

impl IndicatorSet {
    pub fn compute(snapshot: &MarketSnapshot) -> Self {
        let candles = &snapshot.candles;
        Self {
            ema20: self::core::ema(candles, 20),
            macd: self::core::macd(candles),
            rsi7: self::core::rsi(candles, 7),
            rsi14: self::core::rsi(candles, 14),
            atr14: self::core::atr(candles, 14),
            price_change_1h: series::price_change_pct(candles, bars_per_hour(snapshot.interval)),
            price_change_context: series::price_change_pct(&snapshot.context_candles, 1),
            tsi: oscillators::tsi(candles, 35, 35, 13),
            kemad: trend::kemad(candles),
            volatility_bands: trend::volatility_bands(candles, 20, 2.0),
            ssl_exit: trend::ssl_exit(candles, 20, 60),
            zero_lag: trend::zero_lag_trend(candles, 34),
            qqe: oscillators::qqe_mod(candles, 14),
            range_filter: trend::range_filter(candles),
            dpsd: trend::dpsd(candles, 20),
            ultimate_rsi: oscillators::ultimate_rsi(candles, 14),
            rsi_patterns: oscillators::rsi_patterns(candles, 14),
            intraday: series::intraday_series(candles),
            longer_term: series::longer_term_context(&snapshot.context_candles),
        }
    }
}

fn bars_per_hour(interval: Interval) -> usize {
    let per_hour = 3_600_000 / interval.duration_ms();
    per_hour.max(1) as usize
}
