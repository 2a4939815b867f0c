// src/indicators/oscillators.rs
//! Momentum oscillators and candle pattern signals.

use super::core::{closes, ema_series, rsi_series};
use super::Trend;
use crate::types::Candle;
use serde::Serialize;

const QQE_FACTOR: f64 = 4.236;
const QQE_SMOOTHING: usize = 5;
const OVERBOUGHT: f64 = 70.0;
const OVERSOLD: f64 = 30.0;

/// True Strength Index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Tsi {
    pub value: f64,
    pub signal: f64,
}

pub fn tsi(candles: &[Candle], long: usize, short: usize, signal: usize) -> Tsi {
    if long == 0 || short == 0 || candles.len() < long + short {
        return Tsi::default();
    }
    let closes = closes(candles);
    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let abs_changes: Vec<f64> = changes.iter().map(|c| c.abs()).collect();

    let smoothed = ema_series(&ema_series(&changes, long), short);
    let smoothed_abs = ema_series(&ema_series(&abs_changes, long), short);
    if smoothed.is_empty() {
        return Tsi::default();
    }

    let series: Vec<f64> = smoothed
        .iter()
        .zip(&smoothed_abs)
        .map(|(pc, apc)| if *apc == 0.0 { 0.0 } else { 100.0 * pc / apc })
        .collect();
    let value = series.last().copied().unwrap_or(0.0);
    let signal = ema_series(&series, signal).last().copied().unwrap_or(0.0);

    Tsi { value, signal }
}

/// QQE: smoothed RSI with a volatility-scaled trailing band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QqeMod {
    pub fast_line: f64,
    pub upper: f64,
    pub lower: f64,
    /// Side of the smoothed RSI relative to 50.
    pub trend: Trend,
}

pub fn qqe_mod(candles: &[Candle], rsi_period: usize) -> QqeMod {
    let rsi = rsi_series(&closes(candles), rsi_period);
    let smoothed = ema_series(&rsi, QQE_SMOOTHING);
    let Some(&fast_line) = smoothed.last() else {
        return QqeMod::default();
    };

    let moves: Vec<f64> = smoothed.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let atr_rsi = ema_series(&moves, QQE_SMOOTHING)
        .last()
        .copied()
        .unwrap_or(0.0);

    QqeMod {
        fast_line,
        upper: fast_line + QQE_FACTOR * atr_rsi,
        lower: fast_line - QQE_FACTOR * atr_rsi,
        trend: Trend::from_sign(fast_line - 50.0),
    }
}

/// RSI smoothed over its recent values, with a slower signal line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UltimateRsi {
    pub value: f64,
    pub signal: f64,
    pub overbought: bool,
    pub oversold: bool,
}

pub fn ultimate_rsi(candles: &[Candle], period: usize) -> UltimateRsi {
    let rsi = rsi_series(&closes(candles), period);
    if rsi.is_empty() {
        return UltimateRsi::default();
    }
    let recent = &rsi[rsi.len().saturating_sub(period)..];
    let smoothed = ema_series(recent, QQE_SMOOTHING.min(recent.len()));
    let Some(&value) = smoothed.last() else {
        return UltimateRsi::default();
    };
    let signal = ema_series(&smoothed, 3.min(smoothed.len()))
        .last()
        .copied()
        .unwrap_or(value);

    UltimateRsi {
        value,
        signal,
        overbought: value >= OVERBOUGHT,
        oversold: value <= OVERSOLD,
    }
}

/// RSI extremes combined with two-candle engulfing patterns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RsiPatterns {
    pub rsi: f64,
    pub bullish_engulfing: bool,
    pub bearish_engulfing: bool,
    pub buy_signal: bool,
    pub sell_signal: bool,
}

pub fn rsi_patterns(candles: &[Candle], period: usize) -> RsiPatterns {
    let n = candles.len();
    if n < 2 {
        return RsiPatterns::default();
    }
    let (prev, last) = (&candles[n - 2], &candles[n - 1]);

    let bullish_engulfing = prev.close < prev.open
        && last.close > last.open
        && last.close > prev.open
        && last.open < prev.close;
    let bearish_engulfing = prev.close > prev.open
        && last.close < last.open
        && last.close < prev.open
        && last.open > prev.close;

    // RSI extremes only count once the lookback is satisfied
    let rsi = rsi_series(&closes(candles), period).last().copied();
    let oversold = rsi.is_some_and(|v| v <= OVERSOLD);
    let overbought = rsi.is_some_and(|v| v >= OVERBOUGHT);

    RsiPatterns {
        rsi: rsi.unwrap_or(0.0),
        bullish_engulfing,
        bearish_engulfing,
        buy_signal: oversold || bullish_engulfing,
        sell_signal: overbought || bearish_engulfing,
    }
}
