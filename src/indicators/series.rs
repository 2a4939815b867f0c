// src/indicators/series.rs
//! Short per-bar series handed to the decision collaborator, plus the
//! longer-timeframe context summary.

use super::core::{atr, closes, ema_values, macd, rsi_values};
use crate::types::Candle;
use serde::Serialize;

/// Number of trailing points kept in every rendered series.
pub const SERIES_POINTS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntradaySeries {
    pub mid_prices: Vec<f64>,
    pub ema20: Vec<f64>,
    pub macd: Vec<f64>,
    pub rsi7: Vec<f64>,
    pub rsi14: Vec<f64>,
    pub volume: Vec<f64>,
    pub atr14: f64,
}

/// Trailing points of the primary window. Indicator values are only emitted
/// for bars where their lookback is satisfied, so early series may be shorter.
pub fn intraday_series(candles: &[Candle]) -> IntradaySeries {
    let start = candles.len().saturating_sub(SERIES_POINTS);
    let closes = closes(candles);
    let mut out = IntradaySeries {
        atr14: atr(candles, 14),
        ..IntradaySeries::default()
    };

    for i in start..candles.len() {
        let prefix = &candles[..=i];
        out.mid_prices.push(candles[i].close);
        out.volume.push(candles[i].volume);
        if i >= 19 {
            out.ema20.push(ema_values(&closes[..=i], 20));
        }
        if i >= 25 {
            out.macd.push(macd(prefix));
        }
        if i >= 7 {
            out.rsi7.push(rsi_values(&closes[..=i], 7));
        }
        if i >= 14 {
            out.rsi14.push(rsi_values(&closes[..=i], 14));
        }
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LongerTermContext {
    pub ema20: f64,
    pub ema50: f64,
    pub atr3: f64,
    pub atr14: f64,
    pub current_volume: f64,
    pub average_volume: f64,
    pub macd: Vec<f64>,
    pub rsi14: Vec<f64>,
}

pub fn longer_term_context(candles: &[Candle]) -> LongerTermContext {
    if candles.is_empty() {
        return LongerTermContext::default();
    }
    let closes = closes(candles);
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
    let start = candles.len().saturating_sub(SERIES_POINTS);

    let mut out = LongerTermContext {
        ema20: ema_values(&closes, 20),
        ema50: ema_values(&closes, 50),
        atr3: atr(candles, 3),
        atr14: atr(candles, 14),
        current_volume: volumes[volumes.len() - 1],
        average_volume: volumes.iter().sum::<f64>() / volumes.len() as f64,
        ..LongerTermContext::default()
    };
    for i in start..candles.len() {
        if i >= 25 {
            out.macd.push(macd(&candles[..=i]));
        }
        if i >= 14 {
            out.rsi14.push(rsi_values(&closes[..=i], 14));
        }
    }
    out
}

/// Percent change of the last close against the close `bars_back` bars earlier.
pub fn price_change_pct(candles: &[Candle], bars_back: usize) -> f64 {
    let n = candles.len();
    if bars_back == 0 || n <= bars_back {
        return 0.0;
    }
    let reference = candles[n - 1 - bars_back].close;
    if reference == 0.0 {
        return 0.0;
    }
    (candles[n - 1].close - reference) / reference * 100.0
}
