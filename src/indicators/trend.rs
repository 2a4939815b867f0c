// src/indicators/trend.rs
//! Trend-following composites built on the base indicators.

use super::core::{atr, closes, ema_series, ema_values, sma, stdev};
use super::Trend;
use crate::types::Candle;
use serde::Serialize;

const KALMAN_PROCESS_NOISE: f64 = 0.01;
const KALMAN_MEASUREMENT_NOISE: f64 = 1.0;

/// One-dimensional Kalman smoothing of a value series, one estimate per input.
pub fn kalman_series(values: &[f64]) -> Vec<f64> {
    let Some(&first) = values.first() else {
        return Vec::new();
    };
    let mut x = first;
    let mut p = 1.0;
    let mut out = Vec::with_capacity(values.len());
    for &z in values {
        p += KALMAN_PROCESS_NOISE;
        let k = p / (p + KALMAN_MEASUREMENT_NOISE);
        x += k * (z - x);
        p *= 1.0 - k;
        out.push(x);
    }
    out
}

/// Kalman-smoothed EMA deviation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Kemad {
    pub estimate: f64,
    pub trend: Trend,
    pub atr: f64,
}

pub fn kemad(candles: &[Candle]) -> Kemad {
    let closes = closes(candles);
    let Some(&estimate) = kalman_series(&closes).last() else {
        return Kemad::default();
    };
    let last = closes[closes.len() - 1];
    Kemad {
        estimate,
        trend: Trend::from_sign(last - estimate),
        atr: atr(candles, 14),
    }
}

/// Volatility-adjusted Gaussian bands around an EMA.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct VolatilityBands {
    pub basis: f64,
    pub upper: f64,
    pub lower: f64,
    /// Distance from the basis in standard deviations.
    pub score: f64,
    pub trend: Trend,
}

pub fn volatility_bands(candles: &[Candle], length: usize, mult: f64) -> VolatilityBands {
    if length < 2 || candles.len() < length {
        return VolatilityBands::default();
    }
    let closes = closes(candles);
    let basis = ema_values(&closes, length);
    let sd = stdev(&closes, length);
    let upper = basis + mult * sd;
    let lower = basis - mult * sd;
    let last = closes[closes.len() - 1];

    let score = if sd > 0.0 { (last - basis) / sd } else { 0.0 };
    let trend = if last > upper {
        Trend::Up
    } else if last < lower {
        Trend::Down
    } else {
        Trend::Flat
    };

    VolatilityBands {
        basis,
        upper,
        lower,
        score,
        trend,
    }
}

/// SSL channel breakout exit signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SslExit {
    pub upper: f64,
    pub lower: f64,
    pub baseline: f64,
    /// `Up` when the close crossed above the high channel this bar, `Down` for the low channel.
    pub signal: Trend,
}

pub fn ssl_exit(candles: &[Candle], channel_len: usize, baseline_len: usize) -> SslExit {
    let n = candles.len();
    if channel_len == 0 || n < channel_len.max(2) {
        return SslExit::default();
    }
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let closes = closes(candles);

    let upper = sma(&highs, channel_len);
    let lower = sma(&lows, channel_len);
    let (prev_upper, prev_lower) = if n > channel_len {
        (sma(&highs[..n - 1], channel_len), sma(&lows[..n - 1], channel_len))
    } else {
        (upper, lower)
    };

    let last = closes[n - 1];
    let prev_close = closes[n - 2];
    let signal = if prev_close <= prev_upper && last > upper {
        Trend::Up
    } else if prev_close >= prev_lower && last < lower {
        Trend::Down
    } else {
        Trend::Flat
    };

    SslExit {
        upper,
        lower,
        baseline: ema_values(&closes, baseline_len),
        signal,
    }
}

/// Zero-lag EMA trend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ZeroLagTrend {
    pub zlema: f64,
    pub atr: f64,
    pub trend: Trend,
}

pub fn zero_lag_trend(candles: &[Candle], period: usize) -> ZeroLagTrend {
    if period == 0 || candles.len() < period {
        return ZeroLagTrend::default();
    }
    let closes = closes(candles);
    let lag = (period - 1) / 2;
    // de-lagged input: price + (price - price `lag` bars ago)
    let adjusted: Vec<f64> = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| if i >= lag { 2.0 * c - closes[i - lag] } else { c })
        .collect();
    // EMA over the whole de-lagged series; a window of only `period` bars
    // overshoots price on a steady trend
    let zlema = ema_values(&adjusted, period);
    let last = closes[closes.len() - 1];

    ZeroLagTrend {
        zlema,
        atr: atr(candles, 14),
        trend: Trend::from_sign(last - zlema),
    }
}

/// Range filter: price must leave a volatility band around the Kalman
/// estimate before a direction is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RangeFilter {
    pub filter: f64,
    pub threshold: f64,
    pub trend: Trend,
    /// Direction of the Kalman estimate itself.
    pub kalman_trend: Trend,
    /// `trend` when both agree, flat otherwise.
    pub combined: Trend,
}

pub fn range_filter(candles: &[Candle]) -> RangeFilter {
    if candles.len() < 2 {
        return RangeFilter::default();
    }
    let closes = closes(candles);
    let estimates = kalman_series(&closes);
    let n = estimates.len();
    let filter = estimates[n - 1];
    let threshold = 0.5 * atr(candles, 14);
    let deviation = closes[n - 1] - filter;

    let trend = if deviation > threshold {
        Trend::Up
    } else if deviation < -threshold {
        Trend::Down
    } else {
        Trend::Flat
    };
    let kalman_trend = Trend::from_sign(estimates[n - 1] - estimates[n - 2]);
    let combined = if trend == kalman_trend { trend } else { Trend::Flat };

    RangeFilter {
        filter,
        threshold,
        trend,
        kalman_trend,
        combined,
    }
}

/// DEMA-based percentile-style deviation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Dpsd {
    pub dema: f64,
    /// Deviation from the DEMA in standard deviations.
    pub deviation: f64,
    pub per_up: f64,
    pub per_down: f64,
    pub trend: Trend,
}

pub fn dpsd(candles: &[Candle], length: usize) -> Dpsd {
    if length < 2 || candles.len() < length {
        return Dpsd::default();
    }
    let closes = closes(candles);
    let first = ema_series(&closes, length);
    let ema1 = first.last().copied().unwrap_or(0.0);
    let dema = match ema_series(&first, length).last() {
        Some(ema2) => 2.0 * ema1 - ema2,
        None => ema1,
    };
    let sd = stdev(&closes, length);
    let last = closes[closes.len() - 1];
    let deviation = if sd > 0.0 { (last - dema) / sd } else { 0.0 };

    Dpsd {
        dema,
        deviation,
        per_up: deviation.max(0.0),
        per_down: (-deviation).max(0.0),
        trend: Trend::from_sign(deviation),
    }
}
