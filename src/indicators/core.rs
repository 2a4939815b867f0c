// src/indicators/core.rs
//! Base indicators over candle and value slices. All functions are pure and
//! return `0.0` (or an empty series) when the input is shorter than the lookback.

use crate::types::Candle;

pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// EMA seeded with the SMA of the first `period` values, one output per input
/// from index `period - 1` onwards.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let mult = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut ema = seed;
    for v in &values[period..] {
        ema = (v - ema) * mult + ema;
        out.push(ema);
    }
    out
}

pub fn ema_values(values: &[f64], period: usize) -> f64 {
    ema_series(values, period).last().copied().unwrap_or(0.0)
}

pub fn ema(candles: &[Candle], period: usize) -> f64 {
    ema_values(&closes(candles), period)
}

/// Mean of the trailing `period` values.
pub fn sma(values: &[f64], period: usize) -> f64 {
    if period == 0 || values.len() < period {
        return 0.0;
    }
    values[values.len() - period..].iter().sum::<f64>() / period as f64
}

/// Population standard deviation of the trailing `period` values.
pub fn stdev(values: &[f64], period: usize) -> f64 {
    if period <= 1 || values.len() < period {
        return 0.0;
    }
    let window = &values[values.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
    variance.sqrt()
}

/// EMA(12) - EMA(26) of closes.
pub fn macd(candles: &[Candle]) -> f64 {
    if candles.len() < 26 {
        return 0.0;
    }
    let closes = closes(candles);
    ema_values(&closes, 12) - ema_values(&closes, 26)
}

/// Wilder RSI for every index from `period` onwards.
pub fn rsi_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() <= period {
        return Vec::new();
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 1..=period {
        let change = values[i] - values[i - 1];
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }
    let p = period as f64;
    let mut avg_gain = gains / p;
    let mut avg_loss = losses / p;

    let mut out = Vec::with_capacity(values.len() - period);
    out.push(rsi_from_averages(avg_gain, avg_loss));
    for i in period + 1..values.len() {
        let change = values[i] - values[i - 1];
        let (gain, loss) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
        out.push(rsi_from_averages(avg_gain, avg_loss));
    }
    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        // flat window has no direction
        return if avg_gain == 0.0 { 50.0 } else { 100.0 };
    }
    let rs = avg_gain / avg_loss;
    (100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0)
}

pub fn rsi_values(values: &[f64], period: usize) -> f64 {
    rsi_series(values, period).last().copied().unwrap_or(0.0)
}

pub fn rsi(candles: &[Candle], period: usize) -> f64 {
    rsi_values(&closes(candles), period)
}

/// Wilder ATR. Needs `period + 1` candles since the first true range uses the previous close.
pub fn atr(candles: &[Candle], period: usize) -> f64 {
    if period == 0 || candles.len() <= period {
        return 0.0;
    }
    let trs: Vec<f64> = candles
        .windows(2)
        .map(|w| {
            let (prev, cur) = (&w[0], &w[1]);
            (cur.high - cur.low)
                .max((cur.high - prev.close).abs())
                .max((cur.low - prev.close).abs())
        })
        .collect();

    let p = period as f64;
    let mut atr = trs[..period].iter().sum::<f64>() / p;
    for tr in &trs[period..] {
        atr = (atr * (p - 1.0) + tr) / p;
    }
    atr
}
