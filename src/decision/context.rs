// src/decision/context.rs
use crate::core::history::PerformanceSummary;
use crate::indicators::IndicatorSet;
use crate::types::{AccountSnapshot, Interval, Position, Symbol};
use crate::utils::precision::format_price;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Clone, Serialize)]
pub struct SymbolContext {
    pub symbol: Symbol,
    /// Bar size of the intraday series, as served by the exchange.
    pub interval: Interval,
    pub context_interval: Interval,
    pub current_price: Decimal,
    pub funding_rate: Option<f64>,
    pub open_interest: Option<f64>,
    pub indicators: IndicatorSet,
}

/// Input to one collaborator call. Built fresh every cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionContext {
    pub agent_id: String,
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub account: AccountSnapshot,
    pub positions: Vec<Position>,
    pub performance: PerformanceSummary,
    pub markets: Vec<SymbolContext>,
}

impl DecisionContext {
    /// Plain-text rendering handed to chat models.
    pub fn render_prompt(&self) -> String {
        let mut out = String::new();
        // writes into a String cannot fail
        let _ = self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) -> std::fmt::Result {
        writeln!(
            out,
            "Time: {} | Cycle #{} | Agent: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.cycle,
            self.agent_id
        )?;
        writeln!(out)?;

        let a = &self.account;
        writeln!(
            out,
            "Account: equity {:.2} | available {:.2} | margin used {:.2} | unrealized {:+.2} | realized {:+.2} | initial {:.2}",
            a.total_equity, a.available_balance, a.margin_used, a.unrealized_pnl, a.realized_pnl, a.initial_balance
        )?;

        let p = &self.performance;
        let profit_factor = p
            .profit_factor
            .map(|pf| format!("{pf:.2}"))
            .unwrap_or_else(|| "n/a".to_string());
        writeln!(
            out,
            "Performance: {} trades | win rate {:.1}% | total PnL {:+.2} | profit factor {}",
            p.trades, p.win_rate, p.total_pnl, profit_factor
        )?;
        writeln!(out)?;

        if self.positions.is_empty() {
            writeln!(out, "Open positions: none")?;
        } else {
            writeln!(out, "Open positions:")?;
            for pos in &self.positions {
                writeln!(
                    out,
                    "- {} {} qty {} entry {} x{} | unrealized {:+.2} | liquidation ~{}",
                    pos.symbol,
                    pos.side,
                    pos.quantity,
                    price(pos.entry_price),
                    pos.leverage,
                    pos.unrealized_pnl,
                    price(pos.liquidation_price())
                )?;
            }
        }

        for market in &self.markets {
            writeln!(out)?;
            render_market(out, market)?;
        }
        Ok(())
    }
}

fn price(value: Decimal) -> String {
    format_price(value.to_f64().unwrap_or_default())
}

fn series(values: &[f64]) -> String {
    let parts: Vec<String> = values.iter().map(|v| format_price(*v)).collect();
    format!("[{}]", parts.join(", "))
}

fn render_market(out: &mut String, m: &SymbolContext) -> std::fmt::Result {
    let ind = &m.indicators;
    writeln!(
        out,
        "=== {} === price {} | 1h {:+.2}% | {} bar {:+.2}%",
        m.symbol,
        price(m.current_price),
        ind.price_change_1h,
        m.context_interval,
        ind.price_change_context
    )?;
    if let Some(funding) = m.funding_rate {
        write!(out, "Funding rate: {funding:.6}")?;
        match m.open_interest {
            Some(oi) => writeln!(out, " | Open interest: {oi:.2}")?,
            None => writeln!(out)?,
        }
    }
    writeln!(
        out,
        "EMA20 {} | MACD {:.4} | RSI7 {:.2} | RSI14 {:.2} | ATR14 {}",
        format_price(ind.ema20),
        ind.macd,
        ind.rsi7,
        ind.rsi14,
        format_price(ind.atr14)
    )?;
    writeln!(
        out,
        "Trend: KEMAD {} | bands {} (score {:.2}) | SSL {} | ZLEMA {} | QQE {} | range filter {} | DPSD {}",
        ind.kemad.trend.value(),
        ind.volatility_bands.trend.value(),
        ind.volatility_bands.score,
        ind.ssl_exit.signal.value(),
        ind.zero_lag.trend.value(),
        ind.qqe.trend.value(),
        ind.range_filter.combined.value(),
        ind.dpsd.trend.value()
    )?;
    writeln!(
        out,
        "Momentum: TSI {:.2}/{:.2} | ultimate RSI {:.2} (ob {}, os {}) | engulfing bull {} bear {}",
        ind.tsi.value,
        ind.tsi.signal,
        ind.ultimate_rsi.value,
        ind.ultimate_rsi.overbought,
        ind.ultimate_rsi.oversold,
        ind.rsi_patterns.bullish_engulfing,
        ind.rsi_patterns.bearish_engulfing
    )?;

    let intraday = &ind.intraday;
    writeln!(out, "Intraday series ({} bars, oldest to newest):", m.interval)?;
    writeln!(out, "  mid prices: {}", series(&intraday.mid_prices))?;
    writeln!(out, "  EMA20: {}", series(&intraday.ema20))?;
    writeln!(out, "  MACD: {}", series(&intraday.macd))?;
    writeln!(out, "  RSI7: {}", series(&intraday.rsi7))?;
    writeln!(out, "  RSI14: {}", series(&intraday.rsi14))?;
    writeln!(out, "  volume: {}", series(&intraday.volume))?;

    let lt = &ind.longer_term;
    writeln!(
        out,
        "Longer term ({}): EMA20 {} vs EMA50 {} | ATR3 {} vs ATR14 {} | volume {:.2} vs avg {:.2}",
        m.context_interval,
        format_price(lt.ema20),
        format_price(lt.ema50),
        format_price(lt.atr3),
        format_price(lt.atr14),
        lt.current_volume,
        lt.average_volume
    )?;
    writeln!(out, "  MACD: {}", series(&lt.macd))?;
    writeln!(out, "  RSI14: {}", series(&lt.rsi14))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PositionSide;
    use rust_decimal_macros::dec;

    fn context() -> DecisionContext {
        DecisionContext {
            agent_id: "alpha".into(),
            cycle: 7,
            timestamp: Utc::now(),
            account: AccountSnapshot {
                initial_balance: dec!(10000),
                wallet_balance: dec!(10000),
                total_equity: dec!(10200),
                available_balance: dec!(9700),
                unrealized_pnl: dec!(200),
                realized_pnl: dec!(0),
                margin_used: dec!(500),
            },
            positions: vec![Position {
                symbol: Symbol::normalize("BTC"),
                side: PositionSide::Long,
                quantity: dec!(0.1),
                entry_price: dec!(50000),
                leverage: 10,
                unrealized_pnl: dec!(200),
            }],
            performance: PerformanceSummary::default(),
            markets: vec![SymbolContext {
                symbol: Symbol::normalize("PEPE"),
                interval: Interval::ThreeMinutes,
                context_interval: Interval::OneHour,
                current_price: dec!(0.00001234),
                funding_rate: Some(0.0001),
                open_interest: None,
                indicators: IndicatorSet::default(),
            }],
        }
    }

    #[test]
    fn prompt_mentions_account_positions_and_markets() {
        let prompt = context().render_prompt();
        assert!(prompt.contains("Cycle #7"));
        assert!(prompt.contains("BTCUSDT LONG qty 0.1 entry 50000.00 x10"));
        assert!(prompt.contains("=== PEPEUSDT === price 0.00001234"));
        assert!(prompt.contains("Funding rate: 0.000100"));
        assert!(prompt.contains("profit factor n/a"));
        assert!(prompt.contains("Intraday series (3m bars"));
        assert!(prompt.contains("Longer term (1h)"));
    }
}
