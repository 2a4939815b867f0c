// src/connectors/bybit.rs
use crate::connectors::messages::{value_as_f64, value_as_i64, BybitEnvelope, BybitInstrument, BybitList, BybitTicker};
use crate::connectors::traits::MarketDataAdapter;
use crate::connectors::{decode, parse_f64, read_response, unsupported_interval};
use crate::error::AdapterError;
use crate::types::{Candle, Exchange, Instrument, InstrumentStatus, Interval, Symbol, QUOTE_ASSET};
use crate::utils::precision::decimals_from_step;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::str::FromStr;

const REST_URL: &str = "https://api.bybit.com";
const CATEGORY: &str = "linear";
const MAX_KLINES: usize = 1000;

/// Bybit v5 linear perpetuals.
pub struct BybitMarketData {
    http_client: Client,
    base_rest_url: String,
}

impl BybitMarketData {
    pub fn new(http_client: Client) -> Self {
        Self {
            http_client,
            base_rest_url: REST_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_rest_url: impl Into<String>) -> Self {
        self.base_rest_url = base_rest_url.into();
        self
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, String)]) -> Result<T, AdapterError> {
        let url = format!("{}/v5/market{}", self.base_rest_url, endpoint);
        let raw = read_response(
            Exchange::Bybit,
            self.http_client.get(&url).query(query).send().await,
        )
        .await?;
        if !raw.status.is_success() {
            return Err(AdapterError::transport(
                Exchange::Bybit,
                format!("HTTP {}: {}", raw.status, raw.body),
            ));
        }
        unwrap_envelope(&raw.body)
    }

    async fn ticker(&self, symbol: &Symbol) -> Result<BybitTicker, AdapterError> {
        let list: BybitList<BybitTicker> = self
            .get(
                "/tickers",
                &[("category", CATEGORY.to_string()), ("symbol", symbol.to_string())],
            )
            .await?;
        list.list.into_iter().next().ok_or_else(|| {
            AdapterError::new(
                Exchange::Bybit,
                crate::error::AdapterErrorKind::UnknownSymbol(symbol.clone()),
            )
        })
    }
}

/// Bybit reports failures with HTTP 200 and a non-zero `retCode`.
pub(crate) fn unwrap_envelope<T: DeserializeOwned>(body: &str) -> Result<T, AdapterError> {
    let envelope: BybitEnvelope<T> = decode(Exchange::Bybit, body)?;
    if envelope.ret_code != 0 {
        return Err(AdapterError::rejected(Exchange::Bybit, envelope.ret_code, envelope.ret_msg));
    }
    envelope
        .result
        .ok_or_else(|| AdapterError::malformed(Exchange::Bybit, "response without result"))
}

pub(crate) fn interval_code(interval: Interval) -> Option<&'static str> {
    let code = match interval {
        Interval::OneMinute => "1",
        Interval::ThreeMinutes => "3",
        Interval::FiveMinutes => "5",
        Interval::FifteenMinutes => "15",
        Interval::ThirtyMinutes => "30",
        Interval::OneHour => "60",
        Interval::TwoHours => "120",
        Interval::FourHours => "240",
        Interval::SixHours => "360",
        Interval::TwelveHours => "720",
        Interval::OneDay => "D",
        Interval::OneWeek => "W",
        Interval::EightHours => return None,
    };
    Some(code)
}

/// Kline rows are `[start, open, high, low, close, volume, turnover]` as strings, newest first.
pub(crate) fn parse_klines(interval: Interval, rows: &[Vec<Value>]) -> Result<Vec<Candle>, AdapterError> {
    let mut candles = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let num = |idx: usize| {
                row.get(idx).and_then(value_as_f64).ok_or_else(|| {
                    AdapterError::malformed(Exchange::Bybit, format!("kline {i}: field {idx}"))
                })
            };
            let open_time = row
                .first()
                .and_then(value_as_i64)
                .ok_or_else(|| AdapterError::malformed(Exchange::Bybit, format!("kline {i}: start")))?;
            let candle = Candle {
                open_time,
                close_time: interval.close_time(open_time),
                open: num(1)?,
                high: num(2)?,
                low: num(3)?,
                close: num(4)?,
                volume: num(5)?,
                quote_volume: row.get(6).and_then(value_as_f64).unwrap_or(0.0),
                trade_count: 0,
            };
            if !candle.is_well_formed() {
                return Err(AdapterError::malformed(Exchange::Bybit, format!("kline {i} violates OHLC bounds")));
            }
            Ok(candle)
        })
        .collect::<Result<Vec<_>, _>>()?;
    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}

pub(crate) fn parse_instruments(rows: Vec<BybitInstrument>) -> Vec<Instrument> {
    rows.into_iter()
        .filter(|r| r.quote_coin == QUOTE_ASSET)
        .map(|r| Instrument {
            symbol: Symbol::normalize(&r.symbol),
            status: match r.status.as_str() {
                "Trading" => InstrumentStatus::Trading,
                "PreLaunch" | "Settling" | "Delivering" => InstrumentStatus::Halted,
                _ => InstrumentStatus::Delisted,
            },
            quantity_precision: r
                .lot_size_filter
                .as_ref()
                .and_then(|f| f.qty_step.as_deref())
                .and_then(decimals_from_step),
            price_precision: r
                .price_filter
                .as_ref()
                .and_then(|f| f.tick_size.as_deref())
                .and_then(decimals_from_step),
            max_leverage: r
                .leverage_filter
                .as_ref()
                .and_then(|f| f.max_leverage.as_deref())
                .and_then(|l| l.parse::<f64>().ok())
                .map(|l| l.floor() as u32),
            native: r.symbol,
        })
        .collect()
}

#[async_trait]
impl MarketDataAdapter for BybitMarketData {
    fn exchange(&self) -> Exchange {
        Exchange::Bybit
    }

    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, AdapterError> {
        let code = interval_code(interval).ok_or_else(|| unsupported_interval(Exchange::Bybit, interval))?;
        let limit = limit.clamp(1, MAX_KLINES);
        let list: BybitList<Vec<Value>> = self
            .get(
                "/kline",
                &[
                    ("category", CATEGORY.to_string()),
                    ("symbol", symbol.to_string()),
                    ("interval", code.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        let mut candles = parse_klines(interval, &list.list)?;
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        Ok(candles)
    }

    async fn fetch_price(&self, symbol: &Symbol) -> Result<Decimal, AdapterError> {
        let ticker = self.ticker(symbol).await?;
        Decimal::from_str(ticker.last_price.trim()).map_err(|_| {
            AdapterError::malformed(Exchange::Bybit, format!("lastPrice '{}'", ticker.last_price))
        })
    }

    async fn fetch_instruments(&self) -> Result<Vec<Instrument>, AdapterError> {
        let list: BybitList<BybitInstrument> = self
            .get(
                "/instruments-info",
                &[("category", CATEGORY.to_string()), ("limit", "1000".to_string())],
            )
            .await?;
        Ok(parse_instruments(list.list))
    }

    async fn fetch_funding_rate(&self, symbol: &Symbol) -> Result<Option<f64>, AdapterError> {
        let ticker = self.ticker(symbol).await?;
        if ticker.funding_rate.is_empty() {
            return Ok(None);
        }
        parse_f64(Exchange::Bybit, "fundingRate", &ticker.funding_rate).map(Some)
    }

    async fn fetch_open_interest(&self, symbol: &Symbol) -> Result<Option<f64>, AdapterError> {
        let ticker = self.ticker(symbol).await?;
        if ticker.open_interest.is_empty() {
            return Ok(None);
        }
        parse_f64(Exchange::Bybit, "openInterest", &ticker.open_interest).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterErrorKind;

    #[test]
    fn klines_are_reordered_oldest_first() {
        let body = r#"{"retCode":0,"retMsg":"OK","result":{"category":"linear","symbol":"BTCUSDT","list":[
            ["1670608800000","17071","17073","17027","17055.5","268611","15.74"],
            ["1670605200000","17000","17080","16990","17071","1000","17.0"]
        ]}}"#;
        let list: BybitList<Vec<Value>> = unwrap_envelope(body).unwrap();
        let candles = parse_klines(Interval::OneHour, &list.list).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time, 1_670_605_200_000);
        assert_eq!(candles[0].close_time, 1_670_608_799_999);
        assert_eq!(candles[1].close, 17055.5);
    }

    #[test]
    fn non_zero_ret_code_is_a_rejection() {
        let body = r#"{"retCode":10001,"retMsg":"params error: symbol invalid","result":{}}"#;
        let err = unwrap_envelope::<BybitList<Vec<Value>>>(body).unwrap_err();
        assert!(matches!(err.kind, AdapterErrorKind::Rejected { code: 10001, .. }));
    }

    #[test]
    fn instruments_carry_step_and_leverage() {
        let body = r#"{"retCode":0,"retMsg":"OK","result":{"list":[
            {"symbol":"BTCUSDT","status":"Trading","quoteCoin":"USDT",
             "lotSizeFilter":{"qtyStep":"0.001"},"priceFilter":{"tickSize":"0.10"},"leverageFilter":{"maxLeverage":"100.00"}},
            {"symbol":"BTCPERP","status":"Trading","quoteCoin":"USDC"},
            {"symbol":"XYZUSDT","status":"Closed","quoteCoin":"USDT"}
        ]}}"#;
        let list: BybitList<BybitInstrument> = unwrap_envelope(body).unwrap();
        let instruments = parse_instruments(list.list);
        assert_eq!(instruments.len(), 2);
        assert_eq!(instruments[0].quantity_precision, Some(3));
        assert_eq!(instruments[0].price_precision, Some(1));
        assert_eq!(instruments[0].max_leverage, Some(100));
        assert!(!instruments[1].is_tradable());
    }

    #[test]
    fn eight_hour_candles_are_unsupported() {
        assert!(interval_code(Interval::EightHours).is_none());
        assert_eq!(interval_code(Interval::FourHours), Some("240"));
    }
}
