// src/connectors/finnhub.rs
use crate::connectors::messages::{FinnhubCandles, FinnhubError, FinnhubQuote, FinnhubSymbol};
use crate::connectors::traits::MarketDataAdapter;
use crate::connectors::{decode, read_response};
use crate::error::{AdapterError, AdapterErrorKind};
use crate::types::{Candle, Exchange, Instrument, InstrumentStatus, Interval, Symbol, QUOTE_ASSET};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;

const REST_URL: &str = "https://finnhub.io/api/v1";
const VENUE: &str = "BINANCE";

/// Finnhub crypto quotes, sourced from its Binance feed. Needs an API token.
pub struct FinnhubMarketData {
    http_client: Client,
    base_url: String,
    api_key: String,
}

impl FinnhubMarketData {
    pub fn new(http_client: Client, api_key: String) -> Self {
        Self {
            http_client,
            base_url: REST_URL.to_string(),
            api_key,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, String)]) -> Result<T, AdapterError> {
        if self.api_key.trim().is_empty() {
            return Err(AdapterError::new(Exchange::Finnhub, AdapterErrorKind::MissingCredentials));
        }
        let url = format!("{}{}", self.base_url, endpoint);
        let raw = read_response(
            Exchange::Finnhub,
            self.http_client
                .get(&url)
                .query(query)
                .query(&[("token", self.api_key.as_str())])
                .send()
                .await,
        )
        .await?;

        if let Ok(err) = serde_json::from_str::<FinnhubError>(&raw.body) {
            if raw.status.as_u16() == 401 || raw.status.as_u16() == 403 {
                return Err(AdapterError::new(Exchange::Finnhub, AdapterErrorKind::MissingCredentials));
            }
            return Err(AdapterError::rejected(
                Exchange::Finnhub,
                raw.status.as_u16() as i64,
                err.error,
            ));
        }
        if !raw.status.is_success() {
            return Err(AdapterError::transport(
                Exchange::Finnhub,
                format!("HTTP {}: {}", raw.status, raw.body),
            ));
        }
        decode(Exchange::Finnhub, &raw.body)
    }
}

pub(crate) fn native_symbol(symbol: &Symbol) -> String {
    format!("{}:{}", VENUE, symbol)
}

/// Finnhub only serves a subset of resolutions. Other intervals map to the
/// largest served resolution that divides them, and candles are stamped with
/// the resolution actually served.
pub(crate) fn resolution(interval: Interval) -> (&'static str, Interval) {
    match interval {
        Interval::OneMinute | Interval::ThreeMinutes => ("1", Interval::OneMinute),
        Interval::FiveMinutes => ("5", Interval::FiveMinutes),
        Interval::FifteenMinutes => ("15", Interval::FifteenMinutes),
        Interval::ThirtyMinutes => ("30", Interval::ThirtyMinutes),
        Interval::OneHour
        | Interval::TwoHours
        | Interval::FourHours
        | Interval::SixHours
        | Interval::EightHours
        | Interval::TwelveHours => ("60", Interval::OneHour),
        Interval::OneDay => ("D", Interval::OneDay),
        Interval::OneWeek => ("W", Interval::OneWeek),
    }
}

/// Columnar `{s, o, h, l, c, v, t}` with `t` in seconds.
pub(crate) fn parse_candles(served: Interval, payload: FinnhubCandles) -> Result<Vec<Candle>, AdapterError> {
    match payload.s.as_str() {
        "no_data" => return Ok(Vec::new()),
        "ok" => {}
        other => {
            return Err(AdapterError::malformed(Exchange::Finnhub, format!("candle status '{other}'")));
        }
    }
    let n = payload.t.len();
    let columns = [&payload.o, &payload.h, &payload.l, &payload.c, &payload.v];
    if columns.iter().any(|col| col.len() != n) {
        return Err(AdapterError::malformed(Exchange::Finnhub, "candle columns differ in length"));
    }

    let mut candles = Vec::with_capacity(n);
    for i in 0..n {
        let open_time = payload.t[i] * 1000;
        let candle = Candle {
            open_time,
            close_time: served.close_time(open_time),
            open: payload.o[i],
            high: payload.h[i],
            low: payload.l[i],
            close: payload.c[i],
            volume: payload.v[i],
            quote_volume: payload.v[i] * payload.c[i],
            trade_count: 0,
        };
        if !candle.is_well_formed() {
            return Err(AdapterError::malformed(Exchange::Finnhub, format!("candle {i} violates OHLC bounds")));
        }
        candles.push(candle);
    }
    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}

pub(crate) fn parse_symbols(rows: Vec<FinnhubSymbol>) -> Vec<Instrument> {
    rows.into_iter()
        .filter_map(|row| {
            let pair = row.symbol.strip_prefix(&format!("{VENUE}:"))?.to_string();
            if !pair.ends_with(QUOTE_ASSET) {
                return None;
            }
            Some(Instrument {
                symbol: Symbol::normalize(&pair),
                native: row.symbol,
                status: InstrumentStatus::Trading,
                quantity_precision: None,
                price_precision: None,
                max_leverage: None,
            })
        })
        .collect()
}

#[async_trait]
impl MarketDataAdapter for FinnhubMarketData {
    fn exchange(&self) -> Exchange {
        Exchange::Finnhub
    }

    fn served_interval(&self, interval: Interval) -> Interval {
        resolution(interval).1
    }

    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, AdapterError> {
        let (code, served) = resolution(interval);
        let to = Utc::now().timestamp();
        let from = to - served.duration_ms() / 1000 * limit.max(1) as i64;
        let payload: FinnhubCandles = self
            .get(
                "/crypto/candle",
                &[
                    ("symbol", native_symbol(symbol)),
                    ("resolution", code.to_string()),
                    ("from", from.to_string()),
                    ("to", to.to_string()),
                ],
            )
            .await?;
        let mut candles = parse_candles(served, payload)?;
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        Ok(candles)
    }

    async fn fetch_price(&self, symbol: &Symbol) -> Result<Decimal, AdapterError> {
        let quote: FinnhubQuote = self
            .get("/quote", &[("symbol", native_symbol(symbol))])
            .await?;
        if quote.c <= 0.0 {
            return Err(AdapterError::malformed(
                Exchange::Finnhub,
                format!("no current price for {symbol}"),
            ));
        }
        Decimal::from_f64(quote.c)
            .ok_or_else(|| AdapterError::malformed(Exchange::Finnhub, format!("price {}", quote.c)))
    }

    async fn fetch_instruments(&self) -> Result<Vec<Instrument>, AdapterError> {
        let rows: Vec<FinnhubSymbol> = self
            .get("/crypto/symbol", &[("exchange", VENUE.to_lowercase())])
            .await?;
        Ok(parse_symbols(rows))
    }
}
