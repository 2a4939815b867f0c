// src/connectors/hyperliquid.rs
use crate::connectors::messages::{
    HyperliquidCandle, HyperliquidMeta, HyperliquidMetaAndContexts, HyperliquidMids,
};
use crate::connectors::traits::MarketDataAdapter;
use crate::connectors::{decode, parse_f64, read_response, unsupported_interval};
use crate::error::{AdapterError, AdapterErrorKind};
use crate::types::{Candle, Exchange, Instrument, InstrumentStatus, Interval, Symbol};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;

const MAINNET_API: &str = "https://api.hyperliquid.xyz";

/// Hyperliquid perpetuals via the public `/info` endpoint.
///
/// Coins are quoted without a suffix (`BTC`); the canonical `BTCUSDT` is mapped
/// back through the names learned from `meta`, falling back to the base asset.
pub struct HyperliquidMarketData {
    http_client: Client,
    base_url: String,
    native_names: RwLock<HashMap<Symbol, String>>,
}

impl HyperliquidMarketData {
    pub fn new(http_client: Client) -> Self {
        Self {
            http_client,
            base_url: MAINNET_API.to_string(),
            native_names: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn coin(&self, symbol: &Symbol) -> String {
        let names = match self.native_names.read() {
            Ok(guard) => guard.get(symbol).cloned(),
            Err(poisoned) => poisoned.into_inner().get(symbol).cloned(),
        };
        names.unwrap_or_else(|| symbol.base_asset().to_string())
    }

    fn remember(&self, instruments: &[Instrument]) {
        let mut names = match self.native_names.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for instrument in instruments {
            names.insert(instrument.symbol.clone(), instrument.native.clone());
        }
    }

    async fn info<T: DeserializeOwned>(&self, request: Value) -> Result<T, AdapterError> {
        let url = format!("{}/info", self.base_url);
        let raw = read_response(
            Exchange::Hyperliquid,
            self.http_client.post(&url).json(&request).send().await,
        )
        .await?;
        if !raw.status.is_success() {
            return Err(AdapterError::transport(
                Exchange::Hyperliquid,
                format!("HTTP {}: {}", raw.status, raw.body),
            ));
        }
        decode(Exchange::Hyperliquid, &raw.body)
    }

    async fn asset_context(&self, symbol: &Symbol) -> Result<Option<(f64, f64)>, AdapterError> {
        let (meta, contexts): HyperliquidMetaAndContexts =
            self.info(json!({ "type": "metaAndAssetCtxs" })).await?;
        let coin = self.coin(symbol);
        let Some(idx) = meta.universe.iter().position(|a| a.name == coin) else {
            return Ok(None);
        };
        let Some(ctx) = contexts.get(idx) else {
            return Ok(None);
        };
        let funding = match ctx.funding.as_deref() {
            Some(raw) => parse_f64(Exchange::Hyperliquid, "funding", raw)?,
            None => return Ok(None),
        };
        let open_interest = match ctx.open_interest.as_deref() {
            Some(raw) => parse_f64(Exchange::Hyperliquid, "openInterest", raw)?,
            None => return Ok(None),
        };
        Ok(Some((funding, open_interest)))
    }
}

pub(crate) fn interval_code(interval: Interval) -> Option<&'static str> {
    match interval {
        Interval::SixHours => None,
        other => Some(other.as_str()),
    }
}

pub(crate) fn parse_candles(interval: Interval, rows: Vec<HyperliquidCandle>) -> Result<Vec<Candle>, AdapterError> {
    let num = |field: &str, raw: &str| parse_f64(Exchange::Hyperliquid, field, raw);
    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let open = num("o", &row.open)?;
        let close = num("c", &row.close)?;
        let volume = num("v", &row.volume)?;
        let candle = Candle {
            open_time: row.open_time,
            close_time: row
                .close_time
                .filter(|t| *t > row.open_time)
                .unwrap_or_else(|| interval.close_time(row.open_time)),
            open,
            high: num("h", &row.high)?,
            low: num("l", &row.low)?,
            close,
            volume,
            quote_volume: volume * close,
            trade_count: row.trades,
        };
        if !candle.is_well_formed() {
            return Err(AdapterError::malformed(
                Exchange::Hyperliquid,
                format!("candle at {} violates OHLC bounds", row.open_time),
            ));
        }
        candles.push(candle);
    }
    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}

pub(crate) fn parse_meta(meta: HyperliquidMeta) -> Vec<Instrument> {
    meta.universe
        .into_iter()
        .map(|asset| Instrument {
            symbol: Symbol::normalize(&asset.name),
            status: if asset.is_delisted {
                InstrumentStatus::Delisted
            } else {
                InstrumentStatus::Trading
            },
            quantity_precision: Some(asset.sz_decimals),
            price_precision: None,
            max_leverage: asset.max_leverage,
            native: asset.name,
        })
        .collect()
}

#[async_trait]
impl MarketDataAdapter for HyperliquidMarketData {
    fn exchange(&self) -> Exchange {
        Exchange::Hyperliquid
    }

    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, AdapterError> {
        let code = interval_code(interval).ok_or_else(|| unsupported_interval(Exchange::Hyperliquid, interval))?;
        let end = Utc::now().timestamp_millis();
        let start = end - interval.duration_ms() * limit.max(1) as i64;
        let rows: Vec<HyperliquidCandle> = self
            .info(json!({
                "type": "candleSnapshot",
                "req": {
                    "coin": self.coin(symbol),
                    "interval": code,
                    "startTime": start,
                    "endTime": end,
                }
            }))
            .await?;
        let mut candles = parse_candles(interval, rows)?;
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        Ok(candles)
    }

    async fn fetch_price(&self, symbol: &Symbol) -> Result<Decimal, AdapterError> {
        let mids: HyperliquidMids = self.info(json!({ "type": "allMids" })).await?;
        let coin = self.coin(symbol);
        let raw = mids.get(&coin).ok_or_else(|| {
            AdapterError::new(Exchange::Hyperliquid, AdapterErrorKind::UnknownSymbol(symbol.clone()))
        })?;
        Decimal::from_str(raw.trim())
            .map_err(|_| AdapterError::malformed(Exchange::Hyperliquid, format!("mid '{raw}' for {coin}")))
    }

    async fn fetch_instruments(&self) -> Result<Vec<Instrument>, AdapterError> {
        let meta: HyperliquidMeta = self.info(json!({ "type": "meta" })).await?;
        let instruments = parse_meta(meta);
        self.remember(&instruments);
        Ok(instruments)
    }

    async fn fetch_funding_rate(&self, symbol: &Symbol) -> Result<Option<f64>, AdapterError> {
        Ok(self.asset_context(symbol).await?.map(|(funding, _)| funding))
    }

    async fn fetch_open_interest(&self, symbol: &Symbol) -> Result<Option<f64>, AdapterError> {
        Ok(self.asset_context(symbol).await?.map(|(_, oi)| oi))
    }
}
