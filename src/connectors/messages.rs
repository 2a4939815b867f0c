// src/connectors/messages.rs
//! Wire payloads of the supported venues. Field names follow each exchange's
//! JSON; conversion into canonical types happens in the adapters.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// `{"code": -1121, "msg": "Invalid symbol."}`
#[derive(Debug, Deserialize)]
pub struct BinanceApiError {
    pub code: i64,
    pub msg: String,
}

#[derive(Debug, Deserialize)]
pub struct BinancePrice {
    pub price: String,
}

#[derive(Debug, Deserialize)]
pub struct BinancePremiumIndex {
    #[serde(rename = "lastFundingRate")]
    pub last_funding_rate: String,
}

#[derive(Debug, Deserialize)]
pub struct BinanceOpenInterest {
    #[serde(rename = "openInterest")]
    pub open_interest: String,
}

#[derive(Debug, Deserialize)]
pub struct BinanceExchangeInfo {
    pub symbols: Vec<BinanceSymbolInfo>,
}

#[derive(Debug, Deserialize)]
pub struct BinanceSymbolInfo {
    pub symbol: String,
    pub status: String,
    #[serde(rename = "quoteAsset")]
    pub quote_asset: String,
    #[serde(rename = "quantityPrecision")]
    pub quantity_precision: Option<u32>,
    #[serde(rename = "pricePrecision")]
    pub price_precision: Option<u32>,
    #[serde(default)]
    pub filters: Vec<BinanceFilter>,
}

#[derive(Debug, Deserialize)]
pub struct BinanceFilter {
    #[serde(rename = "filterType")]
    pub filter_type: String,
    #[serde(rename = "stepSize")]
    pub step_size: Option<String>,
    #[serde(rename = "tickSize")]
    pub tick_size: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BinanceOrderResponse {
    #[serde(rename = "orderId")]
    pub order_id: u64,
    pub symbol: String,
    pub status: String,
    #[serde(rename = "avgPrice", default)]
    pub avg_price: Option<String>,
    #[serde(rename = "executedQty", default)]
    pub executed_qty: Option<String>,
}

/// Row of `GET /fapi/v1/openOrders`.
#[derive(Debug, Deserialize)]
pub struct BinanceOpenOrder {
    #[serde(rename = "orderId")]
    pub order_id: u64,
    #[serde(rename = "type")]
    pub order_type: String,
    #[serde(rename = "positionSide", default)]
    pub position_side: String,
}

#[derive(Debug, Deserialize)]
pub struct BinanceAccountInfo {
    #[serde(rename = "totalWalletBalance")]
    pub total_wallet_balance: String,
    #[serde(rename = "totalUnrealizedProfit")]
    pub total_unrealized_profit: String,
    #[serde(rename = "availableBalance")]
    pub available_balance: String,
    #[serde(rename = "totalInitialMargin")]
    pub total_initial_margin: String,
}

#[derive(Debug, Deserialize)]
pub struct BinancePositionRisk {
    pub symbol: String,
    #[serde(rename = "positionAmt")]
    pub position_amt: String,
    #[serde(rename = "entryPrice")]
    pub entry_price: String,
    #[serde(rename = "unRealizedProfit")]
    pub unrealized_profit: String,
    pub leverage: String,
    #[serde(rename = "positionSide")]
    pub position_side: String,
}

/// Every Bybit v5 response wraps its payload the same way.
#[derive(Debug, Deserialize)]
pub struct BybitEnvelope<T> {
    #[serde(rename = "retCode")]
    pub ret_code: i64,
    #[serde(rename = "retMsg")]
    pub ret_msg: String,
    pub result: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct BybitList<T> {
    #[serde(default = "Vec::new")]
    pub list: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct BybitTicker {
    pub symbol: String,
    #[serde(rename = "lastPrice")]
    pub last_price: String,
    #[serde(rename = "fundingRate", default)]
    pub funding_rate: String,
    #[serde(rename = "openInterest", default)]
    pub open_interest: String,
}

#[derive(Debug, Deserialize)]
pub struct BybitInstrument {
    pub symbol: String,
    pub status: String,
    #[serde(rename = "quoteCoin")]
    pub quote_coin: String,
    #[serde(rename = "lotSizeFilter")]
    pub lot_size_filter: Option<BybitLotSize>,
    #[serde(rename = "priceFilter")]
    pub price_filter: Option<BybitPriceFilter>,
    #[serde(rename = "leverageFilter")]
    pub leverage_filter: Option<BybitLeverage>,
}

#[derive(Debug, Deserialize)]
pub struct BybitLotSize {
    #[serde(rename = "qtyStep")]
    pub qty_step: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BybitPriceFilter {
    #[serde(rename = "tickSize")]
    pub tick_size: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BybitLeverage {
    #[serde(rename = "maxLeverage")]
    pub max_leverage: Option<String>,
}

/// Hyperliquid `candleSnapshot` entry.
#[derive(Debug, Deserialize)]
pub struct HyperliquidCandle {
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "T")]
    pub close_time: Option<i64>,
    #[serde(rename = "o")]
    pub open: String,
    #[serde(rename = "h")]
    pub high: String,
    #[serde(rename = "l")]
    pub low: String,
    #[serde(rename = "c")]
    pub close: String,
    #[serde(rename = "v")]
    pub volume: String,
    #[serde(rename = "n", default)]
    pub trades: u64,
}

#[derive(Debug, Deserialize)]
pub struct HyperliquidMeta {
    pub universe: Vec<HyperliquidAsset>,
}

#[derive(Debug, Deserialize)]
pub struct HyperliquidAsset {
    pub name: String,
    #[serde(rename = "szDecimals")]
    pub sz_decimals: u32,
    #[serde(rename = "maxLeverage")]
    pub max_leverage: Option<u32>,
    #[serde(rename = "isDelisted", default)]
    pub is_delisted: bool,
}

#[derive(Debug, Deserialize)]
pub struct HyperliquidAssetContext {
    pub funding: Option<String>,
    #[serde(rename = "openInterest")]
    pub open_interest: Option<String>,
    #[serde(rename = "markPx")]
    pub mark_price: Option<String>,
}

/// `metaAndAssetCtxs` answers with a two-element array: meta, then contexts in universe order.
pub type HyperliquidMetaAndContexts = (HyperliquidMeta, Vec<HyperliquidAssetContext>);

pub type HyperliquidMids = HashMap<String, String>;

/// Finnhub columnar candle payload. `s` is `ok` or `no_data`; `t` is in seconds.
#[derive(Debug, Deserialize)]
pub struct FinnhubCandles {
    pub s: String,
    #[serde(default)]
    pub o: Vec<f64>,
    #[serde(default)]
    pub h: Vec<f64>,
    #[serde(default)]
    pub l: Vec<f64>,
    #[serde(default)]
    pub c: Vec<f64>,
    #[serde(default)]
    pub v: Vec<f64>,
    #[serde(default)]
    pub t: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct FinnhubQuote {
    pub c: f64,
}

#[derive(Debug, Deserialize)]
pub struct FinnhubSymbol {
    pub symbol: String,
    #[serde(rename = "displaySymbol")]
    pub display_symbol: String,
}

#[derive(Debug, Deserialize)]
pub struct FinnhubError {
    pub error: String,
}

/// Numbers arrive as strings on some venues and as JSON numbers on others.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
