// src/connectors/binance.rs
use crate::connectors::messages::{
    value_as_f64, value_as_i64, BinanceAccountInfo, BinanceApiError, BinanceExchangeInfo,
    BinanceOpenInterest, BinanceOpenOrder, BinanceOrderResponse, BinancePositionRisk, BinancePremiumIndex,
    BinancePrice,
};
use crate::connectors::traits::{ExecutionHandler, MarketDataAdapter};
use crate::connectors::{decode, parse_f64, read_response, RawResponse};
use crate::error::{AdapterError, ExecutionError};
use crate::ledger::LedgerSnapshot;
use crate::types::{
    AccountSnapshot, Candle, Exchange, Fill, Instrument, InstrumentStatus, Interval, Position,
    PositionSide, Symbol, QUOTE_ASSET,
};
use crate::utils::precision::{decimals_from_step, normalize_price, normalize_quantity, step_for_decimals};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

const FUTURES_REST_URL: &str = "https://fapi.binance.com";
const US_SPOT_REST_URL: &str = "https://api.binance.us";
const MAX_KLINES: usize = 1000;
const DEFAULT_QUANTITY_DECIMALS: u32 = 3;
const RECV_WINDOW_MS: &str = "5000";

/// Which Binance deployment the adapter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinanceMarket {
    /// USDT-margined perpetuals (`/fapi`), with funding and open interest.
    UsdtFutures,
    /// Binance.US spot (`/api/v3`), prices and candles only.
    UsSpot,
}

impl BinanceMarket {
    fn exchange(&self) -> Exchange {
        match self {
            BinanceMarket::UsdtFutures => Exchange::Binance,
            BinanceMarket::UsSpot => Exchange::BinanceUs,
        }
    }

    fn base_url(&self) -> &'static str {
        match self {
            BinanceMarket::UsdtFutures => FUTURES_REST_URL,
            BinanceMarket::UsSpot => US_SPOT_REST_URL,
        }
    }

    fn api_prefix(&self) -> &'static str {
        match self {
            BinanceMarket::UsdtFutures => "/fapi/v1",
            BinanceMarket::UsSpot => "/api/v3",
        }
    }
}

pub struct BinanceMarketData {
    market: BinanceMarket,
    http_client: Client,
    base_rest_url: String,
}

impl BinanceMarketData {
    pub fn new(market: BinanceMarket, http_client: Client) -> Self {
        Self {
            market,
            http_client,
            base_rest_url: market.base_url().to_string(),
        }
    }

    pub fn with_base_url(mut self, base_rest_url: impl Into<String>) -> Self {
        self.base_rest_url = base_rest_url.into();
        self
    }

    async fn get(&self, endpoint: &str, query: &[(&str, String)]) -> Result<String, AdapterError> {
        let url = format!("{}{}{}", self.base_rest_url, self.market.api_prefix(), endpoint);
        let raw = read_response(
            self.market.exchange(),
            self.http_client.get(&url).query(query).send().await,
        )
        .await?;
        check_status(self.market.exchange(), raw)
    }
}

#[async_trait]
impl MarketDataAdapter for BinanceMarketData {
    fn exchange(&self) -> Exchange {
        self.market.exchange()
    }

    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, AdapterError> {
        let limit = limit.clamp(1, MAX_KLINES);
        let body = self
            .get(
                "/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        let mut candles = parse_klines(self.exchange(), interval, &body)?;
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        Ok(candles)
    }

    async fn fetch_price(&self, symbol: &Symbol) -> Result<Decimal, AdapterError> {
        let body = self
            .get("/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        let ticker: BinancePrice = decode(self.exchange(), &body)?;
        parse_decimal(self.exchange(), "price", &ticker.price)
    }

    async fn fetch_instruments(&self) -> Result<Vec<Instrument>, AdapterError> {
        let body = self.get("/exchangeInfo", &[]).await?;
        parse_exchange_info(self.exchange(), &body)
    }

    async fn fetch_funding_rate(&self, symbol: &Symbol) -> Result<Option<f64>, AdapterError> {
        if self.market != BinanceMarket::UsdtFutures {
            return Ok(None);
        }
        let body = self
            .get("/premiumIndex", &[("symbol", symbol.to_string())])
            .await?;
        let index: BinancePremiumIndex = decode(self.exchange(), &body)?;
        parse_f64(self.exchange(), "lastFundingRate", &index.last_funding_rate).map(Some)
    }

    async fn fetch_open_interest(&self, symbol: &Symbol) -> Result<Option<f64>, AdapterError> {
        if self.market != BinanceMarket::UsdtFutures {
            return Ok(None);
        }
        let body = self
            .get("/openInterest", &[("symbol", symbol.to_string())])
            .await?;
        let oi: BinanceOpenInterest = decode(self.exchange(), &body)?;
        parse_f64(self.exchange(), "openInterest", &oi.open_interest).map(Some)
    }
}

fn check_status(exchange: Exchange, raw: RawResponse) -> Result<String, AdapterError> {
    if raw.status.is_success() {
        return Ok(raw.body);
    }
    match serde_json::from_str::<BinanceApiError>(&raw.body) {
        Ok(err) => Err(AdapterError::rejected(exchange, err.code, err.msg)),
        Err(_) => Err(AdapterError::transport(
            exchange,
            format!("HTTP {}: {}", raw.status, raw.body),
        )),
    }
}

fn parse_decimal(exchange: Exchange, field: &str, raw: &str) -> Result<Decimal, AdapterError> {
    Decimal::from_str(raw.trim())
        .map_err(|_| AdapterError::malformed(exchange, format!("{field}: '{raw}' is not a decimal")))
}

/// Kline rows: `[openTime, "o", "h", "l", "c", "v", closeTime, "quoteVolume", trades, ...]`.
pub(crate) fn parse_klines(
    exchange: Exchange,
    interval: Interval,
    body: &str,
) -> Result<Vec<Candle>, AdapterError> {
    let rows: Vec<Vec<Value>> = decode(exchange, body)?;
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let num = |idx: usize| {
                row.get(idx)
                    .and_then(value_as_f64)
                    .ok_or_else(|| AdapterError::malformed(exchange, format!("kline {i}: field {idx}")))
            };
            let open_time = row
                .first()
                .and_then(value_as_i64)
                .ok_or_else(|| AdapterError::malformed(exchange, format!("kline {i}: open time")))?;
            let candle = Candle {
                open_time,
                close_time: row
                    .get(6)
                    .and_then(value_as_i64)
                    .unwrap_or_else(|| interval.close_time(open_time)),
                open: num(1)?,
                high: num(2)?,
                low: num(3)?,
                close: num(4)?,
                volume: num(5)?,
                quote_volume: row.get(7).and_then(value_as_f64).unwrap_or(0.0),
                trade_count: row.get(8).and_then(value_as_i64).unwrap_or(0).max(0) as u64,
            };
            if !candle.is_well_formed() {
                return Err(AdapterError::malformed(exchange, format!("kline {i} violates OHLC bounds")));
            }
            Ok(candle)
        })
        .collect()
}

pub(crate) fn parse_exchange_info(exchange: Exchange, body: &str) -> Result<Vec<Instrument>, AdapterError> {
    let info: BinanceExchangeInfo = decode(exchange, body)?;
    Ok(info
        .symbols
        .into_iter()
        .filter(|s| s.quote_asset == QUOTE_ASSET)
        .map(|s| {
            let step = s
                .filters
                .iter()
                .find(|f| f.filter_type == "LOT_SIZE")
                .and_then(|f| f.step_size.as_deref())
                .and_then(decimals_from_step);
            let tick = s
                .filters
                .iter()
                .find(|f| f.filter_type == "PRICE_FILTER")
                .and_then(|f| f.tick_size.as_deref())
                .and_then(decimals_from_step);
            Instrument {
                symbol: Symbol::normalize(&s.symbol),
                status: match s.status.as_str() {
                    "TRADING" => InstrumentStatus::Trading,
                    "PENDING_TRADING" | "BREAK" | "HALT" | "AUCTION_MATCH" | "PRE_TRADING"
                    | "POST_TRADING" => InstrumentStatus::Halted,
                    _ => InstrumentStatus::Delisted,
                },
                native: s.symbol,
                quantity_precision: s.quantity_precision.or(step),
                price_precision: s.price_precision.or(tick),
                max_leverage: None,
            }
        })
        .collect())
}

/// Signed order execution on Binance USDT-M futures in hedge mode.
pub struct BinanceFuturesExecutor {
    api_key: String,
    secret_key: String,
    http_client: Client,
    base_rest_url: String,
    quantity_precision: HashMap<Symbol, u32>,
    price_precision: HashMap<Symbol, u32>,
}

impl BinanceFuturesExecutor {
    pub fn new(api_key: String, secret_key: String, http_client: Client) -> Self {
        Self {
            api_key,
            secret_key,
            http_client,
            base_rest_url: FUTURES_REST_URL.to_string(),
            quantity_precision: HashMap::new(),
            price_precision: HashMap::new(),
        }
    }

    pub fn with_precision(
        mut self,
        quantity_precision: HashMap<Symbol, u32>,
        price_precision: HashMap<Symbol, u32>,
    ) -> Self {
        self.quantity_precision = quantity_precision;
        self.price_precision = price_precision;
        self
    }

    fn sign_and_build_query(&self, params: Vec<(&str, String)>) -> Result<String, ExecutionError> {
        let mut params = params;
        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        let query_string = serde_urlencoded::to_string(&params)
            .map_err(|e| ExecutionError::Rejected(format!("unencodable order parameters: {e}")))?;
        Ok(format!("{}&signature={}", query_string, sign(&self.secret_key, &query_string)?))
    }

    async fn send_signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: Vec<(&str, String)>,
    ) -> Result<T, ExecutionError> {
        let full_query = self.sign_and_build_query(params)?;
        let url = format!("{}{}?{}", self.base_rest_url, endpoint, full_query);

        let response = self
            .http_client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| ExecutionError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExecutionError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<BinanceApiError>(&body) {
                Ok(err) => ExecutionError::Rejected(format!("{} ({})", err.msg, err.code)),
                Err(_) => ExecutionError::Transport(format!("HTTP {status}: {body}")),
            });
        }
        serde_json::from_str(&body)
            .map_err(|e| ExecutionError::Transport(format!("undecodable response: {e}")))
    }

    async fn position_risk(&self, symbol: Option<&Symbol>) -> Result<Vec<Position>, ExecutionError> {
        let params = symbol
            .map(|s| vec![("symbol", s.to_string())])
            .unwrap_or_default();
        let rows: Vec<BinancePositionRisk> = self
            .send_signed_request(Method::GET, "/fapi/v2/positionRisk", params)
            .await?;
        Ok(rows.iter().filter_map(position_from_risk).collect())
    }

    fn price_for(&self, symbol: &Symbol, price: Decimal) -> Decimal {
        match self.price_precision.get(symbol) {
            Some(&dp) => normalize_price(price, step_for_decimals(dp)),
            None => price,
        }
    }

    async fn place_market_order(
        &self,
        symbol: &Symbol,
        side: PositionSide,
        quantity: Decimal,
        closing: bool,
    ) -> Result<BinanceOrderResponse, ExecutionError> {
        let order_side = if closing { side.exit_side() } else { side.entry_side() };
        info!(
            "🚀 Sending order: {} {} {} ({})",
            order_side.as_str(),
            quantity,
            symbol,
            side
        );
        self.send_signed_request(
            Method::POST,
            "/fapi/v1/order",
            vec![
                ("symbol", symbol.to_string()),
                ("side", order_side.as_str().to_string()),
                ("positionSide", side.as_str().to_string()),
                ("type", "MARKET".to_string()),
                ("quantity", quantity.to_string()),
            ],
        )
        .await
    }

    /// Cancels resting `order_type` orders on one side so a new trigger
    /// replaces the old one instead of stacking next to it.
    async fn cancel_conditionals(
        &self,
        symbol: &Symbol,
        side: PositionSide,
        order_type: &str,
    ) -> Result<(), ExecutionError> {
        let open: Vec<BinanceOpenOrder> = self
            .send_signed_request(Method::GET, "/fapi/v1/openOrders", vec![("symbol", symbol.to_string())])
            .await?;
        for order_id in stale_conditionals(&open, side, order_type) {
            let _: Value = self
                .send_signed_request(
                    Method::DELETE,
                    "/fapi/v1/order",
                    vec![("symbol", symbol.to_string()), ("orderId", order_id.to_string())],
                )
                .await?;
            debug!(order_id, "cancelled previous {} for {} {}", order_type, side, symbol);
        }
        Ok(())
    }

    async fn place_conditional(
        &self,
        symbol: &Symbol,
        side: PositionSide,
        order_type: &str,
        trigger: Decimal,
    ) -> Result<(), ExecutionError> {
        self.cancel_conditionals(symbol, side, order_type).await?;
        let trigger = self.price_for(symbol, trigger);
        let resp: BinanceOrderResponse = self
            .send_signed_request(
                Method::POST,
                "/fapi/v1/order",
                vec![
                    ("symbol", symbol.to_string()),
                    ("side", side.exit_side().as_str().to_string()),
                    ("positionSide", side.as_str().to_string()),
                    ("type", order_type.to_string()),
                    ("stopPrice", trigger.to_string()),
                    ("closePosition", "true".to_string()),
                    ("workingType", "CONTRACT_PRICE".to_string()),
                ],
            )
            .await?;
        debug!(order_id = resp.order_id, status = %resp.status, "{} placed for {} at {}", order_type, symbol, trigger);
        Ok(())
    }
}

fn stale_conditionals(open: &[BinanceOpenOrder], side: PositionSide, order_type: &str) -> Vec<u64> {
    open.iter()
        .filter(|o| o.order_type == order_type && o.position_side == side.as_str())
        .map(|o| o.order_id)
        .collect()
}

fn sign(secret_key: &str, payload: &str) -> Result<String, ExecutionError> {
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| ExecutionError::Rejected("invalid secret key length".to_string()))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn position_from_risk(row: &BinancePositionRisk) -> Option<Position> {
    let amount = Decimal::from_str(&row.position_amt).ok()?;
    if amount.is_zero() {
        return None;
    }
    let side = match row.position_side.as_str() {
        "LONG" => PositionSide::Long,
        "SHORT" => PositionSide::Short,
        _ if amount.is_sign_negative() => PositionSide::Short,
        _ => PositionSide::Long,
    };
    Some(Position {
        symbol: Symbol::normalize(&row.symbol),
        side,
        quantity: amount.abs(),
        entry_price: Decimal::from_str(&row.entry_price).ok()?,
        leverage: row.leverage.parse().unwrap_or(1),
        unrealized_pnl: Decimal::from_str(&row.unrealized_profit).unwrap_or_default(),
    })
}

fn decimal_field(raw: &str, field: &str) -> Result<Decimal, ExecutionError> {
    Decimal::from_str(raw).map_err(|_| ExecutionError::Transport(format!("{field}: '{raw}' is not a decimal")))
}

#[async_trait]
impl ExecutionHandler for BinanceFuturesExecutor {
    fn is_paper(&self) -> bool {
        false
    }

    async fn sync_account(
        &mut self,
        _marks: &HashMap<Symbol, Decimal>,
    ) -> Result<AccountSnapshot, ExecutionError> {
        let info: BinanceAccountInfo = self
            .send_signed_request(Method::GET, "/fapi/v2/account", vec![])
            .await?;
        let wallet = decimal_field(&info.total_wallet_balance, "totalWalletBalance")?;
        let unrealized = decimal_field(&info.total_unrealized_profit, "totalUnrealizedProfit")?;
        Ok(AccountSnapshot {
            initial_balance: wallet,
            wallet_balance: wallet,
            total_equity: wallet + unrealized,
            available_balance: decimal_field(&info.available_balance, "availableBalance")?,
            unrealized_pnl: unrealized,
            realized_pnl: Decimal::ZERO,
            margin_used: decimal_field(&info.total_initial_margin, "totalInitialMargin")?,
        })
    }

    async fn positions(&self) -> Result<Vec<Position>, ExecutionError> {
        self.position_risk(None).await
    }

    async fn open_position(
        &mut self,
        symbol: &Symbol,
        side: PositionSide,
        quantity: Decimal,
        price: Decimal,
        leverage: u32,
    ) -> Result<Fill, ExecutionError> {
        let resp = self.place_market_order(symbol, side, quantity, false).await?;
        let avg_price = resp
            .avg_price
            .as_deref()
            .and_then(|p| Decimal::from_str(p).ok())
            .filter(|p| !p.is_zero())
            .unwrap_or(price);
        info!(order_id = resp.order_id, "✅ Opened {} {} x{} @ {}", side, symbol, leverage, avg_price);
        Ok(Fill {
            order_id: resp.order_id.to_string(),
            symbol: symbol.clone(),
            side,
            reduce_only: false,
            quantity: resp
                .executed_qty
                .as_deref()
                .and_then(|q| Decimal::from_str(q).ok())
                .filter(|q| !q.is_zero())
                .unwrap_or(quantity),
            price: avg_price,
            realized_pnl: None,
        })
    }

    async fn close_position(
        &mut self,
        symbol: &Symbol,
        side: PositionSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Fill, ExecutionError> {
        let held = self
            .position_risk(Some(symbol))
            .await?
            .into_iter()
            .find(|p| p.side == side)
            .ok_or_else(|| ExecutionError::NoPosition {
                symbol: symbol.clone(),
                side,
            })?;
        let quantity = if quantity <= Decimal::ZERO || quantity > held.quantity {
            held.quantity
        } else {
            quantity
        };

        let resp = self.place_market_order(symbol, side, quantity, true).await?;
        let exit_price = resp
            .avg_price
            .as_deref()
            .and_then(|p| Decimal::from_str(p).ok())
            .filter(|p| !p.is_zero())
            .unwrap_or(price);
        Ok(Fill {
            order_id: resp.order_id.to_string(),
            symbol: symbol.clone(),
            side,
            reduce_only: true,
            quantity,
            price: exit_price,
            realized_pnl: Some((exit_price - held.entry_price) * quantity * side.sign()),
        })
    }

    async fn set_leverage(&mut self, symbol: &Symbol, leverage: u32) -> Result<(), ExecutionError> {
        let _: Value = self
            .send_signed_request(
                Method::POST,
                "/fapi/v1/leverage",
                vec![("symbol", symbol.to_string()), ("leverage", leverage.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn set_stop_loss(
        &mut self,
        symbol: &Symbol,
        side: PositionSide,
        _quantity: Decimal,
        stop_price: Decimal,
    ) -> Result<(), ExecutionError> {
        self.place_conditional(symbol, side, "STOP_MARKET", stop_price).await
    }

    async fn set_take_profit(
        &mut self,
        symbol: &Symbol,
        side: PositionSide,
        _quantity: Decimal,
        target_price: Decimal,
    ) -> Result<(), ExecutionError> {
        self.place_conditional(symbol, side, "TAKE_PROFIT_MARKET", target_price)
            .await
    }

    async fn cancel_orders(&mut self, symbol: &Symbol) -> Result<(), ExecutionError> {
        let result: Result<Value, _> = self
            .send_signed_request(
                Method::DELETE,
                "/fapi/v1/allOpenOrders",
                vec![("symbol", symbol.to_string())],
            )
            .await;
        if let Err(e) = result {
            warn!("⚠️ Failed to cancel open orders for {}: {}", symbol, e);
            return Err(e);
        }
        Ok(())
    }

    fn format_quantity(&self, symbol: &Symbol, quantity: Decimal) -> Decimal {
        let decimals = self
            .quantity_precision
            .get(symbol)
            .copied()
            .unwrap_or(DEFAULT_QUANTITY_DECIMALS);
        normalize_quantity(quantity, step_for_decimals(decimals))
    }

    async fn persist(&mut self) -> Result<(), ExecutionError> {
        Ok(())
    }

    fn ledger_snapshot(&self) -> Option<LedgerSnapshot> {
        None
    }
}
