// src/connectors/gateway.rs
use crate::connectors::traits::MarketDataAdapter;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::types::{Candle, Exchange, Instrument, Interval, MarketSnapshot, Symbol};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Funding settles every few hours.
const FUNDING_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Shared front for one exchange adapter: per-call timeout, bounded retry of
/// transient failures, instrument validation and a funding-rate cache.
/// Agents on the same exchange share one gateway.
pub struct MarketGateway {
    adapter: Arc<dyn MarketDataAdapter>,
    policy: RetryPolicy,
    instruments: RwLock<HashMap<Symbol, Instrument>>,
    funding: RwLock<HashMap<Symbol, (Option<f64>, Instant)>>,
}

impl MarketGateway {
    pub fn new(adapter: Arc<dyn MarketDataAdapter>, policy: RetryPolicy) -> Self {
        Self {
            adapter,
            policy,
            instruments: RwLock::new(HashMap::new()),
            funding: RwLock::new(HashMap::new()),
        }
    }

    pub fn exchange(&self) -> Exchange {
        self.adapter.exchange()
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, call: F) -> Result<T, AdapterError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.policy.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(AdapterError::new(
                    self.exchange(),
                    AdapterErrorKind::Timeout(self.policy.timeout),
                )),
            };
            match result {
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(exchange = %self.exchange(), op, attempt, error = %e, "retrying market data call");
                    tokio::time::sleep(self.policy.backoff * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Reloads the instrument list. Returns the number of tradable symbols.
    pub async fn refresh_instruments(&self) -> Result<usize, AdapterError> {
        let listed = self
            .with_retry("instruments", || self.adapter.fetch_instruments())
            .await?;
        let tradable = listed.iter().filter(|i| i.is_tradable()).count();
        let mut cache = self.instruments.write().await;
        cache.clear();
        cache.extend(listed.into_iter().map(|i| (i.symbol.clone(), i)));
        info!(exchange = %self.exchange(), listed = cache.len(), tradable, "📋 instrument list refreshed");
        Ok(tradable)
    }

    pub async fn instrument(&self, symbol: &Symbol) -> Option<Instrument> {
        self.instruments.read().await.get(symbol).cloned()
    }

    /// Fails for symbols the exchange does not list or has halted.
    /// An unknown symbol triggers one refresh before it is rejected.
    pub async fn ensure_tradable(&self, symbol: &Symbol) -> Result<Instrument, AdapterError> {
        let mut cached = self.instrument(symbol).await;
        if cached.is_none() {
            self.refresh_instruments().await?;
            cached = self.instrument(symbol).await;
        }
        match cached {
            Some(instrument) if instrument.is_tradable() => Ok(instrument),
            Some(_) => Err(AdapterError::new(
                self.exchange(),
                AdapterErrorKind::NotTrading(symbol.clone()),
            )),
            None => Err(AdapterError::new(
                self.exchange(),
                AdapterErrorKind::UnknownSymbol(symbol.clone()),
            )),
        }
    }

    pub async fn candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, AdapterError> {
        self.with_retry("candles", || self.adapter.fetch_candles(symbol, interval, limit))
            .await
    }

    pub async fn price(&self, symbol: &Symbol) -> Result<Decimal, AdapterError> {
        let price = self
            .with_retry("price", || self.adapter.fetch_price(symbol))
            .await?;
        if price <= Decimal::ZERO {
            return Err(AdapterError::malformed(
                self.exchange(),
                format!("non-positive price {price} for {symbol}"),
            ));
        }
        Ok(price)
    }

    /// Cached for an hour. Failures are logged and read as "not available".
    pub async fn funding_rate(&self, symbol: &Symbol) -> Option<f64> {
        if let Some((rate, at)) = self.funding.read().await.get(symbol) {
            if at.elapsed() < FUNDING_TTL {
                return *rate;
            }
        }
        match self
            .with_retry("funding", || self.adapter.fetch_funding_rate(symbol))
            .await
        {
            Ok(rate) => {
                self.funding
                    .write()
                    .await
                    .insert(symbol.clone(), (rate, Instant::now()));
                rate
            }
            Err(e) => {
                debug!(exchange = %self.exchange(), %symbol, error = %e, "funding rate unavailable");
                None
            }
        }
    }

    pub async fn open_interest(&self, symbol: &Symbol) -> Option<f64> {
        match self
            .with_retry("open_interest", || self.adapter.fetch_open_interest(symbol))
            .await
        {
            Ok(oi) => oi,
            Err(e) => {
                debug!(exchange = %self.exchange(), %symbol, error = %e, "open interest unavailable");
                None
            }
        }
    }

    /// Everything one cycle needs for `symbol`, fetched concurrently.
    /// Either window may come back empty for a freshly listed symbol; the
    /// snapshot is still returned so the symbol stays in the cycle's view.
    /// Intervals are the ones the adapter actually serves.
    pub async fn snapshot(
        &self,
        symbol: &Symbol,
        interval: Interval,
        context_interval: Interval,
        limit: usize,
    ) -> Result<MarketSnapshot, AdapterError> {
        self.ensure_tradable(symbol).await?;

        let (candles, context, price, funding_rate, open_interest) = tokio::join!(
            self.candles(symbol, interval, limit),
            self.candles(symbol, context_interval, limit),
            self.price(symbol),
            self.funding_rate(symbol),
            self.open_interest(symbol),
        );
        let candles = candles?;
        if candles.is_empty() {
            debug!(exchange = %self.exchange(), %symbol, %interval, "no candle history yet");
        }
        let context_candles = context.unwrap_or_else(|e| {
            warn!(exchange = %self.exchange(), %symbol, error = %e, "context candles unavailable");
            Vec::new()
        });

        Ok(MarketSnapshot {
            symbol: symbol.clone(),
            interval: self.adapter.served_interval(interval),
            candles,
            context_interval: self.adapter.served_interval(context_interval),
            context_candles,
            current_price: price?,
            funding_rate,
            open_interest,
        })
    }

    /// Quantity and price decimals of every listed instrument that reports them.
    pub async fn precision_tables(&self) -> (HashMap<Symbol, u32>, HashMap<Symbol, u32>) {
        let cache = self.instruments.read().await;
        let quantity = cache
            .values()
            .filter_map(|i| i.quantity_precision.map(|p| (i.symbol.clone(), p)))
            .collect();
        let price = cache
            .values()
            .filter_map(|i| i.price_precision.map(|p| (i.symbol.clone(), p)))
            .collect();
        (quantity, price)
    }
}
