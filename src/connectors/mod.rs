// src/connectors/mod.rs
pub mod binance;
pub mod bybit;
pub mod finnhub;
pub mod gateway;
pub mod hyperliquid;
pub mod messages;
pub mod traits;

use crate::error::AdapterError;
use crate::types::{Exchange, Interval};
use reqwest::Response;

/// Status and body of a finished HTTP exchange. Adapters decode venue error
/// envelopes themselves since each exchange reports failures differently.
pub(crate) struct RawResponse {
    pub status: reqwest::StatusCode,
    pub body: String,
}

pub(crate) async fn read_response(
    exchange: Exchange,
    response: Result<Response, reqwest::Error>,
) -> Result<RawResponse, AdapterError> {
    let response = response.map_err(|e| AdapterError::from_reqwest(exchange, e))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| AdapterError::from_reqwest(exchange, e))?;
    Ok(RawResponse { status, body })
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    exchange: Exchange,
    body: &str,
) -> Result<T, AdapterError> {
    serde_json::from_str(body).map_err(|e| AdapterError::malformed(exchange, e.to_string()))
}

pub(crate) fn unsupported_interval(exchange: Exchange, interval: Interval) -> AdapterError {
    AdapterError::new(
        exchange,
        crate::error::AdapterErrorKind::Unsupported(format!("interval {interval}")),
    )
}

pub(crate) fn parse_f64(exchange: Exchange, field: &str, raw: &str) -> Result<f64, AdapterError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| AdapterError::malformed(exchange, format!("{field}: '{raw}' is not a number")))
}
