//! Twelve Data REST client
//!
//! Quotes come from `/price`, candles from `/time_series`. Twelve Data
//! sometimes reports errors inside a 200 response (`"status": "error"` with
//! a `code`), so bodies are checked before they are decoded.

use crate::config::MarketDataConfig;
use crate::domain::errors::ExternalError;
use crate::domain::repositories::market_data::{MarketDataProvider, Quote};
use crate::domain::services::indicators::Candle;
use crate::infrastructure::http::{build_client, classify_transport, read_body};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: String,
}

#[derive(Debug, Deserialize)]
struct TimeSeriesResponse {
    #[serde(default)]
    values: Vec<TimeSeriesValue>,
}

#[derive(Debug, Deserialize)]
struct TimeSeriesValue {
    datetime: String,
    open: String,
    high: String,
    low: String,
    close: String,
    #[serde(default)]
    volume: Option<String>,
}

pub struct TwelveDataClient {
    client: Client,
    config: MarketDataConfig,
}

impl TwelveDataClient {
    pub fn new(config: MarketDataConfig) -> Result<Self, ExternalError> {
        Ok(Self {
            client: build_client(config.timeout)?,
            config,
        })
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<String, ExternalError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| ExternalError::Permanent("TWELVE_DATA_API_KEY is not set".to_string()))?;
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);

        let response = self
            .client
            .get(&url)
            .query(params)
            .query(&[("apikey", api_key)])
            .send()
            .await
            .map_err(classify_transport)?;

        read_body(response).await
    }
}

#[async_trait]
impl MarketDataProvider for TwelveDataClient {
    fn name(&self) -> &str {
        "twelve_data"
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, ExternalError> {
        let body = self.get("price", &[("symbol", symbol.to_string())]).await?;
        let price = parse_price_body(&body)?;
        debug!("Quote {} = {}", symbol, price);

        Ok(Quote {
            symbol: symbol.to_string(),
            price,
            timestamp: Utc::now(),
        })
    }

    async fn candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExternalError> {
        let body = self
            .get(
                "time_series",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("outputsize", limit.to_string()),
                ],
            )
            .await?;
        let candles = parse_time_series_body(&body)?;
        debug!("Fetched {} {} candles for {}", candles.len(), interval, symbol);
        Ok(candles)
    }
}

/// Surface an error embedded in a successful HTTP response
fn check_api_error(body: &str) -> Result<(), ExternalError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ExternalError::Parse(format!("invalid JSON: {}", e)))?;

    if value.get("status").and_then(Value::as_str) != Some("error") {
        return Ok(());
    }

    let code = value.get("code").and_then(Value::as_u64).unwrap_or(0);
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let detail = format!("Twelve Data error {}: {}", code, message);

    Err(match code {
        429 => ExternalError::Quota(detail),
        500..=599 => ExternalError::Transient(detail),
        _ => ExternalError::Permanent(detail),
    })
}

fn parse_number(field: &str, raw: &str) -> Result<f64, ExternalError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|e| ExternalError::Parse(format!("{} '{}': {}", field, raw, e)))
}

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, ExternalError> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| ExternalError::Parse(format!("datetime '{}'", raw)))
}

pub(crate) fn parse_price_body(body: &str) -> Result<f64, ExternalError> {
    check_api_error(body)?;
    let response: PriceResponse = serde_json::from_str(body)
        .map_err(|e| ExternalError::Parse(format!("price response: {}", e)))?;
    parse_number("price", &response.price)
}

/// Candles oldest first; the API returns newest first
pub(crate) fn parse_time_series_body(body: &str) -> Result<Vec<Candle>, ExternalError> {
    check_api_error(body)?;
    let response: TimeSeriesResponse = serde_json::from_str(body)
        .map_err(|e| ExternalError::Parse(format!("time series response: {}", e)))?;

    let mut candles = response
        .values
        .iter()
        .map(|v| {
            let volume = match v.volume.as_deref() {
                Some(raw) => parse_number("volume", raw)?,
                None => 0.0,
            };
            Candle::new(
                parse_datetime(&v.datetime)?,
                parse_number("open", &v.open)?,
                parse_number("high", &v.high)?,
                parse_number("low", &v.low)?,
                parse_number("close", &v.close)?,
                volume,
            )
            .map_err(|e| ExternalError::Parse(format!("candle at {}: {}", v.datetime, e)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}
