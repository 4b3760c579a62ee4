use crate::domain::errors::ExternalError;
use crate::domain::services::indicators::Candle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Latest traded price of a symbol
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Source of quotes and historical candles
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn quote(&self, symbol: &str) -> Result<Quote, ExternalError>;

    /// Up to `limit` candles of `interval` (e.g. "1h"), oldest first
    async fn candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExternalError>;
}
