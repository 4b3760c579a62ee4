use crate::domain::errors::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Market a symbol trades on; decides how stops and lot sizes are computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    Stock,
    Forex,
    Crypto,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Stock => "stock",
            MarketType::Forex => "forex",
            MarketType::Crypto => "crypto",
        }
    }
}

impl std::fmt::Display for MarketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stock" => Ok(MarketType::Stock),
            "forex" => Ok(MarketType::Forex),
            "crypto" => Ok(MarketType::Crypto),
            other => Err(ValidationError::UnknownMarketType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Storage form ("long" / "short")
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

impl FromStr for PositionSide {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "long" => Ok(PositionSide::Long),
            "short" => Ok(PositionSide::Short),
            other => Err(ValidationError::UnknownSide(other.to_string())),
        }
    }
}

/// An open simulated trade.
///
/// For a long position `stop_loss < entry_price < take_profit`, mirrored for
/// a short. At most one position exists per (user, symbol).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub user_id: i64,
    pub symbol: String,
    pub market_type: MarketType,
    pub side: PositionSide,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub entry_reason: String,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Entry price times quantity, not marked to market
    pub fn notional_value(&self) -> f64 {
        self.entry_price * self.quantity
    }

    /// Whether stop and take sit on the correct sides of the entry price
    pub fn has_consistent_levels(&self) -> bool {
        match self.side {
            PositionSide::Long => {
                self.stop_loss < self.entry_price && self.entry_price < self.take_profit
            }
            PositionSide::Short => {
                self.take_profit < self.entry_price && self.entry_price < self.stop_loss
            }
        }
    }

    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        let price_diff = match self.side {
            PositionSide::Long => current_price - self.entry_price,
            PositionSide::Short => self.entry_price - current_price,
        };
        price_diff * self.quantity
    }
}
