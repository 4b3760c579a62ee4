use crate::domain::entities::position::{MarketType, Position, PositionSide};
use crate::domain::errors::ExternalError;
use crate::domain::services::indicators::IndicatorSnapshot;
use crate::domain::value_objects::decision::AiDecision;
use async_trait::async_trait;
use serde::Serialize;

/// The open position as the advisor sees it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionContext {
    pub side: PositionSide,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub unrealized_pnl: f64,
}

impl PositionContext {
    pub fn from_position(position: &Position, current_price: f64) -> Self {
        Self {
            side: position.side,
            entry_price: position.entry_price,
            quantity: position.quantity,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            unrealized_pnl: position.unrealized_pnl(current_price),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdvisoryRequest {
    pub symbol: String,
    pub market_type: MarketType,
    pub current_price: f64,
    pub indicators: IndicatorSnapshot,
    pub position: Option<PositionContext>,
}

/// Produces a BUY/SELL/HOLD recommendation for one symbol
#[async_trait]
pub trait TradeAdvisor: Send + Sync {
    fn name(&self) -> &str;

    async fn recommend(&self, request: &AdvisoryRequest) -> Result<AiDecision, ExternalError>;
}
