use crate::domain::entities::position::{MarketType, Position, PositionSide};
use crate::domain::value_objects::pnl::ProfitLoss;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::str::FromStr;

/// Why a position was closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    AiSellSignal,
    AiBuySignal,
    StopLossHit,
    TakeProfitHit,
    Manual,
    /// Free-form tag supplied by the caller
    Other(String),
}

impl ExitReason {
    pub fn as_str(&self) -> &str {
        match self {
            ExitReason::AiSellSignal => "AI_SELL_SIGNAL",
            ExitReason::AiBuySignal => "AI_BUY_SIGNAL",
            ExitReason::StopLossHit => "STOP_LOSS_HIT",
            ExitReason::TakeProfitHit => "TAKE_PROFIT_HIT",
            ExitReason::Manual => "manual",
            ExitReason::Other(tag) => tag,
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExitReason {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "AI_SELL_SIGNAL" => ExitReason::AiSellSignal,
            "AI_BUY_SIGNAL" => ExitReason::AiBuySignal,
            "STOP_LOSS_HIT" => ExitReason::StopLossHit,
            "TAKE_PROFIT_HIT" => ExitReason::TakeProfitHit,
            "manual" => ExitReason::Manual,
            other => ExitReason::Other(other.to_string()),
        })
    }
}

impl From<&str> for ExitReason {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(reason) => reason,
            Err(never) => match never {},
        }
    }
}

impl Serialize for ExitReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Immutable record of a closed position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub id: String,
    pub position_id: String,
    pub user_id: i64,
    pub symbol: String,
    pub market_type: MarketType,
    pub side: PositionSide,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub profit_loss: f64,
    pub profit_loss_percent: f64,
    pub entry_reason: String,
    pub exit_reason: ExitReason,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl Trade {
    /// Build the trade record that replaces `position` once it is settled
    pub fn from_closed_position(
        id: String,
        position: &Position,
        exit_price: f64,
        pnl: ProfitLoss,
        exit_reason: ExitReason,
        closed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            position_id: position.id.clone(),
            user_id: position.user_id,
            symbol: position.symbol.clone(),
            market_type: position.market_type,
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            profit_loss: pnl.profit_loss,
            profit_loss_percent: pnl.profit_loss_percent,
            entry_reason: position.entry_reason.clone(),
            exit_reason,
            opened_at: position.opened_at,
            closed_at,
        }
    }

    pub fn is_win(&self) -> bool {
        self.profit_loss > 0.0
    }

    pub fn is_loss(&self) -> bool {
        self.profit_loss < 0.0
    }
}

/// Aggregate statistics over a user's trade history
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeStats {
    pub total_trades: u64,
    pub winning_trades: u64,
    /// Percentage of trades with positive P&L
    pub win_rate: f64,
    pub average_return_percent: f64,
    pub total_profit_loss: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_reason_tags() {
        assert_eq!(ExitReason::StopLossHit.to_string(), "STOP_LOSS_HIT");
        assert_eq!(ExitReason::from("TAKE_PROFIT_HIT"), ExitReason::TakeProfitHit);
        assert_eq!(ExitReason::from("manual"), ExitReason::Manual);
        assert_eq!(
            ExitReason::from("test"),
            ExitReason::Other("test".to_string())
        );
        assert_eq!(ExitReason::from("test").as_str(), "test");
    }

    #[test]
    fn test_trade_carries_entry_context() {
        let opened_at = Utc::now();
        let position = Position {
            id: "pos_1".to_string(),
            user_id: 7,
            symbol: "EUR/USD".to_string(),
            market_type: MarketType::Forex,
            side: PositionSide::Short,
            entry_price: 1.1,
            quantity: 5000.0,
            stop_loss: 1.102,
            take_profit: 1.096,
            entry_reason: "bearish divergence".to_string(),
            opened_at,
        };
        let trade = Trade::from_closed_position(
            "trade_1".to_string(),
            &position,
            1.096,
            ProfitLoss::new(20.0, 0.36),
            ExitReason::TakeProfitHit,
            Utc::now(),
        );

        assert_eq!(trade.position_id, "pos_1");
        assert_eq!(trade.user_id, 7);
        assert_eq!(trade.entry_reason, "bearish divergence");
        assert_eq!(trade.opened_at, opened_at);
        assert!(trade.is_win());
        assert_eq!(
            serde_json::to_value(&trade).unwrap()["exit_reason"],
            "TAKE_PROFIT_HIT"
        );
    }
}
