//! Risk rules for simulated trades
//!
//! Everything here is a pure function of its arguments and the `RiskConfig`
//! the manager was built with:
//! - trade gating (daily limit, duplicate position, minimum balance, loss cooldown)
//! - stop-loss / take-profit placement per market type
//! - risk-based position sizing with a position-value cap
//! - exit detection and P&L settlement
//!
//! None of these functions fail. A degenerate stop (stop == entry) is reported
//! through `PositionSize::error` and must be checked by the caller.

use crate::config::{RiskConfig, StopRule};
use crate::domain::entities::position::{MarketType, Position, PositionSide};
use crate::domain::entities::trade::ExitReason;
use crate::domain::value_objects::pnl::ProfitLoss;
use crate::domain::value_objects::price::{floor_to, round_to};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Decimal places of computed stop/take prices
const PRICE_DECIMALS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskRule {
    MaxTradesPerDay,
    NoDuplicatePosition,
    MinimumBalance,
    LossCooldown,
}

impl RiskRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskRule::MaxTradesPerDay => "MAX_TRADES_PER_DAY",
            RiskRule::NoDuplicatePosition => "NO_DUPLICATE_POSITION",
            RiskRule::MinimumBalance => "MINIMUM_BALANCE",
            RiskRule::LossCooldown => "LOSS_COOLDOWN",
        }
    }
}

impl std::fmt::Display for RiskRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskCheck {
    pub rule: RiskRule,
    pub passed: bool,
    pub message: String,
}

/// Result of evaluating every gating rule; `allowed` is the AND of all checks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeGate {
    pub allowed: bool,
    pub checks: Vec<RiskCheck>,
}

impl TradeGate {
    pub fn failures(&self) -> impl Iterator<Item = &RiskCheck> {
        self.checks.iter().filter(|check| !check.passed)
    }

    pub fn check(&self, rule: RiskRule) -> Option<&RiskCheck> {
        self.checks.iter().find(|check| check.rule == rule)
    }
}

/// Outcome of the most recently closed trade
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastTradeOutcome {
    pub profit_loss: f64,
    pub closed_at: DateTime<Utc>,
}

/// Account facts the gating rules are evaluated against
#[derive(Debug, Clone, PartialEq)]
pub struct AccountActivity {
    pub trades_today: u32,
    pub has_open_position: bool,
    pub last_trade: Option<LastTradeOutcome>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StopLevels {
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionSize {
    pub quantity: f64,
    pub risk_amount: f64,
    pub position_value: f64,
    pub risk_percent: f64,
    /// Set when the stop sits exactly on the entry price
    pub error: Option<String>,
}

impl PositionSize {
    pub fn is_tradeable(&self) -> bool {
        self.error.is_none() && self.quantity > 0.0
    }
}

/// A triggered protective exit and the price it fills at
#[derive(Debug, Clone, PartialEq)]
pub struct ExitTrigger {
    pub reason: ExitReason,
    pub exit_price: f64,
}

#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Evaluate all gating rules without short-circuiting.
    ///
    /// `LOSS_COOLDOWN` is only present when the last closed trade was a loss.
    pub fn can_open_trade(&self, symbol: &str, balance: f64, activity: &AccountActivity) -> TradeGate {
        let mut checks = Vec::with_capacity(4);
        let max_trades = self.config.max_trades_per_day;

        let under_daily_limit = activity.trades_today < max_trades;
        checks.push(RiskCheck {
            rule: RiskRule::MaxTradesPerDay,
            passed: under_daily_limit,
            message: if under_daily_limit {
                format!("{}/{} trades executed today", activity.trades_today, max_trades)
            } else {
                format!(
                    "Daily trade limit reached ({}/{})",
                    activity.trades_today, max_trades
                )
            },
        });

        checks.push(RiskCheck {
            rule: RiskRule::NoDuplicatePosition,
            passed: !activity.has_open_position,
            message: if activity.has_open_position {
                format!("Position already open for {}", symbol)
            } else {
                format!("No open position for {}", symbol)
            },
        });

        let minimum = self.config.minimum_balance;
        let funded = balance >= minimum;
        checks.push(RiskCheck {
            rule: RiskRule::MinimumBalance,
            passed: funded,
            message: if funded {
                format!("Balance ${:.2} meets minimum ${:.2}", balance, minimum)
            } else {
                format!("Balance ${:.2} below minimum ${:.2}", balance, minimum)
            },
        });

        if let Some(last) = activity.last_trade.filter(|t| t.profit_loss < 0.0) {
            let elapsed = (activity.now - last.closed_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            let cooldown = self.config.loss_cooldown;
            let cooled_down = elapsed >= cooldown;
            checks.push(RiskCheck {
                rule: RiskRule::LossCooldown,
                passed: cooled_down,
                message: if cooled_down {
                    "Loss cooldown elapsed".to_string()
                } else {
                    let remaining = cooldown - elapsed;
                    format!(
                        "Cooling down after a loss: {} min remaining",
                        remaining.as_secs().div_ceil(60)
                    )
                },
            });
        }

        TradeGate {
            allowed: checks.iter().all(|check| check.passed),
            checks,
        }
    }

    /// Place stop-loss and take-profit around `entry_price`
    pub fn calculate_stop_levels(
        &self,
        entry_price: f64,
        side: PositionSide,
        market_type: MarketType,
    ) -> StopLevels {
        let (stop_distance, take_distance) = match self.config.market(market_type).stops {
            StopRule::Percent {
                stop_loss_pct,
                take_profit_pct,
            } => (entry_price * stop_loss_pct, entry_price * take_profit_pct),
            StopRule::Pips {
                pip_size,
                stop_loss_pips,
                take_profit_pips,
            } => (pip_size * stop_loss_pips, pip_size * take_profit_pips),
        };

        let (stop_loss, take_profit) = match side {
            PositionSide::Long => (entry_price - stop_distance, entry_price + take_distance),
            PositionSide::Short => (entry_price + stop_distance, entry_price - take_distance),
        };

        let risk_reward_ratio = if stop_distance > 0.0 {
            round_to(take_distance / stop_distance, 2)
        } else {
            0.0
        };

        StopLevels {
            stop_loss: round_to(stop_loss, PRICE_DECIMALS),
            take_profit: round_to(take_profit, PRICE_DECIMALS),
            risk_reward_ratio,
        }
    }

    /// Size a position so that hitting the stop loses at most the per-trade
    /// risk budget, then cap its value at a fraction of the balance.
    pub fn calculate_position_size(
        &self,
        balance: f64,
        entry_price: f64,
        stop_loss_price: f64,
        market_type: MarketType,
    ) -> PositionSize {
        let risk_amount = balance * self.config.max_risk_per_trade;
        let risk_percent = round_to(self.config.max_risk_per_trade * 100.0, 2);
        let risk_per_unit = (entry_price - stop_loss_price).abs();

        if risk_per_unit <= f64::EPSILON {
            return PositionSize {
                quantity: 0.0,
                risk_amount,
                position_value: 0.0,
                risk_percent,
                error: Some("Stop-loss equals entry price".to_string()),
            };
        }

        let lots = self.config.market(market_type).lot_rounding;
        let mut quantity = lots.apply(risk_amount / risk_per_unit);

        let max_position_value = balance * self.config.max_position_value_fraction;
        if quantity * entry_price > max_position_value {
            quantity = floor_to(max_position_value / entry_price, lots.decimals());
        }
        let quantity = quantity.max(0.0);

        PositionSize {
            quantity,
            risk_amount,
            position_value: round_to(quantity * entry_price, 2),
            risk_percent,
            error: None,
        }
    }

    /// Check whether `current_price` crossed the position's stop or take.
    ///
    /// Fills at the level itself rather than the observed price, as a resting
    /// stop order would.
    pub fn should_close_position(&self, position: &Position, current_price: f64) -> Option<ExitTrigger> {
        let (stop_hit, take_hit) = match position.side {
            PositionSide::Long => (
                current_price <= position.stop_loss,
                current_price >= position.take_profit,
            ),
            PositionSide::Short => (
                current_price >= position.stop_loss,
                current_price <= position.take_profit,
            ),
        };

        if stop_hit {
            Some(ExitTrigger {
                reason: ExitReason::StopLossHit,
                exit_price: position.stop_loss,
            })
        } else if take_hit {
            Some(ExitTrigger {
                reason: ExitReason::TakeProfitHit,
                exit_price: position.take_profit,
            })
        } else {
            None
        }
    }

    pub fn calculate_profit_loss(
        &self,
        entry_price: f64,
        exit_price: f64,
        quantity: f64,
        side: PositionSide,
    ) -> ProfitLoss {
        let raw_percent = if entry_price != 0.0 {
            (exit_price - entry_price) / entry_price * 100.0
        } else {
            0.0
        };
        let (profit_loss, percent) = match side {
            PositionSide::Long => ((exit_price - entry_price) * quantity, raw_percent),
            PositionSide::Short => ((entry_price - exit_price) * quantity, -raw_percent),
        };

        ProfitLoss::new(round_to(profit_loss, 2), round_to(percent, 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn manager() -> RiskManager {
        RiskManager::new(RiskConfig::default())
    }

    fn idle_activity() -> AccountActivity {
        AccountActivity {
            trades_today: 0,
            has_open_position: false,
            last_trade: None,
            now: Utc::now(),
        }
    }

    fn long_position(entry: f64, stop: f64, take: f64) -> Position {
        Position {
            id: "pos_1".to_string(),
            user_id: 1,
            symbol: "AAPL".to_string(),
            market_type: MarketType::Stock,
            side: PositionSide::Long,
            entry_price: entry,
            quantity: 10.0,
            stop_loss: stop,
            take_profit: take,
            entry_reason: "test".to_string(),
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn test_can_open_trade_all_rules_pass() {
        let gate = manager().can_open_trade("AAPL", 10_000.0, &idle_activity());

        assert!(gate.allowed);
        assert_eq!(gate.checks.len(), 3);
        assert!(gate.check(RiskRule::LossCooldown).is_none());
    }

    #[test]
    fn test_can_open_trade_reports_every_failure() {
        let activity = AccountActivity {
            trades_today: 10,
            has_open_position: true,
            last_trade: None,
            now: Utc::now(),
        };
        let gate = manager().can_open_trade("AAPL", 50.0, &activity);

        assert!(!gate.allowed);
        let failed: Vec<RiskRule> = gate.failures().map(|c| c.rule).collect();
        assert_eq!(
            failed,
            vec![
                RiskRule::MaxTradesPerDay,
                RiskRule::NoDuplicatePosition,
                RiskRule::MinimumBalance
            ]
        );
    }

    #[test]
    fn test_duplicate_position_blocks_trade() {
        let activity = AccountActivity {
            has_open_position: true,
            ..idle_activity()
        };
        let gate = manager().can_open_trade("TSLA", 10_000.0, &activity);

        assert!(!gate.allowed);
        let check = gate.check(RiskRule::NoDuplicatePosition).unwrap();
        assert!(!check.passed);
        assert!(check.message.contains("TSLA"));
    }

    #[test]
    fn test_minimum_balance_boundary() {
        let risk = manager();
        assert!(risk.can_open_trade("AAPL", 100.0, &idle_activity()).allowed);
        assert!(!risk.can_open_trade("AAPL", 99.99, &idle_activity()).allowed);
    }

    #[test]
    fn test_loss_cooldown_present_only_after_loss() {
        let now = Utc::now();
        let winning = AccountActivity {
            last_trade: Some(LastTradeOutcome {
                profit_loss: 25.0,
                closed_at: now - ChronoDuration::minutes(1),
            }),
            now,
            ..idle_activity()
        };
        let gate = manager().can_open_trade("AAPL", 10_000.0, &winning);
        assert!(gate.check(RiskRule::LossCooldown).is_none());
        assert!(gate.allowed);
    }

    #[test]
    fn test_loss_cooldown_blocks_then_expires() {
        let now = Utc::now();
        let recent_loss = AccountActivity {
            last_trade: Some(LastTradeOutcome {
                profit_loss: -25.0,
                closed_at: now - ChronoDuration::minutes(5),
            }),
            now,
            ..idle_activity()
        };
        let gate = manager().can_open_trade("AAPL", 10_000.0, &recent_loss);
        let check = gate.check(RiskRule::LossCooldown).unwrap();
        assert!(!check.passed);
        assert!(check.message.contains("10 min"));
        assert!(!gate.allowed);

        let old_loss = AccountActivity {
            last_trade: Some(LastTradeOutcome {
                profit_loss: -25.0,
                closed_at: now - ChronoDuration::minutes(15),
            }),
            now,
            ..idle_activity()
        };
        let gate = manager().can_open_trade("AAPL", 10_000.0, &old_loss);
        assert!(gate.check(RiskRule::LossCooldown).unwrap().passed);
        assert!(gate.allowed);
    }

    #[test]
    fn test_can_open_trade_is_idempotent() {
        let risk = manager();
        let activity = AccountActivity {
            trades_today: 3,
            has_open_position: true,
            last_trade: None,
            now: Utc::now(),
        };
        let first = risk.can_open_trade("AAPL", 500.0, &activity);
        let second = risk.can_open_trade("AAPL", 500.0, &activity);
        assert_eq!(first, second);
    }

    #[test]
    fn test_stock_stop_levels() {
        let risk = manager();
        let long = risk.calculate_stop_levels(200.0, PositionSide::Long, MarketType::Stock);
        assert_eq!(long.stop_loss, 195.0);
        assert_eq!(long.take_profit, 210.0);
        assert_eq!(long.risk_reward_ratio, 2.0);

        let short = risk.calculate_stop_levels(200.0, PositionSide::Short, MarketType::Stock);
        assert_eq!(short.stop_loss, 205.0);
        assert_eq!(short.take_profit, 190.0);
    }

    #[test]
    fn test_forex_stop_levels_use_pips() {
        let risk = manager();
        let long = risk.calculate_stop_levels(1.1, PositionSide::Long, MarketType::Forex);
        assert_eq!(long.stop_loss, 1.098);
        assert_eq!(long.take_profit, 1.104);
        assert_eq!(long.risk_reward_ratio, 2.0);

        let short = risk.calculate_stop_levels(1.1, PositionSide::Short, MarketType::Forex);
        assert_eq!(short.stop_loss, 1.102);
        assert_eq!(short.take_profit, 1.096);
    }

    #[test]
    fn test_stop_levels_bracket_entry_for_every_market() {
        let risk = manager();
        let cases = [
            (MarketType::Stock, [1.0, 42.17, 200.0, 3150.5]),
            (MarketType::Crypto, [0.35, 2.5, 3_400.0, 64_000.0]),
            (MarketType::Forex, [0.65, 1.0842, 1.27, 151.3]),
        ];
        for (market, prices) in cases {
            for entry in prices {
                let long = risk.calculate_stop_levels(entry, PositionSide::Long, market);
                assert!(long.stop_loss < entry && entry < long.take_profit, "{market} long @ {entry}");
                let short = risk.calculate_stop_levels(entry, PositionSide::Short, market);
                assert!(short.take_profit < entry && entry < short.stop_loss, "{market} short @ {entry}");
            }
        }
    }

    #[test]
    fn test_stock_position_size_floors_to_whole_shares() {
        // risk budget 200, 5 per share at risk -> 40 shares
        let size = manager().calculate_position_size(10_000.0, 200.0, 195.0, MarketType::Stock);
        assert_eq!(size.quantity, 40.0);
        assert_eq!(size.risk_amount, 200.0);
        assert_eq!(size.position_value, 8_000.0);
        assert_eq!(size.risk_percent, 2.0);
        assert!(size.is_tradeable());

        let size = manager().calculate_position_size(10_000.0, 100.0, 97.0, MarketType::Stock);
        assert_eq!(size.quantity, 66.0);
    }

    #[test]
    fn test_position_value_is_capped() {
        // risk budget alone would allow 200 shares worth 20,000
        let size = manager().calculate_position_size(10_000.0, 100.0, 99.0, MarketType::Stock);
        assert_eq!(size.quantity, 95.0);
        assert!(size.position_value <= 10_000.0 * 0.95);
    }

    #[test]
    fn test_forex_position_size_keeps_two_decimals() {
        // risk budget 200 over 0.002 per unit -> 100,000 units, capped by value
        let size = manager().calculate_position_size(10_000.0, 1.1, 1.098, MarketType::Forex);
        assert_eq!(size.quantity, 8636.36);
        assert!(size.position_value <= 9_500.0);
    }

    #[test]
    fn test_degenerate_stop_is_reported_not_thrown() {
        let size = manager().calculate_position_size(10_000.0, 100.0, 100.0, MarketType::Stock);
        assert_eq!(size.quantity, 0.0);
        assert!(size.error.is_some());
        assert!(!size.is_tradeable());
    }

    #[test]
    fn test_expensive_stock_sizes_to_zero() {
        let size = manager().calculate_position_size(1_000.0, 5_000.0, 4_875.0, MarketType::Stock);
        assert_eq!(size.quantity, 0.0);
        assert!(size.error.is_none());
        assert!(!size.is_tradeable());
    }

    #[test]
    fn test_risk_amount_never_exceeds_budget() {
        let risk = manager();
        let budget_fraction = risk.config().max_risk_per_trade;
        for balance in [150.0, 999.99, 10_000.0, 123_456.78] {
            for (entry, stop, market) in [
                (200.0, 195.0, MarketType::Stock),
                (1.1, 1.098, MarketType::Forex),
                (64_000.0, 62_080.0, MarketType::Crypto),
            ] {
                let size = risk.calculate_position_size(balance, entry, stop, market);
                assert!(size.risk_amount <= balance * budget_fraction + 1e-9);
                assert!(size.quantity * (entry - stop).abs() <= size.risk_amount + 1e-6);
            }
        }
    }

    #[test]
    fn test_should_close_long_position() {
        let risk = manager();
        let position = long_position(100.0, 97.5, 110.0);

        let stop = risk.should_close_position(&position, 97.0).unwrap();
        assert_eq!(stop.reason, ExitReason::StopLossHit);
        assert_eq!(stop.exit_price, 97.5);

        let take = risk.should_close_position(&position, 111.0).unwrap();
        assert_eq!(take.reason, ExitReason::TakeProfitHit);
        assert_eq!(take.exit_price, 110.0);

        assert!(risk.should_close_position(&position, 105.0).is_none());
    }

    #[test]
    fn test_should_close_short_position() {
        let risk = manager();
        let position = Position {
            side: PositionSide::Short,
            stop_loss: 102.5,
            take_profit: 95.0,
            ..long_position(100.0, 0.0, 0.0)
        };

        let stop = risk.should_close_position(&position, 103.0).unwrap();
        assert_eq!(stop.reason, ExitReason::StopLossHit);
        assert_eq!(stop.exit_price, 102.5);

        let take = risk.should_close_position(&position, 94.0).unwrap();
        assert_eq!(take.reason, ExitReason::TakeProfitHit);
        assert_eq!(take.exit_price, 95.0);

        assert!(risk.should_close_position(&position, 99.0).is_none());
    }

    #[test]
    fn test_profit_loss_long_and_short() {
        let risk = manager();
        let long = risk.calculate_profit_loss(100.0, 110.0, 10.0, PositionSide::Long);
        assert_eq!(long.profit_loss, 100.0);
        assert_eq!(long.profit_loss_percent, 10.0);

        let short = risk.calculate_profit_loss(100.0, 110.0, 10.0, PositionSide::Short);
        assert_eq!(short.profit_loss, -100.0);
        assert_eq!(short.profit_loss_percent, -10.0);
    }

    #[test]
    fn test_profit_loss_rounds_to_cents() {
        let pnl = manager().calculate_profit_loss(1.1, 1.09876, 8636.36, PositionSide::Long);
        assert_eq!(pnl.profit_loss, -10.71);
        assert_eq!(pnl.profit_loss_percent, -0.11);
    }
}
