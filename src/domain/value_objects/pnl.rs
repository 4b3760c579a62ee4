use serde::Serialize;

/// Realized profit or loss of a closed trade.
///
/// Both fields are rounded to cents / hundredths of a percent. The value can
/// be negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProfitLoss {
    pub profit_loss: f64,
    pub profit_loss_percent: f64,
}

impl ProfitLoss {
    pub fn new(profit_loss: f64, profit_loss_percent: f64) -> Self {
        Self {
            profit_loss,
            profit_loss_percent,
        }
    }

    pub fn is_profit(&self) -> bool {
        self.profit_loss > 0.0
    }

    pub fn is_loss(&self) -> bool {
        self.profit_loss < 0.0
    }

    pub fn abs(&self) -> f64 {
        self.profit_loss.abs()
    }
}

impl std::fmt::Display for ProfitLoss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.profit_loss >= 0.0 {
            write!(f, "+${:.2} ({:+.2}%)", self.profit_loss, self.profit_loss_percent)
        } else {
            write!(
                f,
                "-${:.2} ({:+.2}%)",
                self.profit_loss.abs(),
                self.profit_loss_percent
            )
        }
    }
}
