use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Operational state of the autonomous trader.
///
/// `trades_today` belongs to `counter_date`; once the UTC day changes the
/// counter is stale and reads as zero until it is rolled over.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotStatus {
    pub running: bool,
    pub trades_today: u32,
    pub counter_date: NaiveDate,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub last_check_at: Option<DateTime<Utc>>,
}

impl BotStatus {
    /// Trades executed on `day`
    pub fn trades_on(&self, day: NaiveDate) -> u32 {
        if self.counter_date == day {
            self.trades_today
        } else {
            0
        }
    }

    pub fn needs_rollover(&self, day: NaiveDate) -> bool {
        self.counter_date != day
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_counter_reads_as_zero() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let status = BotStatus {
            running: true,
            trades_today: 4,
            counter_date: yesterday,
            last_trade_at: None,
            last_check_at: None,
        };

        assert_eq!(status.trades_on(yesterday), 4);
        assert_eq!(status.trades_on(today), 0);
        assert!(status.needs_rollover(today));
        assert!(!status.needs_rollover(yesterday));
    }
}
