use crate::domain::errors::ValidationError;
use crate::domain::value_objects::price::{round_to, Price};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One OHLCV bar
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: f64,
}

impl Candle {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, ValidationError> {
        if !volume.is_finite() || volume < 0.0 {
            return Err(ValidationError::InvalidQuantity(format!(
                "volume {} must be a non-negative number",
                volume
            )));
        }
        Ok(Candle {
            timestamp,
            open: Price::new(open)?,
            high: Price::new(high)?,
            low: Price::new(low)?,
            close: Price::new(close)?,
            volume,
        })
    }
}

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close.value()).collect()
}

pub trait Indicator {
    /// Indicator series, one value per complete window, oldest first
    fn calculate(&self, candles: &[Candle]) -> Vec<f64>;
}

pub struct SMA {
    pub period: usize,
}

impl SMA {
    pub fn new(period: usize) -> Self {
        SMA { period }
    }

    pub fn calculate_on_values(&self, values: &[f64]) -> Vec<f64> {
        if self.period == 0 || values.len() < self.period {
            return vec![];
        }
        values
            .windows(self.period)
            .map(|window| window.iter().sum::<f64>() / self.period as f64)
            .collect()
    }
}

impl Indicator for SMA {
    fn calculate(&self, candles: &[Candle]) -> Vec<f64> {
        self.calculate_on_values(&closes(candles))
    }
}

pub struct EMA {
    pub period: usize,
}

impl EMA {
    pub fn new(period: usize) -> Self {
        EMA { period }
    }

    /// Seeded with the SMA of the first `period` values
    pub fn calculate_on_values(&self, values: &[f64]) -> Vec<f64> {
        if self.period == 0 || values.len() < self.period {
            return vec![];
        }
        let multiplier = 2.0 / (self.period as f64 + 1.0);
        let mut ema_values = Vec::with_capacity(values.len() - self.period + 1);

        let mut ema = values[..self.period].iter().sum::<f64>() / self.period as f64;
        ema_values.push(ema);

        for &val in values.iter().skip(self.period) {
            ema = (val - ema) * multiplier + ema;
            ema_values.push(ema);
        }

        ema_values
    }
}

impl Indicator for EMA {
    fn calculate(&self, candles: &[Candle]) -> Vec<f64> {
        self.calculate_on_values(&closes(candles))
    }
}

pub struct RSI {
    pub period: usize,
}

impl RSI {
    pub fn new(period: usize) -> Self {
        RSI { period }
    }
}

impl Indicator for RSI {
    fn calculate(&self, candles: &[Candle]) -> Vec<f64> {
        if self.period == 0 || candles.len() < self.period + 1 {
            return vec![];
        }
        let (gains, losses): (Vec<f64>, Vec<f64>) = candles
            .windows(2)
            .map(|pair| {
                let change = pair[1].close.value() - pair[0].close.value();
                (change.max(0.0), (-change).max(0.0))
            })
            .unzip();

        gains
            .windows(self.period)
            .zip(losses.windows(self.period))
            .map(|(g, l)| {
                let avg_gain = g.iter().sum::<f64>() / self.period as f64;
                let avg_loss = l.iter().sum::<f64>() / self.period as f64;
                if avg_loss == 0.0 {
                    100.0
                } else {
                    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct BollingerBandsValues {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

pub struct BollingerBands {
    pub period: usize,
    pub std_dev: f64,
}

impl BollingerBands {
    pub fn new(period: usize, std_dev: f64) -> Self {
        BollingerBands { period, std_dev }
    }

    pub fn calculate_detailed(&self, candles: &[Candle]) -> BollingerBandsValues {
        let mut bands = BollingerBandsValues {
            upper: vec![],
            middle: vec![],
            lower: vec![],
        };
        if self.period == 0 || candles.len() < self.period {
            return bands;
        }

        for window in closes(candles).windows(self.period) {
            let sma = window.iter().sum::<f64>() / self.period as f64;
            let variance =
                window.iter().map(|c| (c - sma).powi(2)).sum::<f64>() / self.period as f64;
            let std = variance.sqrt();

            bands.upper.push(sma + self.std_dev * std);
            bands.middle.push(sma);
            bands.lower.push(sma - self.std_dev * std);
        }

        bands
    }
}

impl Indicator for BollingerBands {
    /// Middle band
    fn calculate(&self, candles: &[Candle]) -> Vec<f64> {
        self.calculate_detailed(candles).middle
    }
}

#[derive(Debug, Clone)]
pub struct MacdValues {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub struct MACD {
    pub fast_period: usize,
    pub slow_period: usize,
    pub signal_period: usize,
}

impl MACD {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        MACD {
            fast_period,
            slow_period,
            signal_period,
        }
    }

    /// MACD line, signal line and histogram, each aligned on the latest candle
    pub fn calculate_detailed(&self, candles: &[Candle]) -> MacdValues {
        let fast_values = EMA::new(self.fast_period).calculate(candles);
        let slow_values = EMA::new(self.slow_period).calculate(candles);

        // Both series end on the last candle; the slower one starts later
        let offset = fast_values.len().saturating_sub(slow_values.len());
        let macd: Vec<f64> = fast_values
            .iter()
            .skip(offset)
            .zip(slow_values.iter())
            .map(|(f, s)| f - s)
            .collect();

        let signal = EMA::new(self.signal_period).calculate_on_values(&macd);
        let histogram = macd
            .iter()
            .skip(macd.len().saturating_sub(signal.len()))
            .zip(signal.iter())
            .map(|(m, s)| m - s)
            .collect();

        MacdValues {
            macd,
            signal,
            histogram,
        }
    }
}

impl Indicator for MACD {
    /// Signal line
    fn calculate(&self, candles: &[Candle]) -> Vec<f64> {
        self.calculate_detailed(candles).signal
    }
}

/// Latest value of each indicator, `None` where the series is too short
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub candle_count: usize,
    pub last_close: Option<f64>,
    pub sma_20: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_26: Option<f64>,
    pub rsi_14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_middle: Option<f64>,
    pub bollinger_lower: Option<f64>,
}

impl IndicatorSnapshot {
    pub fn compute(candles: &[Candle]) -> Self {
        let latest = |series: Vec<f64>| series.last().map(|v| round_to(*v, 5));
        let macd = MACD::new(12, 26, 9).calculate_detailed(candles);
        let bands = BollingerBands::new(20, 2.0).calculate_detailed(candles);

        IndicatorSnapshot {
            candle_count: candles.len(),
            last_close: candles.last().map(|c| c.close.value()),
            sma_20: latest(SMA::new(20).calculate(candles)),
            ema_12: latest(EMA::new(12).calculate(candles)),
            ema_26: latest(EMA::new(26).calculate(candles)),
            rsi_14: latest(RSI::new(14).calculate(candles)).map(|v| round_to(v, 2)),
            macd: latest(macd.macd),
            macd_signal: latest(macd.signal),
            macd_histogram: latest(macd.histogram),
            bollinger_upper: latest(bands.upper),
            bollinger_middle: latest(bands.middle),
            bollinger_lower: latest(bands.lower),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candle_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let start = Utc::now() - Duration::hours(closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                Candle::new(
                    start + Duration::hours(i as i64),
                    close,
                    close + 1.0,
                    close - 0.5,
                    close,
                    1000.0,
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_candle_rejects_invalid_prices() {
        assert!(Candle::new(Utc::now(), 100.0, 101.0, 0.0, 100.0, 10.0).is_err());
        assert!(Candle::new(Utc::now(), 100.0, 101.0, 99.0, 100.0, -1.0).is_err());
    }

    #[test]
    fn test_sma_calculation() {
        let candles = candles_from_closes(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(SMA::new(3).calculate(&candles), vec![2.0, 3.0, 4.0]);
        assert!(SMA::new(6).calculate(&candles).is_empty());
    }

    #[test]
    fn test_ema_calculation() {
        let candles = candles_from_closes(&[100.0, 102.0, 101.0, 103.0, 105.0]);
        let ema = EMA::new(3).calculate(&candles);

        assert_eq!(ema.len(), 3);
        assert!((ema[0] - 101.0).abs() < 1e-9);
        // 0.5 multiplier: (103 - 101) * 0.5 + 101
        assert!((ema[1] - 102.0).abs() < 1e-9);
        assert!((ema[2] - 103.5).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_bounds() {
        let rising: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        let rsi = RSI::new(14).calculate(&candles_from_closes(&rising));
        assert_eq!(rsi.len(), 6);
        assert!(rsi.iter().all(|v| *v == 100.0));

        let mixed = [
            44.0, 44.3, 44.1, 43.6, 44.3, 44.8, 45.1, 45.4, 45.8, 46.1, 45.9, 46.2, 45.6, 46.3,
            46.3, 46.0,
        ];
        let rsi = RSI::new(14).calculate(&candles_from_closes(&mixed));
        assert_eq!(rsi.len(), 2);
        assert!(rsi.iter().all(|v| *v > 0.0 && *v < 100.0));
    }

    #[test]
    fn test_bollinger_bands_flat_series() {
        let candles = candles_from_closes(&[10.0; 25]);
        let bands = BollingerBands::new(20, 2.0).calculate_detailed(&candles);
        assert_eq!(bands.middle.len(), 6);
        assert_eq!(bands.upper[0], 10.0);
        assert_eq!(bands.lower[0], 10.0);
    }

    #[test]
    fn test_macd_series_end_on_latest_candle() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0).collect();
        let candles = candles_from_closes(&closes);
        let macd = MACD::new(12, 26, 9).calculate_detailed(&candles);

        assert_eq!(macd.macd.len(), 60 - 26 + 1);
        assert_eq!(macd.signal.len(), macd.macd.len() - 9 + 1);
        assert_eq!(macd.histogram.len(), macd.signal.len());

        let fast = EMA::new(12).calculate(&candles);
        let slow = EMA::new(26).calculate(&candles);
        let expected_last = fast.last().unwrap() - slow.last().unwrap();
        assert!((macd.macd.last().unwrap() - expected_last).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_on_short_and_long_series() {
        let short = IndicatorSnapshot::compute(&candles_from_closes(&[100.0, 101.0, 102.0]));
        assert_eq!(short.candle_count, 3);
        assert_eq!(short.last_close, Some(102.0));
        assert!(short.sma_20.is_none());
        assert!(short.rsi_14.is_none());
        assert!(short.macd.is_none());

        let closes: Vec<f64> = (0..50).map(|i| 100.0 + i as f64).collect();
        let long = IndicatorSnapshot::compute(&candles_from_closes(&closes));
        assert!(long.sma_20.is_some());
        assert_eq!(long.rsi_14, Some(100.0));
        assert!(long.macd_histogram.is_some());

        assert!(IndicatorSnapshot::compute(&[]).is_empty());
    }
}
