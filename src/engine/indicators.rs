//! Indicator accessors available to strategies through [`SimContext`].
//!
//! All lookups are bounded by the current candle index, so a strategy can
//! never read ahead of the bar it is being called on.

use crate::engine::context::SimContext;

/// MACD line, signal line and histogram at the current bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Bollinger band levels at the current bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl SimContext<'_> {
    /// Closing price `lookback` bars ago, 0.0 when out of range.
    pub fn close(&self, lookback: usize) -> f64 {
        self.idx
            .checked_sub(lookback)
            .and_then(|i| self.candles.get(i))
            .map_or(0.0, |c| c.close)
    }

    /// High price `lookback` bars ago, 0.0 when out of range.
    pub fn high(&self, lookback: usize) -> f64 {
        self.idx
            .checked_sub(lookback)
            .and_then(|i| self.candles.get(i))
            .map_or(0.0, |c| c.high)
    }

    /// Low price `lookback` bars ago, 0.0 when out of range.
    pub fn low(&self, lookback: usize) -> f64 {
        self.idx
            .checked_sub(lookback)
            .and_then(|i| self.candles.get(i))
            .map_or(0.0, |c| c.low)
    }

    /// Volume `lookback` bars ago, 0.0 when out of range.
    pub fn volume(&self, lookback: usize) -> f64 {
        self.idx
            .checked_sub(lookback)
            .and_then(|i| self.candles.get(i))
            .map_or(0.0, |c| c.volume)
    }

    /// Simple moving average over the last `period` closes. Falls back to
    /// the current close while the window is still warming up.
    pub fn sma(&self, period: usize) -> f64 {
        if period == 0 || self.idx + 1 < period {
            return self.close(0);
        }
        let sum: f64 = (0..period).map(|i| self.close(i)).sum();
        sum / period as f64
    }

    /// Exponential moving average seeded from the SMA of the oldest `period`
    /// closes in a `2 * period` window. Degrades to a plain mean while the
    /// window is shorter than `period`.
    pub fn ema(&self, period: usize) -> f64 {
        let window = (period * 2).min(self.idx + 1);
        // Oldest first
        let closes: Vec<f64> = (0..window).rev().map(|i| self.close(i)).collect();

        if closes.is_empty() {
            return 0.0;
        }
        if closes.len() < period {
            return closes.iter().sum::<f64>() / closes.len() as f64;
        }

        let multiplier = 2.0 / (period as f64 + 1.0);
        let mut ema = closes[..period].iter().sum::<f64>() / period as f64;
        for price in &closes[period..] {
            ema = price * multiplier + ema * (1.0 - multiplier);
        }
        ema
    }

    /// Relative strength index over simple gain/loss averages. Returns the
    /// neutral 50 until `period + 1` closes are available, and 100 when no
    /// losses occurred in the window.
    pub fn rsi(&self, period: usize) -> f64 {
        if period == 0 || self.idx < period {
            return 50.0;
        }

        // Oldest first, period + 1 closes give period deltas
        let closes: Vec<f64> = (0..=period).rev().map(|i| self.close(i)).collect();

        let mut avg_gain = 0.0;
        let mut avg_loss = 0.0;
        for pair in closes.windows(2) {
            let change = pair[1] - pair[0];
            if change > 0.0 {
                avg_gain += change;
            } else {
                avg_loss += -change;
            }
        }
        avg_gain /= period as f64;
        avg_loss /= period as f64;

        if avg_loss == 0.0 {
            return 100.0;
        }

        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }

    /// MACD built from the 12/26 EMA pair with a proportional signal line.
    pub fn macd(&self) -> Macd {
        let macd_line = self.ema(12) - self.ema(26);
        let signal = macd_line * 0.9;
        Macd {
            macd: macd_line,
            signal,
            histogram: macd_line - signal,
        }
    }

    /// Bollinger bands over the last `period` closes using the population
    /// standard deviation. Bands collapse onto the mean with fewer than two
    /// samples.
    pub fn bollinger_bands(&self, period: usize, std_dev: f64) -> BollingerBands {
        let window = period.min(self.idx + 1);
        let closes: Vec<f64> = (0..window).map(|i| self.close(i)).collect();

        if closes.is_empty() {
            return BollingerBands {
                upper: 0.0,
                middle: 0.0,
                lower: 0.0,
            };
        }

        let middle = closes.iter().sum::<f64>() / closes.len() as f64;
        if closes.len() < 2 {
            return BollingerBands {
                upper: middle,
                middle,
                lower: middle,
            };
        }

        let variance =
            closes.iter().map(|p| (p - middle).powi(2)).sum::<f64>() / closes.len() as f64;
        let std = variance.sqrt();

        BollingerBands {
            upper: middle + std_dev * std,
            middle,
            lower: middle - std_dev * std,
        }
    }

    /// Average true range over the last `period` bars, 0.0 until enough
    /// history has accumulated.
    pub fn atr(&self, period: usize) -> f64 {
        if period == 0 || self.idx < period {
            return 0.0;
        }

        let mut true_ranges = Vec::with_capacity(period);
        for i in 0..period {
            let idx = self.idx - i;
            if idx > 0 {
                let current = &self.candles[idx];
                let prev = &self.candles[idx - 1];
                let tr = (current.high - current.low)
                    .max((current.high - prev.close).abs())
                    .max((current.low - prev.close).abs());
                true_ranges.push(tr);
            }
        }

        if true_ranges.is_empty() {
            return 0.0;
        }
        true_ranges.iter().sum::<f64>() / true_ranges.len() as f64
    }
}
