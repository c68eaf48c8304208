use chrono::{DateTime, TimeZone, Utc};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// One OHLCV interval. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[builder(default)]
    pub volume: f64,
}

/// CSV row shape: epoch milliseconds plus the five OHLCV columns.
#[derive(Debug, Deserialize)]
pub struct CandleRecord {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    pub fn from_record(record: CandleRecord) -> Result<Self, SimError> {
        let timestamp = Utc
            .timestamp_millis_opt(record.timestamp)
            .single()
            .ok_or_else(|| {
                SimError::ConfigError(format!(
                    "Invalid candle timestamp (epoch millis): {}",
                    record.timestamp
                ))
            })?;
        Ok(Self {
            timestamp,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            volume: record.volume,
        })
    }
}

impl PartialEq for Candle {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
            && self.open == other.open
            && self.high == other.high
            && self.low == other.low
            && self.close == other.close
            && self.volume == other.volume
    }
}

impl PartialOrd for Candle {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.timestamp.partial_cmp(&other.timestamp)
    }
}
