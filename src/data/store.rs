use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use tracing::info;

use crate::data::candle::{Candle, CandleRecord};
use crate::error::SimError;

/// In-memory, per-symbol store of ascending-sorted candle sequences.
///
/// The store is the read-only input shared by every simulation run; a run
/// never mutates it, so `&CandleStore` can be handed to concurrent workers
/// without locking.
#[derive(Debug, Clone, Default)]
pub struct CandleStore {
    data: HashMap<String, Vec<Candle>>,
}

impl CandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load candles for a symbol, sorting ascending by timestamp.
    pub fn load(&mut self, symbol: &str, mut candles: Vec<Candle>) {
        candles.sort_by(|a, b| {
            a.timestamp
                .partial_cmp(&b.timestamp)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        info!("Loaded {} candles for {}", candles.len(), symbol);
        self.data.insert(symbol.to_uppercase(), candles);
    }

    /// Load candles for a symbol from a CSV file with
    /// `timestamp,open,high,low,close,volume` columns.
    pub fn load_csv<P: AsRef<Path>>(&mut self, symbol: &str, path: P) -> Result<(), SimError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut candles = Vec::new();
        for row in reader.deserialize() {
            let record: CandleRecord = row?;
            candles.push(Candle::from_record(record)?);
        }
        self.load(symbol, candles);
        Ok(())
    }

    pub fn has(&self, symbol: &str) -> bool {
        self.data.contains_key(&symbol.to_uppercase())
    }

    pub fn get(&self, symbol: &str) -> Option<&[Candle]> {
        self.data.get(&symbol.to_uppercase()).map(|v| v.as_slice())
    }

    pub fn symbols(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Candles whose date portion falls within the inclusive `[start, end]`
    /// bounds. The sequence is already sorted; filtering preserves order.
    pub fn filter_by_date(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Candle>, SimError> {
        let candles = self.get(symbol).ok_or_else(|| SimError::NoData {
            symbol: symbol.to_string(),
        })?;
        Ok(candles
            .iter()
            .filter(|c| {
                let date = c.timestamp.date_naive();
                date >= start && date <= end
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    fn candle_at(millis: i64, close: f64) -> Candle {
        Candle {
            timestamp: Utc.timestamp_millis_opt(millis).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
        }
    }

    #[test]
    fn test_load_sorts_ascending() {
        let mut store = CandleStore::new();
        store.load(
            "sol",
            vec![candle_at(3_000, 3.0), candle_at(1_000, 1.0), candle_at(2_000, 2.0)],
        );
        let candles = store.get("SOL").unwrap();
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_symbol_case_insensitive() {
        let mut store = CandleStore::new();
        store.load("btcusdt", vec![candle_at(0, 1.0)]);
        assert!(store.has("BTCUSDT"));
        assert!(store.has("BtcUsdt"));
        assert!(!store.has("ETHUSDT"));
    }

    #[test]
    fn test_filter_by_date_inclusive() {
        let mut store = CandleStore::new();
        // 2024-01-01, 2024-01-02, 2024-01-03 at midnight UTC
        let day = 86_400_000i64;
        let base = 1_704_067_200_000i64;
        store.load(
            "SOL",
            vec![
                candle_at(base, 1.0),
                candle_at(base + day, 2.0),
                candle_at(base + 2 * day, 3.0),
            ],
        );
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let filtered = store.filter_by_date("SOL", start, end).unwrap();
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered.last().unwrap().close, 2.0);
    }

    #[test]
    fn test_filter_unknown_symbol() {
        let store = CandleStore::new();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let result = store.filter_by_date("SOL", start, start);
        assert!(matches!(result, Err(SimError::NoData { .. })));
    }
}
