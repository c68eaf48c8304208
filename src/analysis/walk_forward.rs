//! Walk-forward validation: rolling train/test windows over one candle
//! sequence, each half replayed independently through the engine to
//! measure out-of-sample degradation.

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::BacktestConfig;
use crate::data::candle::Candle;
use crate::engine::metrics::Metrics;
use crate::engine::BacktestEngine;
use crate::error::SimError;
use crate::strategy::Strategy;
use crate::util::math;

#[derive(Debug, Clone, Builder, Serialize)]
#[builder(setter(into), default)]
pub struct WalkForwardConfig {
    /// Fraction of each window used for training.
    pub train_size: f64,
    pub n_splits: usize,
    pub initial_capital: f64,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            train_size: 0.75,
            n_splits: 5,
            initial_capital: 10_000.0,
        }
    }
}

/// Candle-index bounds of one train/test window pair. Windows of equal
/// size are positioned so the last one ends exactly at the data end,
/// which makes adjacent windows overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WalkForwardSplit {
    pub index: usize,
    pub train_start: usize,
    pub train_end: usize,
    pub test_start: usize,
    pub test_end: usize,
}

/// Metric snapshots for one completed window pair.
#[derive(Debug, Clone, Serialize)]
pub struct WalkForwardPeriod {
    pub index: usize,
    pub train_start: DateTime<Utc>,
    pub train_end: DateTime<Utc>,
    pub test_start: DateTime<Utc>,
    pub test_end: DateTime<Utc>,
    pub train_metrics: Metrics,
    pub test_metrics: Metrics,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DegradationPoint {
    pub index: usize,
    pub train_sharpe: f64,
    pub test_sharpe: f64,
    pub train_return: f64,
    pub test_return: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalkForwardResult {
    pub strategy_name: String,
    pub symbol: String,
    pub n_splits: usize,
    pub periods: Vec<WalkForwardPeriod>,
    pub mean_train_sharpe: f64,
    pub mean_test_sharpe: f64,
    pub mean_train_return: f64,
    pub mean_test_return: f64,
    pub robustness_ratio: f64,
    pub overfitting_score: f64,
}

impl WalkForwardResult {
    /// Per-period train/test metric pairs, for plotting degradation.
    pub fn degradation_curve(&self) -> Vec<DegradationPoint> {
        self.periods
            .iter()
            .map(|p| DegradationPoint {
                index: p.index,
                train_sharpe: p.train_metrics.sharpe_ratio,
                test_sharpe: p.test_metrics.sharpe_ratio,
                train_return: p.train_metrics.total_return_pct,
                test_return: p.test_metrics.total_return_pct,
            })
            .collect()
    }

    pub fn to_dict(&self) -> Result<serde_json::Value, SimError> {
        Ok(serde_json::to_value(self)?)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WalkForwardAnalyzer;

impl WalkForwardAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Window bounds for `total` candles. Window size is `total/n_splits`;
    /// starts are spread so the last window ends at the data end.
    pub fn create_splits(
        &self,
        total: usize,
        config: &WalkForwardConfig,
    ) -> Result<Vec<WalkForwardSplit>, SimError> {
        let n_splits = config.n_splits;
        if n_splits == 0 || total < 2 * n_splits {
            return Err(SimError::InsufficientCandles {
                got: total,
                required: 2 * n_splits.max(1),
                context: "walk-forward splitting".to_string(),
            });
        }

        let window = total / n_splits;
        let train_len = (window as f64 * config.train_size) as usize;
        if train_len == 0 || train_len >= window {
            return Err(SimError::InsufficientCandles {
                got: window,
                required: 2,
                context: "walk-forward window too small to split".to_string(),
            });
        }

        let mut splits = Vec::with_capacity(n_splits);
        for i in 0..n_splits {
            let start = if n_splits == 1 {
                0
            } else {
                i * (total - window) / (n_splits - 1)
            };
            splits.push(WalkForwardSplit {
                index: i,
                train_start: start,
                train_end: start + train_len,
                test_start: start + train_len,
                test_end: start + window,
            });
        }
        Ok(splits)
    }

    /// Run every train/test sub-window independently with fresh capital.
    /// A failing sub-window run is folded in as a zero-metrics period.
    #[instrument(skip(self, candles, strategy, config), fields(candles = candles.len()))]
    pub fn run_walk_forward(
        &self,
        candles: &[Candle],
        strategy: &mut dyn Strategy,
        symbol: &str,
        strategy_name: &str,
        config: &WalkForwardConfig,
    ) -> Result<WalkForwardResult, SimError> {
        let splits = self.create_splits(candles.len(), config)?;
        info!(n_splits = splits.len(), "Running walk-forward analysis");

        let mut periods = Vec::with_capacity(splits.len());
        for split in &splits {
            let train = &candles[split.train_start..split.train_end];
            let test = &candles[split.test_start..split.test_end];

            let train_metrics = self.run_window(train, strategy, symbol, strategy_name, config);
            let test_metrics = self.run_window(test, strategy, symbol, strategy_name, config);

            periods.push(WalkForwardPeriod {
                index: split.index,
                train_start: train[0].timestamp,
                train_end: train[train.len() - 1].timestamp,
                test_start: test[0].timestamp,
                test_end: test[test.len() - 1].timestamp,
                train_metrics,
                test_metrics,
            });
        }

        let mean_train_sharpe =
            math::mean(&periods.iter().map(|p| p.train_metrics.sharpe_ratio).collect::<Vec<_>>());
        let mean_test_sharpe =
            math::mean(&periods.iter().map(|p| p.test_metrics.sharpe_ratio).collect::<Vec<_>>());
        let mean_train_return = math::mean(
            &periods.iter().map(|p| p.train_metrics.total_return_pct).collect::<Vec<_>>(),
        );
        let mean_test_return = math::mean(
            &periods.iter().map(|p| p.test_metrics.total_return_pct).collect::<Vec<_>>(),
        );

        let robustness_ratio = if mean_train_sharpe != 0.0 {
            mean_test_sharpe / mean_train_sharpe
        } else if mean_test_sharpe >= 0.0 {
            1.0
        } else {
            0.0
        };

        let overfitting_score = if mean_train_return <= 0.0 {
            0.0
        } else {
            (1.0 - mean_test_return / mean_train_return).max(0.0)
        };

        info!(
            robustness = robustness_ratio,
            overfitting = overfitting_score,
            "Walk-forward analysis complete"
        );

        Ok(WalkForwardResult {
            strategy_name: strategy_name.to_string(),
            symbol: symbol.to_string(),
            n_splits: config.n_splits,
            periods,
            mean_train_sharpe,
            mean_test_sharpe,
            mean_train_return,
            mean_test_return,
            robustness_ratio,
            overfitting_score,
        })
    }

    fn run_window(
        &self,
        window: &[Candle],
        strategy: &mut dyn Strategy,
        symbol: &str,
        strategy_name: &str,
        config: &WalkForwardConfig,
    ) -> Metrics {
        let first = window[0].timestamp.date_naive();
        let last = window[window.len() - 1].timestamp.date_naive();

        let run_config = BacktestConfig {
            symbol: symbol.to_string(),
            start_date: first.format("%Y-%m-%d").to_string(),
            end_date: last.format("%Y-%m-%d").to_string(),
            initial_capital: config.initial_capital,
            ..BacktestConfig::default()
        };

        let mut engine = BacktestEngine::new();
        engine.load_data(symbol, window.to_vec());

        match engine.run(strategy, &run_config, strategy_name, Default::default()) {
            Ok(result) => result.metrics,
            Err(e) => {
                warn!("Sub-window run failed, recording zero metrics: {e}");
                Metrics::default()
            }
        }
    }
}
