//! Exhaustive grid search over a cartesian parameter space, with optional
//! constraint predicates and a uniformly higher-is-better scoring metric.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::config::BacktestConfig;
use crate::data::candle::Candle;
use crate::engine::metrics::Metrics;
use crate::engine::BacktestEngine;
use crate::error::SimError;
use crate::strategy::Strategy;

/// One point in the parameter space.
pub type ParamSet = BTreeMap<String, f64>;

/// Constructs a fresh strategy for one parameter combination.
pub type StrategyFactory = dyn Fn(&ParamSet) -> Box<dyn Strategy> + Sync;

/// Scoring metric for ranking combinations. Drawdown is negated so that
/// higher is better for every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMetric {
    SharpeRatio,
    SortinoRatio,
    TotalReturn,
    CalmarRatio,
    ProfitFactor,
    WinRate,
    MaxDrawdown,
}

impl OptimizationMetric {
    pub fn score(&self, metrics: &Metrics) -> f64 {
        match self {
            Self::SharpeRatio => metrics.sharpe_ratio,
            Self::SortinoRatio => metrics.sortino_ratio,
            Self::TotalReturn => metrics.total_return_pct,
            Self::CalmarRatio => metrics.calmar_ratio,
            Self::ProfitFactor => metrics.profit_factor,
            Self::WinRate => metrics.win_rate,
            Self::MaxDrawdown => -metrics.max_drawdown,
        }
    }
}

impl FromStr for OptimizationMetric {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sharpe" | "sharpe_ratio" => Ok(Self::SharpeRatio),
            "sortino" | "sortino_ratio" => Ok(Self::SortinoRatio),
            "return" | "total_return" => Ok(Self::TotalReturn),
            "calmar" | "calmar_ratio" => Ok(Self::CalmarRatio),
            "profit_factor" => Ok(Self::ProfitFactor),
            "win_rate" => Ok(Self::WinRate),
            "drawdown" | "max_drawdown" => Ok(Self::MaxDrawdown),
            other => Err(SimError::UnknownMetric(other.to_string())),
        }
    }
}

impl fmt::Display for OptimizationMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SharpeRatio => "sharpe_ratio",
            Self::SortinoRatio => "sortino_ratio",
            Self::TotalReturn => "total_return",
            Self::CalmarRatio => "calmar_ratio",
            Self::ProfitFactor => "profit_factor",
            Self::WinRate => "win_rate",
            Self::MaxDrawdown => "max_drawdown",
        };
        write!(f, "{name}")
    }
}

/// One attempted combination: its score, or a failure reason with score
/// pinned to negative infinity.
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub params: ParamSet,
    pub score: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    pub metric: OptimizationMetric,
    pub best_params: ParamSet,
    pub best_score: f64,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub total_combinations: usize,
    pub valid_combinations: usize,
    pub duration_seconds: f64,
}

/// Score range observed when varying one parameter around the best
/// combination.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SensitivityRange {
    pub min_score: f64,
    pub max_score: f64,
    pub range: f64,
}

/// 2D score grid over two chosen parameters.
#[derive(Debug, Clone, Serialize)]
pub struct HeatmapData {
    pub x_values: Vec<f64>,
    pub y_values: Vec<f64>,
    /// `scores[y][x]`, `None` where no combination matched.
    pub scores: Vec<Vec<Option<f64>>>,
}

impl OptimizationResult {
    /// Leaderboard sorted descending by score, or by the value of the
    /// named parameter.
    pub fn parameter_matrix(&self, sort_by: &str) -> Vec<LeaderboardEntry> {
        let mut entries = self.leaderboard.clone();
        if sort_by == "score" {
            entries.sort_by(|a, b| {
                b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
            });
        } else {
            entries.sort_by(|a, b| {
                let av = a.params.get(sort_by).copied().unwrap_or(f64::NAN);
                let bv = b.params.get(sort_by).copied().unwrap_or(f64::NAN);
                av.partial_cmp(&bv).unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        entries
    }

    /// Score grid for exactly two parameters. Cells with several matching
    /// combinations keep the highest score.
    pub fn heatmap_data(&self, x_param: &str, y_param: &str) -> HeatmapData {
        let mut x_values: Vec<f64> = Vec::new();
        let mut y_values: Vec<f64> = Vec::new();
        for entry in &self.leaderboard {
            if let Some(&x) = entry.params.get(x_param) {
                if !x_values.contains(&x) {
                    x_values.push(x);
                }
            }
            if let Some(&y) = entry.params.get(y_param) {
                if !y_values.contains(&y) {
                    y_values.push(y);
                }
            }
        }
        x_values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        y_values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let mut scores = vec![vec![None; x_values.len()]; y_values.len()];
        for entry in &self.leaderboard {
            if entry.error.is_some() {
                continue;
            }
            let (Some(&x), Some(&y)) = (entry.params.get(x_param), entry.params.get(y_param))
            else {
                continue;
            };
            let (Some(xi), Some(yi)) = (
                x_values.iter().position(|v| *v == x),
                y_values.iter().position(|v| *v == y),
            ) else {
                continue;
            };
            let cell = &mut scores[yi][xi];
            if cell.map_or(true, |existing| entry.score > existing) {
                *cell = Some(entry.score);
            }
        }

        HeatmapData {
            x_values,
            y_values,
            scores,
        }
    }

    /// For each parameter, the score range across combinations that differ
    /// from the best one only in that parameter.
    pub fn sensitivity_analysis(&self) -> BTreeMap<String, SensitivityRange> {
        let mut out = BTreeMap::new();
        if self.best_params.is_empty() {
            return out;
        }

        for name in self.best_params.keys() {
            let scores: Vec<f64> = self
                .leaderboard
                .iter()
                .filter(|e| e.error.is_none())
                .filter(|e| {
                    e.params
                        .iter()
                        .all(|(k, v)| k == name || self.best_params.get(k) == Some(v))
                })
                .map(|e| e.score)
                .collect();

            if let (Some(&min), Some(&max)) = (
                scores
                    .iter()
                    .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)),
                scores
                    .iter()
                    .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)),
            ) {
                out.insert(
                    name.clone(),
                    SensitivityRange {
                        min_score: min,
                        max_score: max,
                        range: max - min,
                    },
                );
            }
        }
        out
    }

    pub fn to_dict(&self) -> Result<serde_json::Value, SimError> {
        Ok(serde_json::to_value(self)?)
    }
}

type Constraint = Box<dyn Fn(&ParamSet) -> bool + Send + Sync>;

/// Registers parameter value lists and constraint predicates, then runs
/// the engine once per valid combination.
#[derive(Default)]
pub struct ParameterOptimizer {
    parameters: Vec<(String, Vec<f64>)>,
    constraints: Vec<Constraint>,
}

impl ParameterOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_parameter(&mut self, name: &str, values: Vec<f64>) -> &mut Self {
        self.parameters.push((name.to_string(), values));
        self
    }

    pub fn add_constraint<F>(&mut self, predicate: F) -> &mut Self
    where
        F: Fn(&ParamSet) -> bool + Send + Sync + 'static,
    {
        self.constraints.push(Box::new(predicate));
        self
    }

    /// Cartesian product of all registered value lists, in registration
    /// order, before constraint filtering.
    pub fn parameter_space(&self) -> Vec<ParamSet> {
        let mut space = vec![ParamSet::new()];
        for (name, values) in &self.parameters {
            let mut next = Vec::with_capacity(space.len() * values.len());
            for combo in &space {
                for &value in values {
                    let mut extended = combo.clone();
                    extended.insert(name.clone(), value);
                    next.push(extended);
                }
            }
            space = next;
        }
        space
    }

    /// Run one backtest per constraint-valid combination and rank the
    /// results. A combination whose run fails is kept in the leaderboard
    /// with a negative-infinity score and never becomes the best.
    #[instrument(skip_all, fields(symbol, metric = %metric))]
    pub fn grid_search(
        &self,
        candles: &[Candle],
        symbol: &str,
        strategy_factory: &StrategyFactory,
        initial_capital: f64,
        metric: OptimizationMetric,
        start_date: &str,
        end_date: &str,
    ) -> Result<OptimizationResult, SimError> {
        if candles.is_empty() {
            return Err(SimError::EmptyDataset);
        }

        let clock = Instant::now();
        let space = self.parameter_space();
        let total_combinations = space.len();

        let valid: Vec<ParamSet> = space
            .into_iter()
            .filter(|params| {
                let ok = self.constraints.iter().all(|c| c(params));
                if !ok {
                    debug!(?params, "Combination rejected by constraint");
                }
                ok
            })
            .collect();
        let valid_combinations = valid.len();

        info!(
            total = total_combinations,
            valid = valid_combinations,
            "Running grid search"
        );

        let mut engine = BacktestEngine::new();
        engine.load_data(symbol, candles.to_vec());
        let engine = &engine;

        let config = BacktestConfig {
            symbol: symbol.to_string(),
            start_date: start_date.to_string(),
            end_date: end_date.to_string(),
            initial_capital,
            ..BacktestConfig::default()
        };

        let leaderboard: Vec<LeaderboardEntry> = valid
            .into_par_iter()
            .map(|params| {
                let mut strategy = strategy_factory(&params);
                match engine.run(strategy.as_mut(), &config, "grid_search", params.clone()) {
                    Ok(result) => LeaderboardEntry {
                        params,
                        score: metric.score(&result.metrics),
                        error: None,
                    },
                    Err(e) => LeaderboardEntry {
                        params,
                        score: f64::NEG_INFINITY,
                        error: Some(e.to_string()),
                    },
                }
            })
            .collect();

        // Strict > keeps the earliest-found combination on ties
        let mut best_params = ParamSet::new();
        let mut best_score = f64::NEG_INFINITY;
        for entry in &leaderboard {
            if entry.error.is_none() && entry.score > best_score {
                best_score = entry.score;
                best_params = entry.params.clone();
            }
        }

        info!(best_score, "Grid search complete");

        Ok(OptimizationResult {
            metric,
            best_params,
            best_score,
            leaderboard,
            total_combinations,
            valid_combinations,
            duration_seconds: clock.elapsed().as_secs_f64(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::SmaCross;
    use chrono::{TimeZone, Utc};

    fn candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                timestamp: Utc.timestamp_millis_opt(i as i64 * 3_600_000).unwrap(),
                open: close,
                high: close,
                low: close,
                close,
                volume: 0.0,
            })
            .collect()
    }

    fn sma_factory(params: &ParamSet) -> Box<dyn Strategy> {
        let fast = params.get("fast").copied().unwrap_or(3.0) as usize;
        let slow = params.get("slow").copied().unwrap_or(8.0) as usize;
        Box::new(SmaCross::new(fast, slow))
    }

    #[test]
    fn test_metric_parses_from_str() {
        assert_eq!(
            "sharpe".parse::<OptimizationMetric>().unwrap(),
            OptimizationMetric::SharpeRatio
        );
        assert_eq!(
            "max_drawdown".parse::<OptimizationMetric>().unwrap(),
            OptimizationMetric::MaxDrawdown
        );
        assert!("nonsense".parse::<OptimizationMetric>().is_err());
    }

    #[test]
    fn test_drawdown_scores_are_negated() {
        let metrics = Metrics {
            max_drawdown: 12.5,
            ..Metrics::default()
        };
        assert_eq!(OptimizationMetric::MaxDrawdown.score(&metrics), -12.5);
    }

    #[test]
    fn test_parameter_space_is_cartesian() {
        let mut optimizer = ParameterOptimizer::new();
        optimizer.add_parameter("fast", vec![2.0, 3.0]);
        optimizer.add_parameter("slow", vec![5.0, 8.0, 13.0]);

        let space = optimizer.parameter_space();
        assert_eq!(space.len(), 6);
        assert!(space.iter().all(|p| p.len() == 2));
    }

    #[test]
    fn test_empty_dataset_is_rejected() {
        let optimizer = ParameterOptimizer::new();
        let err = optimizer.grid_search(
            &[],
            "TEST",
            &sma_factory,
            10_000.0,
            OptimizationMetric::SharpeRatio,
            "1970-01-01",
            "1970-01-10",
        );
        assert!(matches!(err, Err(SimError::EmptyDataset)));
    }

    #[test]
    fn test_best_entry_matches_best_score() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.7).sin() * 10.0).collect();
        let data = candles(&closes);

        let mut optimizer = ParameterOptimizer::new();
        optimizer.add_parameter("fast", vec![2.0, 4.0]);
        optimizer.add_parameter("slow", vec![8.0, 16.0]);

        let result = optimizer
            .grid_search(
                &data,
                "TEST",
                &sma_factory,
                10_000.0,
                OptimizationMetric::TotalReturn,
                "1970-01-01",
                "1970-01-10",
            )
            .unwrap();

        assert_eq!(result.leaderboard.len(), 4);
        let top = result
            .leaderboard
            .iter()
            .map(|e| e.score)
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(top, result.best_score);
        assert!(!result.best_params.is_empty());
    }

    #[test]
    fn test_all_rejecting_constraint_yields_empty_best() {
        let data = candles(&[100.0; 30]);

        let mut optimizer = ParameterOptimizer::new();
        optimizer.add_parameter("fast", vec![2.0, 4.0]);
        optimizer.add_constraint(|_| false);

        let result = optimizer
            .grid_search(
                &data,
                "TEST",
                &sma_factory,
                10_000.0,
                OptimizationMetric::SharpeRatio,
                "1970-01-01",
                "1970-01-02",
            )
            .unwrap();

        assert_eq!(result.total_combinations, 2);
        assert_eq!(result.valid_combinations, 0);
        assert!(result.best_params.is_empty());
        assert!(result.leaderboard.is_empty());
    }

    #[test]
    fn test_constraint_filters_combinations() {
        let data = candles(&[100.0; 30]);

        let mut optimizer = ParameterOptimizer::new();
        optimizer.add_parameter("fast", vec![2.0, 5.0, 10.0]);
        optimizer.add_parameter("slow", vec![4.0, 8.0]);
        optimizer.add_constraint(|p| p["fast"] < p["slow"]);

        let result = optimizer
            .grid_search(
                &data,
                "TEST",
                &sma_factory,
                10_000.0,
                OptimizationMetric::SharpeRatio,
                "1970-01-01",
                "1970-01-02",
            )
            .unwrap();

        assert_eq!(result.total_combinations, 6);
        // (2,4), (2,8), (5,8)
        assert_eq!(result.valid_combinations, 3);
    }

    #[test]
    fn test_heatmap_has_axis_sorted_cells() {
        let entries = vec![
            LeaderboardEntry {
                params: ParamSet::from([("a".to_string(), 1.0), ("b".to_string(), 10.0)]),
                score: 0.5,
                error: None,
            },
            LeaderboardEntry {
                params: ParamSet::from([("a".to_string(), 2.0), ("b".to_string(), 10.0)]),
                score: 0.8,
                error: None,
            },
        ];
        let result = OptimizationResult {
            metric: OptimizationMetric::SharpeRatio,
            best_params: entries[1].params.clone(),
            best_score: 0.8,
            leaderboard: entries,
            total_combinations: 2,
            valid_combinations: 2,
            duration_seconds: 0.0,
        };

        let heatmap = result.heatmap_data("a", "b");
        assert_eq!(heatmap.x_values, vec![1.0, 2.0]);
        assert_eq!(heatmap.y_values, vec![10.0]);
        assert_eq!(heatmap.scores[0][0], Some(0.5));
        assert_eq!(heatmap.scores[0][1], Some(0.8));
    }

    #[test]
    fn test_sensitivity_varies_one_parameter() {
        let mk = |a: f64, b: f64, score: f64| LeaderboardEntry {
            params: ParamSet::from([("a".to_string(), a), ("b".to_string(), b)]),
            score,
            error: None,
        };
        let result = OptimizationResult {
            metric: OptimizationMetric::SharpeRatio,
            best_params: ParamSet::from([("a".to_string(), 2.0), ("b".to_string(), 10.0)]),
            best_score: 0.9,
            leaderboard: vec![
                mk(1.0, 10.0, 0.3),
                mk(2.0, 10.0, 0.9),
                mk(1.0, 20.0, 0.1),
                mk(2.0, 20.0, 0.4),
            ],
            total_combinations: 4,
            valid_combinations: 4,
            duration_seconds: 0.0,
        };

        let sensitivity = result.sensitivity_analysis();
        let a = sensitivity["a"];
        assert_eq!(a.min_score, 0.3);
        assert_eq!(a.max_score, 0.9);
        assert!((a.range - 0.6).abs() < 1e-12);
        let b = sensitivity["b"];
        assert_eq!(b.min_score, 0.4);
    }
}
