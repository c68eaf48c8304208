//! Monte Carlo resampling of a completed trade ledger.
//!
//! Works on already-closed trades only, never on the engine itself. Each
//! trial perturbs per-trade P&L with independent noise and replays the
//! ledger sequentially to build an outcome distribution.

use derive_builder::Builder;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, instrument};

use crate::engine::position::Trade;
use crate::error::SimError;
use crate::util::math;

pub const DEFAULT_SEED: u64 = 42;
const HISTOGRAM_BINS: usize = 50;

/// Knobs for a resampling batch. All variances are fractions, applied as
/// `pnl × (1 ± U(variance))` only when greater than zero.
#[derive(Debug, Clone, Builder, Serialize)]
#[builder(setter(into), default)]
pub struct MonteCarloConfig {
    pub n_simulations: usize,
    pub initial_capital: f64,
    pub entry_timing_variance: f64,
    pub exit_price_variance: f64,
    pub position_size_variance: f64,
    pub shuffle_trades: bool,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            n_simulations: 1000,
            initial_capital: 10_000.0,
            entry_timing_variance: 0.0,
            exit_price_variance: 0.0,
            position_size_variance: 0.0,
            shuffle_trades: false,
        }
    }
}

/// Seedable trial driver. Trial `i` draws from a `StdRng` seeded with
/// `seed + i`, so batches are reproducible regardless of thread scheduling.
#[derive(Debug, Clone, Copy)]
pub struct MonteCarloSimulator {
    seed: u64,
}

impl Default for MonteCarloSimulator {
    fn default() -> Self {
        Self { seed: DEFAULT_SEED }
    }
}

impl MonteCarloSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }

    /// Resample the ledger `n_simulations` times and summarize the
    /// distribution of percentage returns.
    #[instrument(skip(self, trades, config), fields(trades = trades.len(), sims = config.n_simulations))]
    pub fn run_simulation(
        &self,
        trades: &[Trade],
        config: &MonteCarloConfig,
    ) -> Result<MonteCarloResult, SimError> {
        if trades.is_empty() {
            return Err(SimError::EmptyTradeList);
        }

        let pnls: Vec<f64> = trades.iter().map(|t| t.pnl).collect();

        let final_capitals: Vec<f64> = (0..config.n_simulations)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(i as u64));
                self.run_trial(&pnls, config, &mut rng)
            })
            .collect();

        let returns: Vec<f64> = final_capitals
            .iter()
            .map(|c| (c - config.initial_capital) / config.initial_capital * 100.0)
            .collect();

        let mut sorted_returns = returns.clone();
        sorted_returns.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        info!(
            mean = math::mean(&returns),
            "Monte Carlo batch complete ({} trials)",
            config.n_simulations
        );

        Ok(MonteCarloResult {
            n_simulations: config.n_simulations,
            initial_capital: config.initial_capital,
            returns,
            final_capitals,
            sorted_returns,
        })
    }

    fn run_trial(&self, pnls: &[f64], config: &MonteCarloConfig, rng: &mut StdRng) -> f64 {
        let mut pnls = pnls.to_vec();
        if config.shuffle_trades {
            pnls.shuffle(rng);
        }

        let mut capital = config.initial_capital;
        for pnl in pnls {
            let mut adjusted = pnl;
            if config.entry_timing_variance > 0.0 {
                let v = config.entry_timing_variance;
                adjusted *= 1.0 + rng.gen_range(-v..=v);
            }
            if config.exit_price_variance > 0.0 {
                let v = config.exit_price_variance;
                adjusted *= 1.0 + rng.gen_range(-v..=v);
            }
            if config.position_size_variance > 0.0 {
                let v = config.position_size_variance;
                adjusted *= 1.0 + rng.gen_range(-v..=v);
            }

            capital += adjusted;
            if capital <= 0.0 {
                capital = 0.0;
                break;
            }
        }
        capital
    }

    /// Track the full equity path per trial and report the distribution of
    /// per-trial maximum drawdowns. Uses Gaussian multiplicative noise on
    /// each trade's P&L, independent of the uniform variance knobs.
    #[instrument(skip(self, trades))]
    pub fn run_path_simulation(
        &self,
        trades: &[Trade],
        n_simulations: usize,
        initial_capital: f64,
        noise_sigma: f64,
    ) -> Result<PathSimulationResult, SimError> {
        if trades.is_empty() {
            return Err(SimError::EmptyTradeList);
        }

        let pnls: Vec<f64> = trades.iter().map(|t| t.pnl).collect();
        let normal = Normal::new(1.0, noise_sigma)
            .map_err(|e| SimError::ConfigError(format!("bad noise sigma: {e}")))?;

        let trials: Vec<(f64, f64)> = (0..n_simulations)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(i as u64));
                let mut capital = initial_capital;
                let mut peak = initial_capital;
                let mut max_dd = 0.0_f64;

                for &pnl in &pnls {
                    capital += pnl * normal.sample(&mut rng);
                    if capital <= 0.0 {
                        capital = 0.0;
                        max_dd = 100.0;
                        break;
                    }
                    if capital > peak {
                        peak = capital;
                    } else if peak > 0.0 {
                        max_dd = max_dd.max((peak - capital) / peak * 100.0);
                    }
                }
                (max_dd, capital)
            })
            .collect();

        let max_drawdowns: Vec<f64> = trials.iter().map(|t| t.0).collect();
        let final_capitals: Vec<f64> = trials.iter().map(|t| t.1).collect();

        let mut sorted_dd = max_drawdowns.clone();
        sorted_dd.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        Ok(PathSimulationResult {
            mean_max_drawdown: math::mean(&max_drawdowns),
            median_max_drawdown: math::percentile(&sorted_dd, 0.5),
            p95_max_drawdown: math::percentile(&sorted_dd, 0.95),
            worst_drawdown: sorted_dd.last().copied().unwrap_or(0.0),
            max_drawdowns,
            final_capitals,
        })
    }
}

/// Distribution of per-trial maximum drawdowns from `run_path_simulation`.
#[derive(Debug, Clone, Serialize)]
pub struct PathSimulationResult {
    pub mean_max_drawdown: f64,
    pub median_max_drawdown: f64,
    pub p95_max_drawdown: f64,
    pub worst_drawdown: f64,
    pub max_drawdowns: Vec<f64>,
    pub final_capitals: Vec<f64>,
}

/// One histogram bucket over the return distribution.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct HistogramBin {
    pub low: f64,
    pub high: f64,
    pub count: usize,
}

/// Outcome distribution of a resampling batch. Read-only after
/// construction; every query below is a pure function of the stored
/// return array.
#[derive(Debug, Clone, Serialize)]
pub struct MonteCarloResult {
    pub n_simulations: usize,
    pub initial_capital: f64,
    /// Percentage returns in trial order.
    pub returns: Vec<f64>,
    pub final_capitals: Vec<f64>,
    /// Percentage returns sorted ascending.
    pub sorted_returns: Vec<f64>,
}

impl MonteCarloResult {
    pub fn mean_return(&self) -> f64 {
        math::mean(&self.returns)
    }

    pub fn std_return(&self) -> f64 {
        math::std_deviation(&self.returns).unwrap_or(0.0)
    }

    pub fn median_return(&self) -> f64 {
        math::percentile(&self.sorted_returns, 0.5)
    }

    pub fn percentile(&self, pct: f64) -> f64 {
        math::percentile(&self.sorted_returns, pct)
    }

    pub fn min_return(&self) -> f64 {
        self.sorted_returns.first().copied().unwrap_or(0.0)
    }

    pub fn max_return(&self) -> f64 {
        self.sorted_returns.last().copied().unwrap_or(0.0)
    }

    /// Return at the `(1 - confidence)` percentile of the distribution.
    pub fn value_at_risk(&self, confidence: f64) -> f64 {
        math::percentile(&self.sorted_returns, 1.0 - confidence)
    }

    /// Mean of all returns at or below the VaR cutoff.
    pub fn expected_shortfall(&self, confidence: f64) -> f64 {
        let var = self.value_at_risk(confidence);
        let tail: Vec<f64> = self
            .sorted_returns
            .iter()
            .copied()
            .take_while(|r| *r <= var)
            .collect();
        math::mean(&tail)
    }

    /// Fraction of trials losing more than `threshold` (a fraction of
    /// initial capital, e.g. 0.10 for a 10% loss).
    pub fn probability_of_loss(&self, threshold: f64) -> f64 {
        if self.returns.is_empty() {
            return 0.0;
        }
        let cutoff = -threshold * 100.0;
        self.returns.iter().filter(|r| **r < cutoff).count() as f64 / self.returns.len() as f64
    }

    /// Fraction of trials gaining more than `threshold`.
    pub fn probability_of_profit(&self, threshold: f64) -> f64 {
        if self.returns.is_empty() {
            return 0.0;
        }
        let cutoff = threshold * 100.0;
        self.returns.iter().filter(|r| **r > cutoff).count() as f64 / self.returns.len() as f64
    }

    /// Symmetric percentile bounds around the median.
    pub fn confidence_interval(&self, confidence: f64) -> (f64, f64) {
        let tail = (1.0 - confidence) / 2.0;
        (
            math::percentile(&self.sorted_returns, tail),
            math::percentile(&self.sorted_returns, 1.0 - tail),
        )
    }

    /// Third standardized moment of the return distribution.
    pub fn skewness(&self) -> f64 {
        self.standardized_moment(3)
    }

    /// Excess kurtosis (fourth standardized moment minus 3).
    pub fn kurtosis(&self) -> f64 {
        let m4 = self.standardized_moment(4);
        if m4 == 0.0 {
            0.0
        } else {
            m4 - 3.0
        }
    }

    fn standardized_moment(&self, order: i32) -> f64 {
        let n = self.returns.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.mean_return();
        let std = self.std_return();
        if std == 0.0 {
            return 0.0;
        }
        self.returns
            .iter()
            .map(|r| ((r - mean) / std).powi(order))
            .sum::<f64>()
            / n as f64
    }

    /// 50 equal-width bins over `[min, max]` of the returns.
    pub fn histogram(&self) -> Vec<HistogramBin> {
        if self.sorted_returns.is_empty() {
            return Vec::new();
        }

        let min = self.min_return();
        let max = self.max_return();
        let width = (max - min) / HISTOGRAM_BINS as f64;

        if width == 0.0 {
            return vec![HistogramBin {
                low: min,
                high: max,
                count: self.returns.len(),
            }];
        }

        let mut bins: Vec<HistogramBin> = (0..HISTOGRAM_BINS)
            .map(|i| HistogramBin {
                low: min + i as f64 * width,
                high: min + (i + 1) as f64 * width,
                count: 0,
            })
            .collect();

        for &r in &self.returns {
            let idx = (((r - min) / width) as usize).min(HISTOGRAM_BINS - 1);
            bins[idx].count += 1;
        }
        bins
    }

    /// JSON summary of the distribution.
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "n_simulations": self.n_simulations,
            "initial_capital": self.initial_capital,
            "mean_return": self.mean_return(),
            "std_return": self.std_return(),
            "median_return": self.median_return(),
            "min_return": self.min_return(),
            "max_return": self.max_return(),
            "percentiles": {
                "p10": self.percentile(0.10),
                "p25": self.percentile(0.25),
                "p50": self.percentile(0.50),
                "p75": self.percentile(0.75),
                "p90": self.percentile(0.90),
            },
            "value_at_risk_95": self.value_at_risk(0.95),
            "expected_shortfall_95": self.expected_shortfall(0.95),
            "probability_of_profit": self.probability_of_profit(0.0),
            "skewness": self.skewness(),
            "kurtosis": self.kurtosis(),
        })
    }

    /// Plain-text report for console output.
    pub fn to_text(&self) -> String {
        use std::fmt::Write as _;

        let (ci_low, ci_high) = self.confidence_interval(0.95);
        let mut out = String::new();
        let _ = writeln!(out, "\nMONTE CARLO SIMULATION: {} trials", self.n_simulations);
        let _ = writeln!(out, "{}", "=".repeat(60));
        let _ = writeln!(out, "\nRETURN DISTRIBUTION:");
        let _ = writeln!(out, "  Mean Return: {:+.2}%", self.mean_return());
        let _ = writeln!(out, "  Std Deviation: {:.2}%", self.std_return());
        let _ = writeln!(out, "  Median Return: {:+.2}%", self.median_return());
        let _ = writeln!(
            out,
            "  Range: {:+.2}% to {:+.2}%",
            self.min_return(),
            self.max_return()
        );
        let _ = writeln!(out, "\nPERCENTILES:");
        let _ = writeln!(
            out,
            "  P10: {:+.2}%   P25: {:+.2}%   P50: {:+.2}%   P75: {:+.2}%   P90: {:+.2}%",
            self.percentile(0.10),
            self.percentile(0.25),
            self.percentile(0.50),
            self.percentile(0.75),
            self.percentile(0.90)
        );
        let _ = writeln!(out, "\nRISK:");
        let _ = writeln!(out, "  VaR (95%): {:+.2}%", self.value_at_risk(0.95));
        let _ = writeln!(
            out,
            "  Expected Shortfall (95%): {:+.2}%",
            self.expected_shortfall(0.95)
        );
        let _ = writeln!(
            out,
            "  95% Confidence Interval: [{ci_low:+.2}%, {ci_high:+.2}%]"
        );
        let _ = writeln!(
            out,
            "  Probability of Profit: {:.1}%",
            self.probability_of_profit(0.0) * 100.0
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::position::OrderSide;
    use chrono::{TimeZone, Utc};

    fn trades_with_pnls(pnls: &[f64]) -> Vec<Trade> {
        pnls.iter()
            .enumerate()
            .map(|(i, &pnl)| Trade {
                id: format!("t_{}", i + 1),
                timestamp: Utc.timestamp_millis_opt(i as i64 * 3_600_000).unwrap(),
                side: OrderSide::Sell,
                price: 100.0,
                quantity: 1.0,
                value: 100.0,
                fee: 0.0,
                pnl,
                cumulative_pnl: 0.0,
                position_after: 0.0,
                reason: String::new(),
            })
            .collect()
    }

    #[test]
    fn test_empty_trade_list_is_rejected() {
        let sim = MonteCarloSimulator::new();
        let config = MonteCarloConfig::default();
        assert!(matches!(
            sim.run_simulation(&[], &config),
            Err(SimError::EmptyTradeList)
        ));
    }

    #[test]
    fn test_no_noise_is_a_passthrough() {
        let sim = MonteCarloSimulator::new();
        let trades = trades_with_pnls(&[100.0, -50.0, 200.0]);
        let config = MonteCarloConfigBuilder::default()
            .n_simulations(20usize)
            .initial_capital(10_000.0)
            .build()
            .unwrap();

        let result = sim.run_simulation(&trades, &config).unwrap();
        for &capital in &result.final_capitals {
            assert_eq!(capital, 10_250.0);
        }
        assert_eq!(result.std_return(), 0.0);
    }

    #[test]
    fn test_same_seed_same_results() {
        let trades = trades_with_pnls(&[100.0, -50.0, 200.0, -120.0]);
        let config = MonteCarloConfigBuilder::default()
            .n_simulations(50usize)
            .exit_price_variance(0.2)
            .shuffle_trades(true)
            .build()
            .unwrap();

        let a = MonteCarloSimulator::with_seed(7)
            .run_simulation(&trades, &config)
            .unwrap();
        let b = MonteCarloSimulator::with_seed(7)
            .run_simulation(&trades, &config)
            .unwrap();

        assert_eq!(a.returns, b.returns);
    }

    #[test]
    fn test_percentiles_are_monotonic() {
        let trades = trades_with_pnls(&[500.0, -300.0, 200.0, -100.0, 400.0]);
        let config = MonteCarloConfigBuilder::default()
            .n_simulations(200usize)
            .position_size_variance(0.3)
            .shuffle_trades(true)
            .build()
            .unwrap();

        let result = MonteCarloSimulator::new()
            .run_simulation(&trades, &config)
            .unwrap();

        let p10 = result.percentile(0.10);
        let p25 = result.percentile(0.25);
        let p50 = result.percentile(0.50);
        let p75 = result.percentile(0.75);
        let p90 = result.percentile(0.90);
        assert!(p10 <= p25 && p25 <= p50 && p50 <= p75 && p75 <= p90);
    }

    #[test]
    fn test_capital_is_clamped_at_zero() {
        let trades = trades_with_pnls(&[-20_000.0, 5_000.0]);
        let config = MonteCarloConfigBuilder::default()
            .n_simulations(5usize)
            .build()
            .unwrap();

        let result = MonteCarloSimulator::new()
            .run_simulation(&trades, &config)
            .unwrap();

        // Blown up on trade one, later trades skipped
        for &capital in &result.final_capitals {
            assert_eq!(capital, 0.0);
        }
    }

    #[test]
    fn test_probability_thresholds_are_ordered() {
        let trades = trades_with_pnls(&[500.0, -800.0, 300.0, -200.0]);
        let config = MonteCarloConfigBuilder::default()
            .n_simulations(300usize)
            .exit_price_variance(0.5)
            .shuffle_trades(true)
            .build()
            .unwrap();

        let result = MonteCarloSimulator::new()
            .run_simulation(&trades, &config)
            .unwrap();

        // Deeper losses can never be more likely than shallower ones
        assert!(result.probability_of_loss(0.10) >= result.probability_of_loss(0.20));
        assert!(result.probability_of_profit(0.0) >= result.probability_of_profit(0.05));
    }

    #[test]
    fn test_histogram_counts_every_trial() {
        let trades = trades_with_pnls(&[500.0, -300.0, 200.0]);
        let config = MonteCarloConfigBuilder::default()
            .n_simulations(100usize)
            .exit_price_variance(0.3)
            .build()
            .unwrap();

        let result = MonteCarloSimulator::new()
            .run_simulation(&trades, &config)
            .unwrap();

        let total: usize = result.histogram().iter().map(|b| b.count).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_degenerate_histogram_single_bin() {
        let trades = trades_with_pnls(&[100.0]);
        let config = MonteCarloConfigBuilder::default()
            .n_simulations(10usize)
            .build()
            .unwrap();

        let result = MonteCarloSimulator::new()
            .run_simulation(&trades, &config)
            .unwrap();

        let histogram = result.histogram();
        assert_eq!(histogram.len(), 1);
        assert_eq!(histogram[0].count, 10);
    }

    #[test]
    fn test_path_simulation_reports_drawdowns() {
        let trades = trades_with_pnls(&[500.0, -400.0, 600.0, -300.0]);
        let result = MonteCarloSimulator::new()
            .run_path_simulation(&trades, 50, 10_000.0, 0.1)
            .unwrap();

        assert_eq!(result.max_drawdowns.len(), 50);
        assert!(result.mean_max_drawdown >= 0.0);
        assert!(result.worst_drawdown >= result.median_max_drawdown);
    }

    #[test]
    fn test_confidence_interval_brackets_median() {
        let trades = trades_with_pnls(&[500.0, -300.0, 200.0, -100.0]);
        let config = MonteCarloConfigBuilder::default()
            .n_simulations(200usize)
            .position_size_variance(0.4)
            .shuffle_trades(true)
            .build()
            .unwrap();

        let result = MonteCarloSimulator::new()
            .run_simulation(&trades, &config)
            .unwrap();

        let (low, high) = result.confidence_interval(0.9);
        assert!(low <= result.median_return());
        assert!(result.median_return() <= high);
    }
}
