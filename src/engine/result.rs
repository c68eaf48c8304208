use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::BacktestConfig;
use crate::engine::metrics::{DrawdownPoint, EquityPoint, Metrics};
use crate::engine::position::Trade;
use crate::error::SimError;

/// Complete output of a single simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub config: BacktestConfig,
    pub metrics: Metrics,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub drawdown_curve: Vec<DrawdownPoint>,
    pub final_capital: f64,
    pub total_fees: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub strategy_name: String,
    pub parameters: BTreeMap<String, f64>,
}

/// Deviation of realized trading from the simulated expectation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveComparison {
    pub backtest_return: f64,
    pub live_return: f64,
    pub deviation: f64,
    pub deviation_pct: f64,
    pub backtest_trades: usize,
    pub live_trades: usize,
    pub backtest_win_rate: f64,
    pub live_win_rate: f64,
}

impl BacktestResult {
    pub fn to_json(&self) -> Result<serde_json::Value, SimError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Write the result as pretty-printed JSON.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), SimError> {
        let mut file = File::create(path.as_ref())?;
        file.write_all(serde_json::to_string_pretty(self)?.as_bytes())?;
        info!("Saved backtest result to {}", path.as_ref().display());
        Ok(())
    }

    /// Plain-text report for console output.
    pub fn to_text(&self) -> String {
        use std::fmt::Write as _;

        let m = &self.metrics;
        let mut out = String::new();
        let _ = writeln!(out, "\nBACKTEST REPORT: {}", self.strategy_name);
        let _ = writeln!(out, "{}", "=".repeat(60));
        let _ = writeln!(out, "\nCONFIGURATION:");
        let _ = writeln!(out, "  Symbol: {}", self.config.symbol);
        let _ = writeln!(
            out,
            "  Period: {} to {}",
            self.config.start_date, self.config.end_date
        );
        let _ = writeln!(out, "  Initial Capital: ${:.2}", self.config.initial_capital);
        let _ = writeln!(out, "  Fee Rate: {:.2}%", self.config.fee_rate * 100.0);
        let _ = writeln!(out, "\nPERFORMANCE:");
        let _ = writeln!(
            out,
            "  Total Return: ${:+.2} ({:+.2}%)",
            m.total_return, m.total_return_pct
        );
        let _ = writeln!(out, "  Annualized Return: {:+.2}%", m.annualized_return);
        let _ = writeln!(out, "  Final Capital: ${:.2}", self.final_capital);
        let _ = writeln!(out, "\nRISK METRICS:");
        let _ = writeln!(out, "  Sharpe Ratio: {:.2}", m.sharpe_ratio);
        let _ = writeln!(out, "  Sortino Ratio: {:.2}", m.sortino_ratio);
        let _ = writeln!(out, "  Calmar Ratio: {:.2}", m.calmar_ratio);
        let _ = writeln!(out, "  Max Drawdown: {:.2}%", m.max_drawdown);
        let _ = writeln!(out, "  Recovery Factor: {:.2}", m.recovery_factor);
        let _ = writeln!(out, "\nTRADE STATISTICS:");
        let _ = writeln!(out, "  Total Trades: {}", m.total_trades);
        let _ = writeln!(out, "  Winning Trades: {}", m.winning_trades);
        let _ = writeln!(out, "  Losing Trades: {}", m.losing_trades);
        let _ = writeln!(out, "  Win Rate: {:.1}%", m.win_rate);
        let _ = writeln!(out, "  Profit Factor: {:.2}", m.profit_factor);
        let _ = writeln!(out, "  Expectancy: ${:.2}", m.expectancy);
        let _ = writeln!(out, "\n  Avg Win: ${:+.2}", m.avg_win);
        let _ = writeln!(out, "  Avg Loss: ${:+.2}", m.avg_loss);
        let _ = writeln!(out, "  Largest Win: ${:+.2}", m.largest_win);
        let _ = writeln!(out, "  Largest Loss: ${:+.2}", m.largest_loss);
        let _ = writeln!(out, "\nEXECUTION:");
        let _ = writeln!(out, "  Total Fees Paid: ${:.2}", self.total_fees);
        let _ = writeln!(out, "  Backtest Duration: {:.2}s", self.duration_seconds);
        out
    }

    /// Compare simulated performance with realized per-trade P&L.
    pub fn compare_with_live(&self, live_pnls: &[f64]) -> LiveComparison {
        let live_pnl: f64 = live_pnls.iter().sum();
        let initial = self.config.initial_capital;
        let live_return = if initial != 0.0 {
            live_pnl / initial * 100.0
        } else {
            0.0
        };

        let backtest_return = self.metrics.total_return_pct;
        let deviation = backtest_return - live_return;
        let deviation_pct = if backtest_return != 0.0 {
            deviation / backtest_return.abs() * 100.0
        } else {
            0.0
        };

        let live_win_rate = if live_pnls.is_empty() {
            0.0
        } else {
            live_pnls.iter().filter(|p| **p > 0.0).count() as f64 / live_pnls.len() as f64 * 100.0
        };

        LiveComparison {
            backtest_return,
            live_return,
            deviation,
            deviation_pct,
            backtest_trades: self.metrics.total_trades,
            live_trades: live_pnls.len(),
            backtest_win_rate: self.metrics.win_rate,
            live_win_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with_return(total_return_pct: f64, win_rate: f64) -> BacktestResult {
        BacktestResult {
            config: BacktestConfig::default(),
            metrics: Metrics {
                total_return_pct,
                win_rate,
                total_trades: 4,
                ..Metrics::default()
            },
            trades: Vec::new(),
            equity_curve: Vec::new(),
            drawdown_curve: Vec::new(),
            final_capital: 10_000.0,
            total_fees: 0.0,
            start_time: Utc::now(),
            end_time: Utc::now(),
            duration_seconds: 0.0,
            strategy_name: "test".to_string(),
            parameters: BTreeMap::new(),
        }
    }

    #[test]
    fn test_compare_with_live_deviation() {
        let result = result_with_return(10.0, 75.0);
        // 500 pnl on 10k initial is a 5% live return
        let cmp = result.compare_with_live(&[300.0, 300.0, -100.0]);

        assert!((cmp.live_return - 5.0).abs() < 1e-9);
        assert!((cmp.deviation - 5.0).abs() < 1e-9);
        assert!((cmp.deviation_pct - 50.0).abs() < 1e-9);
        assert_eq!(cmp.live_trades, 3);
        assert!((cmp.live_win_rate - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_compare_with_live_zero_backtest_return() {
        let result = result_with_return(0.0, 0.0);
        let cmp = result.compare_with_live(&[]);

        assert_eq!(cmp.deviation_pct, 0.0);
        assert_eq!(cmp.live_win_rate, 0.0);
    }

    #[test]
    fn test_text_report_mentions_key_sections() {
        let result = result_with_return(10.0, 75.0);
        let text = result.to_text();

        assert!(text.contains("BACKTEST REPORT: test"));
        assert!(text.contains("RISK METRICS:"));
        assert!(text.contains("TRADE STATISTICS:"));
    }

    #[test]
    fn test_json_round_trip() {
        let result = result_with_return(10.0, 75.0);
        let value = result.to_json().unwrap();

        assert_eq!(value["strategy_name"], "test");
        assert_eq!(value["metrics"]["total_trades"], 4);
    }
}
