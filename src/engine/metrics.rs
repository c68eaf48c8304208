use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::position::Trade;

/// One equity observation per processed candle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub price: f64,
}

/// Percentage distance below the running equity peak.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DrawdownPoint {
    pub timestamp: DateTime<Utc>,
    pub drawdown: f64,
}

/// Performance metrics derived once at the end of a run from the full
/// equity curve and trade ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Metrics {
    pub total_return: f64,
    pub total_return_pct: f64,
    pub annualized_return: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Percentage, positive.
    pub max_drawdown: f64,
    /// Longest consecutive under-peak run, in candles.
    pub max_drawdown_duration: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub recovery_factor: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub expectancy: f64,
    pub calmar_ratio: f64,
    pub volatility: f64,
}

impl Metrics {
    /// Compute the full metric set. Returns all-zero metrics when the
    /// equity curve is empty.
    pub fn compute(
        equity_curve: &[EquityPoint],
        trades: &[Trade],
        initial_capital: f64,
        final_capital: f64,
    ) -> Self {
        if equity_curve.is_empty() {
            return Self::default();
        }

        let total_return = final_capital - initial_capital;
        let total_return_pct = if initial_capital != 0.0 {
            total_return / initial_capital * 100.0
        } else {
            0.0
        };

        // Per-step returns from consecutive equity values
        let equities: Vec<f64> = equity_curve.iter().map(|e| e.equity).collect();
        let mut returns = Vec::with_capacity(equities.len().saturating_sub(1));
        for pair in equities.windows(2) {
            if pair[0] > 0.0 {
                returns.push((pair[1] - pair[0]) / pair[0]);
            }
        }

        let (avg_return, std_return, sharpe_ratio) = if returns.len() > 1 {
            let avg = returns.iter().sum::<f64>() / returns.len() as f64;
            let std = (returns.iter().map(|r| (r - avg).powi(2)).sum::<f64>()
                / returns.len() as f64)
                .sqrt();
            let sharpe = if std > 0.0 {
                avg / std * 252.0_f64.sqrt()
            } else {
                0.0
            };
            (avg, std, sharpe)
        } else {
            (0.0, 0.0, 0.0)
        };

        // Sortino penalizes downside volatility only
        let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        let sortino_ratio = if !downside.is_empty() {
            let downside_std =
                (downside.iter().map(|r| r * r).sum::<f64>() / downside.len() as f64).sqrt();
            if downside_std > 0.0 {
                avg_return / downside_std * 252.0_f64.sqrt()
            } else {
                0.0
            }
        } else {
            sharpe_ratio
        };

        // Max drawdown against a running peak, duration in candles
        let mut peak = equities[0];
        let mut max_dd = 0.0_f64;
        let mut max_dd_duration = 0usize;
        let mut current_dd_duration = 0usize;
        for &equity in &equities {
            if equity > peak {
                peak = equity;
                current_dd_duration = 0;
            } else {
                if peak > 0.0 {
                    max_dd = max_dd.max((peak - equity) / peak);
                }
                current_dd_duration += 1;
                max_dd_duration = max_dd_duration.max(current_dd_duration);
            }
        }
        let max_drawdown = max_dd * 100.0;

        let total_trades = trades.len();
        let wins: Vec<f64> = trades.iter().map(|t| t.pnl).filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = trades.iter().map(|t| t.pnl).filter(|p| *p < 0.0).collect();
        let winning_trades = wins.len();
        let losing_trades = losses.len();

        // Win rate counts decided trades only, so entries with zero pnl
        // never dilute the ratio
        let decided = winning_trades + losing_trades;
        let win_rate = if decided > 0 {
            winning_trades as f64 / decided as f64 * 100.0
        } else {
            0.0
        };

        let avg_win = if wins.is_empty() {
            0.0
        } else {
            wins.iter().sum::<f64>() / wins.len() as f64
        };
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            losses.iter().sum::<f64>() / losses.len() as f64
        };
        let largest_win = wins.iter().copied().fold(0.0, f64::max);
        let largest_loss = losses.iter().copied().fold(0.0, f64::min);

        let gross_profit: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().sum::<f64>().abs();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else {
            // All-wins case stays finite: the raw win sum
            gross_profit
        };

        let recovery_factor = if max_drawdown > 0.0 {
            (total_return_pct / max_drawdown).abs()
        } else {
            0.0
        };

        let expectancy = if total_trades > 0 {
            win_rate / 100.0 * avg_win + (1.0 - win_rate / 100.0) * avg_loss
        } else {
            0.0
        };

        let num_points = equity_curve.len();
        let annualized_return = if num_points > 1 && final_capital > 0.0 && initial_capital > 0.0 {
            ((final_capital / initial_capital).powf(252.0 / num_points as f64) - 1.0) * 100.0
        } else {
            0.0
        };

        let calmar_ratio = if max_drawdown > 0.0 {
            annualized_return / max_drawdown
        } else {
            0.0
        };

        let volatility = if returns.is_empty() {
            0.0
        } else {
            std_return * 252.0_f64.sqrt() * 100.0
        };

        Self {
            total_return,
            total_return_pct,
            annualized_return,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            max_drawdown_duration: max_dd_duration,
            win_rate,
            profit_factor,
            recovery_factor,
            total_trades,
            winning_trades,
            losing_trades,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            expectancy,
            calmar_ratio,
            volatility,
        }
    }
}

/// Percentage drawdown per equity point, against the running peak.
pub fn drawdown_curve(equity_curve: &[EquityPoint]) -> Vec<DrawdownPoint> {
    let mut peak = f64::NEG_INFINITY;
    equity_curve
        .iter()
        .map(|point| {
            if point.equity > peak {
                peak = point.equity;
            }
            let drawdown = if peak > 0.0 {
                (peak - point.equity) / peak * 100.0
            } else {
                0.0
            };
            DrawdownPoint {
                timestamp: point.timestamp,
                drawdown,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::position::OrderSide;
    use chrono::{TimeZone, Utc};

    fn equity_points(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                timestamp: Utc.timestamp_millis_opt(i as i64 * 3_600_000).unwrap(),
                equity,
                price: equity / 100.0,
            })
            .collect()
    }

    fn trade_with_pnl(pnl: f64) -> Trade {
        Trade {
            id: "t_1".to_string(),
            timestamp: Utc.timestamp_millis_opt(0).unwrap(),
            side: OrderSide::Sell,
            price: 100.0,
            quantity: 1.0,
            value: 100.0,
            fee: 0.0,
            pnl,
            cumulative_pnl: pnl,
            position_after: 0.0,
            reason: String::new(),
        }
    }

    #[test]
    fn test_empty_equity_curve_yields_default() {
        let metrics = Metrics::compute(&[], &[], 10_000.0, 10_000.0);
        assert_eq!(metrics, Metrics::default());
    }

    #[test]
    fn test_flat_equity_has_no_drawdown_and_zero_sharpe() {
        let curve = equity_points(&[10_000.0; 10]);
        let metrics = Metrics::compute(&curve, &[], 10_000.0, 10_000.0);

        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.max_drawdown, 0.0);
        assert_eq!(metrics.volatility, 0.0);
        assert_eq!(metrics.calmar_ratio, 0.0);
    }

    #[test]
    fn test_max_drawdown_and_duration() {
        let curve = equity_points(&[100.0, 120.0, 90.0, 95.0, 130.0]);
        let metrics = Metrics::compute(&curve, &[], 100.0, 130.0);

        assert!((metrics.max_drawdown - 25.0).abs() < 1e-9);
        assert_eq!(metrics.max_drawdown_duration, 2);
    }

    #[test]
    fn test_win_rate_ignores_zero_pnl_entries() {
        let trades = vec![trade_with_pnl(0.0), trade_with_pnl(50.0)];
        let curve = equity_points(&[100.0, 150.0]);
        let metrics = Metrics::compute(&curve, &trades, 100.0, 150.0);

        assert_eq!(metrics.total_trades, 2);
        assert_eq!(metrics.winning_trades, 1);
        assert_eq!(metrics.losing_trades, 0);
        assert_eq!(metrics.win_rate, 100.0);
    }

    #[test]
    fn test_profit_factor_without_losses_is_gross_profit() {
        let trades = vec![trade_with_pnl(30.0), trade_with_pnl(20.0)];
        let curve = equity_points(&[100.0, 150.0]);
        let metrics = Metrics::compute(&curve, &trades, 100.0, 150.0);

        assert_eq!(metrics.profit_factor, 50.0);
    }

    #[test]
    fn test_profit_factor_ratio() {
        let trades = vec![trade_with_pnl(30.0), trade_with_pnl(-10.0)];
        let curve = equity_points(&[100.0, 120.0]);
        let metrics = Metrics::compute(&curve, &trades, 100.0, 120.0);

        assert!((metrics.profit_factor - 3.0).abs() < 1e-9);
        assert_eq!(metrics.largest_win, 30.0);
        assert_eq!(metrics.largest_loss, -10.0);
    }

    #[test]
    fn test_sortino_falls_back_to_sharpe_without_losses() {
        let curve = equity_points(&[100.0, 101.0, 103.0, 106.0]);
        let metrics = Metrics::compute(&curve, &[], 100.0, 106.0);

        assert!(metrics.sharpe_ratio > 0.0);
        assert_eq!(metrics.sortino_ratio, metrics.sharpe_ratio);
    }

    #[test]
    fn test_annualized_return_formula() {
        let curve = equity_points(&[100.0; 252]);
        let metrics = Metrics::compute(&curve, &[], 100.0, 110.0);

        // 252 points: annualized equals the simple return
        assert!((metrics.annualized_return - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_drawdown_curve_tracks_running_peak() {
        let curve = equity_points(&[100.0, 120.0, 90.0, 130.0]);
        let dd = drawdown_curve(&curve);

        assert_eq!(dd[0].drawdown, 0.0);
        assert_eq!(dd[1].drawdown, 0.0);
        assert!((dd[2].drawdown - 25.0).abs() < 1e-9);
        assert_eq!(dd[3].drawdown, 0.0);
    }
}
