pub mod context;
pub mod indicators;
pub mod metrics;
pub mod position;
pub mod result;

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, instrument};

use crate::config::BacktestConfig;
use crate::data::store::CandleStore;
use crate::engine::context::SimContext;
use crate::engine::metrics::{drawdown_curve, EquityPoint, Metrics};
use crate::engine::result::BacktestResult;
use crate::error::SimError;
use crate::strategy::Strategy;

/// Deterministic candle-replay simulator. Owns the loaded candle data;
/// every run builds a fresh [`SimContext`] so results are reproducible
/// and runs never leak state into each other.
#[derive(Debug, Default)]
pub struct BacktestEngine {
    store: CandleStore,
}

impl BacktestEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: CandleStore) -> Self {
        Self { store }
    }

    /// Load candles for a symbol, sorted ascending by timestamp.
    pub fn load_data(&mut self, symbol: &str, candles: Vec<crate::data::candle::Candle>) {
        self.store.load(symbol, candles);
    }

    pub fn load_csv(&mut self, symbol: &str, path: &std::path::Path) -> Result<(), SimError> {
        self.store.load_csv(symbol, path)
    }

    pub fn store(&self) -> &CandleStore {
        &self.store
    }

    /// Replay the configured date range through `strategy`, one candle at a
    /// time, and derive metrics from the resulting equity curve and trade
    /// ledger. A strategy error on one candle is logged and skipped; any
    /// open position is force-closed after the last candle.
    #[instrument(skip(self, strategy, parameters), fields(symbol = %config.symbol, name = strategy_name))]
    pub fn run(
        &self,
        strategy: &mut dyn Strategy,
        config: &BacktestConfig,
        strategy_name: &str,
        parameters: BTreeMap<String, f64>,
    ) -> Result<BacktestResult, SimError> {
        let start_time = Utc::now();
        let clock = Instant::now();

        let symbol = config.symbol.to_uppercase();
        if !self.store.has(&symbol) {
            return Err(SimError::NoData { symbol });
        }

        let start = config.start_date()?;
        let end = config.end_date()?;
        let candles = self.store.filter_by_date(&symbol, start, end)?;
        if candles.is_empty() {
            return Err(SimError::EmptyDateRange {
                symbol,
                start: config.start_date.clone(),
                end: config.end_date.clone(),
            });
        }

        info!(
            candles = candles.len(),
            "Running backtest: {} on {}", strategy_name, symbol
        );

        let mut ctx = SimContext::new(config, &candles);
        for i in 0..candles.len() {
            ctx.idx = i;
            let candle = &candles[i];

            if !ctx.position.is_flat() {
                ctx.position.mark(candle.close);
            }

            let equity = ctx.current_equity(candle.close);
            ctx.equity_curve.push(EquityPoint {
                timestamp: candle.timestamp,
                equity,
                price: candle.close,
            });

            if let Err(e) = strategy.on_candle(&mut ctx) {
                error!("Strategy error at {}: {}", candle.timestamp, e);
            }
        }

        if !ctx.position.is_flat() {
            ctx.close_position("End of backtest");
        }

        let metrics = Metrics::compute(
            &ctx.equity_curve,
            &ctx.trades,
            config.initial_capital,
            ctx.capital,
        );
        let total_fees = ctx.trades.iter().map(|t| t.fee).sum();

        info!(
            "Backtest complete: Return={:.2}%, Sharpe={:.2}, MaxDD={:.2}%",
            metrics.total_return_pct, metrics.sharpe_ratio, metrics.max_drawdown
        );

        Ok(BacktestResult {
            config: config.clone(),
            metrics,
            drawdown_curve: drawdown_curve(&ctx.equity_curve),
            final_capital: ctx.capital,
            total_fees,
            trades: ctx.trades,
            equity_curve: ctx.equity_curve,
            start_time,
            end_time: Utc::now(),
            duration_seconds: clock.elapsed().as_secs_f64(),
            strategy_name: strategy_name.to_string(),
            parameters,
        })
    }
}
