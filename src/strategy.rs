//! Strategy trait and a couple of reference strategies.

use crate::engine::context::SimContext;
use crate::error::SimError;

/// A trading strategy, invoked once per candle with full access to the
/// simulation context. Errors are reported per candle and do not abort
/// the run.
pub trait Strategy {
    fn on_candle(&mut self, ctx: &mut SimContext<'_>) -> Result<(), SimError>;
}

/// Adapter that lets a closure act as a strategy.
pub struct FnStrategy<F>(pub F);

impl<F> Strategy for FnStrategy<F>
where
    F: FnMut(&mut SimContext<'_>) -> Result<(), SimError>,
{
    fn on_candle(&mut self, ctx: &mut SimContext<'_>) -> Result<(), SimError> {
        (self.0)(ctx)
    }
}

/// Enters on the first candle and holds until the forced close.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuyAndHold;

impl Strategy for BuyAndHold {
    fn on_candle(&mut self, ctx: &mut SimContext<'_>) -> Result<(), SimError> {
        if ctx.index() == 0 {
            ctx.buy(1.0, "Buy and hold entry");
        }
        Ok(())
    }
}

/// Long when the fast SMA is above the slow SMA, flat otherwise.
#[derive(Debug, Clone, Copy)]
pub struct SmaCross {
    pub fast: usize,
    pub slow: usize,
}

impl SmaCross {
    pub fn new(fast: usize, slow: usize) -> Self {
        Self { fast, slow }
    }
}

impl Strategy for SmaCross {
    fn on_candle(&mut self, ctx: &mut SimContext<'_>) -> Result<(), SimError> {
        if ctx.index() + 1 < self.slow {
            return Ok(());
        }

        let fast = ctx.sma(self.fast);
        let slow = ctx.sma(self.slow);

        if fast > slow && ctx.is_flat() {
            ctx.buy(1.0, "SMA cross up");
        } else if fast < slow && ctx.is_long() {
            ctx.close_position("SMA cross down");
        }
        Ok(())
    }
}

/// Buys oversold RSI readings and exits on overbought ones.
#[derive(Debug, Clone, Copy)]
pub struct RsiReversion {
    pub period: usize,
    pub oversold: f64,
    pub overbought: f64,
}

impl RsiReversion {
    pub fn new(period: usize, oversold: f64, overbought: f64) -> Self {
        Self {
            period,
            oversold,
            overbought,
        }
    }
}

impl Strategy for RsiReversion {
    fn on_candle(&mut self, ctx: &mut SimContext<'_>) -> Result<(), SimError> {
        let rsi = ctx.rsi(self.period);

        if rsi < self.oversold && ctx.is_flat() {
            ctx.buy(1.0, "RSI oversold");
        } else if rsi > self.overbought && ctx.is_long() {
            ctx.close_position("RSI overbought");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BacktestConfig;
    use crate::data::candle::Candle;
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

    #[test]
    fn test_buy_and_hold_enters_once() {
        let config = BacktestConfig::default();
        let data = candles(&[100.0, 101.0, 102.0]);
        let mut ctx = SimContext::new(&config, &data);
        let mut strategy = BuyAndHold;

        for i in 0..data.len() {
            ctx.idx = i;
            strategy.on_candle(&mut ctx).unwrap();
        }

        assert!(ctx.is_long());
        assert_eq!(ctx.trades().len(), 1);
    }

    #[test]
    fn test_closure_strategy_is_accepted() {
        let config = BacktestConfig::default();
        let data = candles(&[100.0]);
        let mut ctx = SimContext::new(&config, &data);

        let mut strategy = FnStrategy(|ctx: &mut SimContext<'_>| -> Result<(), SimError> {
            ctx.buy(1.0, "closure entry");
            Ok(())
        });
        strategy.on_candle(&mut ctx).unwrap();

        assert!(ctx.is_long());
    }

    #[test]
    fn test_sma_cross_waits_for_slow_window() {
        let config = BacktestConfig::default();
        let data = candles(&[100.0, 110.0, 120.0]);
        let mut ctx = SimContext::new(&config, &data);
        let mut strategy = SmaCross::new(2, 5);

        for i in 0..data.len() {
            ctx.idx = i;
            strategy.on_candle(&mut ctx).unwrap();
        }

        assert!(ctx.trades().is_empty());
    }
}
