use tracing::debug;

use crate::config::BacktestConfig;
use crate::data::candle::Candle;
use crate::engine::metrics::EquityPoint;
use crate::engine::position::{OrderSide, Position, PositionSide, Trade};

/// Per-run mutable simulation state, plus the capability set a strategy is
/// allowed to use: execution primitives, indicator accessors and read-only
/// state views. Constructed fresh for every `BacktestEngine::run` call and
/// never shared between runs.
pub struct SimContext<'a> {
    pub(crate) config: &'a BacktestConfig,
    pub(crate) candles: &'a [Candle],
    pub(crate) idx: usize,
    pub(crate) capital: f64,
    pub(crate) position: Position,
    pub(crate) trades: Vec<Trade>,
    pub(crate) equity_curve: Vec<EquityPoint>,
}

impl<'a> SimContext<'a> {
    pub(crate) fn new(config: &'a BacktestConfig, candles: &'a [Candle]) -> Self {
        Self {
            config,
            candles,
            idx: 0,
            capital: config.initial_capital,
            position: Position::flat(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    // --- Execution primitives (called by strategies) ---

    /// Buy with a fraction of available capital. No-op when already long.
    /// When short, the short's unrealized P&L is realized into cash first.
    pub fn buy(&mut self, size_fraction: f64, reason: &str) {
        if self.position.side == PositionSide::Long {
            return; // Already long
        }

        let price = self.execution_price(OrderSide::Buy);
        let available = self.capital * size_fraction.min(self.config.max_position_size);
        let quantity = available / price;

        let fee = available * self.config.fee_rate;
        self.capital -= available + fee;

        // Close short if one exists
        let mut pnl = 0.0;
        if self.position.side == PositionSide::Short {
            pnl = self.position.unrealized_pnl;
            self.capital += pnl;
        }

        let candle = &self.candles[self.idx];
        self.position = Position::open(PositionSide::Long, quantity, price, candle.timestamp);

        self.record_trade(OrderSide::Buy, price, quantity, fee, pnl, reason);
    }

    /// Sell the current long, or open a short when flat and shorting is
    /// allowed. No-op when already short.
    pub fn sell(&mut self, size_fraction: f64, reason: &str) {
        if self.position.side == PositionSide::Flat {
            if self.config.allow_short {
                self.open_short(size_fraction, reason);
            }
            return;
        }

        if self.position.side == PositionSide::Short {
            return; // Already short
        }

        self.close_position(reason);
    }

    /// Close the whole position, whatever its side.
    pub fn sell_all(&mut self, reason: &str) {
        self.close_position(reason);
    }

    /// Close the current position at the candle close with slippage applied
    /// against the exit direction. No-op when flat.
    pub fn close_position(&mut self, reason: &str) {
        if self.position.side == PositionSide::Flat {
            return;
        }

        let exit_side = match self.position.side {
            PositionSide::Long => OrderSide::Sell,
            _ => OrderSide::Buy,
        };
        let price = self.execution_price(exit_side);

        let value = self.position.quantity * price;
        let fee = value * self.config.fee_rate;

        let pnl = match self.position.side {
            PositionSide::Long => (price - self.position.entry_price) * self.position.quantity,
            _ => (self.position.entry_price - price) * self.position.quantity,
        };

        // Exit proceeds already embed realized PnL via the execution price.
        self.capital += value - fee;

        let quantity = self.position.quantity;
        self.position = Position::flat();
        self.record_trade(exit_side, price, quantity, fee, pnl, reason);
    }

    fn open_short(&mut self, size_fraction: f64, reason: &str) {
        let price = self.execution_price(OrderSide::Sell);
        let size = self.capital * size_fraction.min(self.config.max_position_size);
        let quantity = size / price;

        // Collateral model: principal stays in cash, only the fee leaves.
        let fee = size * self.config.fee_rate;
        self.capital -= fee;

        let candle = &self.candles[self.idx];
        self.position = Position::open(PositionSide::Short, quantity, price, candle.timestamp);

        self.record_trade(OrderSide::Sell, price, quantity, fee, 0.0, reason);
    }

    /// Candle-close execution price with slippage applied against the mover.
    fn execution_price(&self, side: OrderSide) -> f64 {
        let price = self.candles[self.idx].close;
        let slippage = price * (self.config.slippage_bps / 10_000.0);
        match side {
            OrderSide::Buy => price + slippage,
            OrderSide::Sell => price - slippage,
        }
    }

    fn record_trade(
        &mut self,
        side: OrderSide,
        price: f64,
        quantity: f64,
        fee: f64,
        pnl: f64,
        reason: &str,
    ) {
        let cumulative_pnl = self.trades.iter().map(|t| t.pnl).sum::<f64>() + pnl;
        let position_after = if self.position.is_flat() {
            0.0
        } else {
            self.position.quantity
        };

        let trade = Trade {
            id: format!("t_{}", self.trades.len() + 1),
            timestamp: self.candles[self.idx].timestamp,
            side,
            price,
            quantity,
            value: price * quantity,
            fee,
            pnl,
            cumulative_pnl,
            position_after,
            reason: reason.to_string(),
        };
        debug!(
            trade = %trade.id,
            side = ?trade.side,
            price = trade.price,
            pnl = trade.pnl,
            "Executed {}",
            trade.reason
        );
        self.trades.push(trade);
    }

    // --- State accessors ---

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn capital(&self) -> f64 {
        self.capital
    }

    /// Cash plus unrealized P&L.
    pub fn equity(&self) -> f64 {
        self.capital + self.position.unrealized_pnl
    }

    pub fn is_long(&self) -> bool {
        self.position.side == PositionSide::Long
    }

    pub fn is_short(&self) -> bool {
        self.position.side == PositionSide::Short
    }

    pub fn is_flat(&self) -> bool {
        self.position.side == PositionSide::Flat
    }

    /// Index of the candle currently being processed.
    pub fn index(&self) -> usize {
        self.idx
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Side-aware equity at the current mark. Longs carry their principal
    /// outside of cash so the full market value is added back; shorts keep
    /// collateral in cash so only the unrealized P&L adjusts it.
    pub(crate) fn current_equity(&self, mark: f64) -> f64 {
        match self.position.side {
            PositionSide::Long => self.capital + self.position.quantity * mark,
            PositionSide::Short => self.capital + self.position.unrealized_pnl,
            PositionSide::Flat => self.capital,
        }
    }
}
