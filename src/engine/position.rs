use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Order side of an executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Position side. Exactly one position exists per run; it is replaced, not
/// mutated into a new side, on every open/close transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
    Flat,
}

/// Current position during a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub side: PositionSide,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_time: Option<DateTime<Utc>>,
    pub unrealized_pnl: f64,
    pub current_price: f64,
}

impl Position {
    pub fn flat() -> Self {
        Self {
            side: PositionSide::Flat,
            quantity: 0.0,
            entry_price: 0.0,
            entry_time: None,
            unrealized_pnl: 0.0,
            current_price: 0.0,
        }
    }

    pub fn open(
        side: PositionSide,
        quantity: f64,
        entry_price: f64,
        entry_time: DateTime<Utc>,
    ) -> Self {
        Self {
            side,
            quantity,
            entry_price,
            entry_time: Some(entry_time),
            unrealized_pnl: 0.0,
            current_price: entry_price,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.side == PositionSide::Flat
    }

    /// Mark the position to a price and recompute unrealized P&L with the
    /// side-specific formula.
    pub fn mark(&mut self, price: f64) {
        self.current_price = price;
        self.unrealized_pnl = match self.side {
            PositionSide::Long => (price - self.entry_price) * self.quantity,
            PositionSide::Short => (self.entry_price - price) * self.quantity,
            PositionSide::Flat => 0.0,
        };
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::flat()
    }
}

/// An immutable trade record, appended on every execution (open, close or
/// flip). Ordering is execution order, which is also chronological.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub side: OrderSide,
    /// Executed price, post-slippage.
    pub price: f64,
    pub quantity: f64,
    pub value: f64,
    pub fee: f64,
    /// Realized P&L for this execution; 0 for pure opens.
    pub pnl: f64,
    pub cumulative_pnl: f64,
    pub position_after: f64,
    pub reason: String,
}
