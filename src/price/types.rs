//! Price cache value types (spec §3: PriceSnapshot, OrderBookSnapshot).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeSign {
    Up,
    Down,
    Unchanged,
}

/// Last known trade for a ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub last_price: i64,
    pub change_sign: ChangeSign,
    pub change_amount: i64,
    pub change_rate: f64,
    pub volume: i64,
    pub trade_time: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

/// One side's price/size ladder, best level first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: i64,
    pub size: i64,
}

/// Ten-deep ask and bid ladders for a ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub asks: Vec<BookLevel>,
    pub bids: Vec<BookLevel>,
    pub received_at: DateTime<Utc>,
}

impl OrderBookSnapshot {
    pub const DEPTH: usize = 10;
}
