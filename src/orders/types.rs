//! Order data model and status machine (spec §3, §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "SELL" => Side::Sell,
            _ => Side::Buy,
        }
    }
}

/// Order status machine (spec §4.5):
///
/// ```text
///        admit                         probabilistic fill
/// (new) ─────► PENDING ─────────────────► EXECUTED
///    │            │                         ▲
///    │ market     │ retry exhausted          │
///    │ closed     │ (forced)                 │
///    ▼            ▼                          │
///  RESERVED ─── open time re-anchor ─────────►┤
///    │                                        │
///    │  shortfall at re-anchor                │
///    ▼                                        │
///  CANCELLED                           FAILED ◄── fill exception
/// ```
///
/// Terminal states are Executed, Failed, Cancelled; re-entry into a
/// terminal state is forbidden (enforced by the store's optimistic check).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Reserved,
    Executed,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Reserved => "RESERVED",
            OrderStatus::Executed => "EXECUTED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "RESERVED" => OrderStatus::Reserved,
            "EXECUTED" => OrderStatus::Executed,
            "FAILED" => OrderStatus::Failed,
            "CANCELLED" => OrderStatus::Cancelled,
            _ => OrderStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Executed | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub side: Side,
    pub account_id: String,
    pub ticker: String,
    /// Limit price in minor units. Re-anchored at market open (C10).
    pub price: i64,
    pub quantity: i64,
    pub status: OrderStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn reserved_amount(&self) -> i64 {
        self.price * self.quantity
    }
}
