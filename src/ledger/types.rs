//! Ledger data model (spec §3): Account, AccountHistory, Holding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Active,
    Inactive,
    Suspended,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Inactive => "INACTIVE",
            AccountStatus::Suspended => "SUSPENDED",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "INACTIVE" => AccountStatus::Inactive,
            "SUSPENDED" => AccountStatus::Suspended,
            _ => AccountStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub user_id: String,
    pub status: AccountStatus,
    pub cash_balance: i64,
    pub withdrawable_balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryType {
    BuyStock,
    SellStock,
    BuyProduct,
    Refund,
    ReserveAdjust,
}

impl HistoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryType::BuyStock => "BUY_STOCK",
            HistoryType::SellStock => "SELL_STOCK",
            HistoryType::BuyProduct => "BUY_PRODUCT",
            HistoryType::Refund => "REFUND",
            HistoryType::ReserveAdjust => "RESERVE_ADJUST",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "SELL_STOCK" => HistoryType::SellStock,
            "BUY_PRODUCT" => HistoryType::BuyProduct,
            "REFUND" => HistoryType::Refund,
            "RESERVE_ADJUST" => HistoryType::ReserveAdjust,
            _ => HistoryType::BuyStock,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountHistory {
    pub history_id: i64,
    pub account_id: String,
    pub history_type: HistoryType,
    pub related_order_id: Option<String>,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub account_id: String,
    pub ticker: String,
    pub quantity: i64,
    pub avg_cost: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
