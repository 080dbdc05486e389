//! Stock reference data (spec §3: ticker catalog).
//!
//! The distillation names `UNKNOWN_TICKER` as a possible admission error
//! (§4.6) without saying where ticker existence is checked; this catalog is
//! that check. Seeded with a small KOSPI-style list for local runs and
//! tests.

use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockStatus {
    Listed,
    Delisted,
}

#[derive(Debug, Clone)]
pub struct Stock {
    pub ticker: String,
    pub name: String,
    pub sector: String,
    pub status: StockStatus,
}

#[derive(Clone)]
pub struct StockCatalog {
    by_ticker: Arc<HashMap<String, Stock>>,
}

impl StockCatalog {
    pub fn new(stocks: Vec<Stock>) -> Self {
        let by_ticker = stocks
            .into_iter()
            .map(|s| (s.ticker.clone(), s))
            .collect();
        Self {
            by_ticker: Arc::new(by_ticker),
        }
    }

    /// Seed catalog used by `engine::Engine::new` and tests.
    pub fn seeded() -> Self {
        Self::new(vec![
            Stock {
                ticker: "005930".to_string(),
                name: "Samsung Electronics".to_string(),
                sector: "Technology".to_string(),
                status: StockStatus::Listed,
            },
            Stock {
                ticker: "000660".to_string(),
                name: "SK Hynix".to_string(),
                sector: "Technology".to_string(),
                status: StockStatus::Listed,
            },
            Stock {
                ticker: "035420".to_string(),
                name: "NAVER".to_string(),
                sector: "Communication Services".to_string(),
                status: StockStatus::Listed,
            },
            Stock {
                ticker: "005380".to_string(),
                name: "Hyundai Motor".to_string(),
                sector: "Consumer Discretionary".to_string(),
                status: StockStatus::Listed,
            },
            Stock {
                ticker: "035720".to_string(),
                name: "Kakao".to_string(),
                sector: "Communication Services".to_string(),
                status: StockStatus::Listed,
            },
        ])
    }

    pub fn is_tradable(&self, ticker: &str) -> bool {
        matches!(
            self.by_ticker.get(ticker),
            Some(Stock {
                status: StockStatus::Listed,
                ..
            })
        )
    }

    pub fn get(&self, ticker: &str) -> Option<&Stock> {
        self.by_ticker.get(ticker)
    }
}

/// Normalizes a user-supplied ticker string to the 6-digit form (spec
/// §4.6: "normalize leading zeros").
pub fn normalize_ticker(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > 6 || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{:0>6}", trimmed))
}
