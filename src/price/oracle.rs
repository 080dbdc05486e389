//! Price Oracle (C3)
//!
//! Resolves the price to use for admission/execution, per spec §4.3:
//! 1. Market open + fresh cached trade -> last price.
//! 2. Else prior close, if present.
//! 3. Else stale cached trade, if market is closed.
//! 4. Else a static per-ticker default, falling back to the system default
//!    (50,000 minor units) for unknown tickers.

use super::cache::{is_fresh, PriceCache};
use crate::clock::{Clock, MarketCalendar};
use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;

/// Small static table of per-ticker defaults, consulted only when both the
/// cache and prior close are empty (e.g. a brand-new ticker with no feed
/// history yet).
fn static_defaults() -> &'static HashMap<&'static str, i64> {
    static DEFAULTS: std::sync::OnceLock<HashMap<&'static str, i64>> = std::sync::OnceLock::new();
    DEFAULTS.get_or_init(|| {
        HashMap::from([
            ("005930", 70_000),  // Samsung Electronics
            ("000660", 130_000), // SK Hynix
            ("035420", 200_000), // NAVER
            ("005380", 180_000), // Hyundai Motor
            ("035720", 45_000),  // Kakao
        ])
    })
}

pub const SYSTEM_DEFAULT_PRICE: i64 = 50_000;

pub struct PriceOracle {
    cache: PriceCache,
    calendar: MarketCalendar,
    clock: Arc<dyn Clock>,
    freshness_window: Duration,
}

impl PriceOracle {
    pub fn new(
        cache: PriceCache,
        clock: Arc<dyn Clock>,
        freshness_window: Duration,
        calendar: MarketCalendar,
    ) -> Self {
        Self {
            cache,
            calendar,
            clock,
            freshness_window,
        }
    }

    pub fn current_price(&self, ticker: &str) -> i64 {
        let now = self.clock.now();
        let market_open = self.calendar.is_open_at(now);

        if market_open {
            if let Some(snapshot) = self.cache.get_price(ticker) {
                if is_fresh(&snapshot, now, self.freshness_window) {
                    return snapshot.last_price;
                }
            }
        }

        if let Some(close) = self.cache.get_close(ticker) {
            return close;
        }

        if !market_open {
            if let Some(snapshot) = self.cache.get_price(ticker) {
                return snapshot.last_price;
            }
        }

        *static_defaults()
            .get(ticker)
            .unwrap_or(&SYSTEM_DEFAULT_PRICE)
    }
}
