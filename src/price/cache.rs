//! Price Cache (C2)
//!
//! Key/value store keyed as spec §4.2 describes: `realtime:stock:{ticker}`
//! for `PriceSnapshot`, `realtime:orderbook:{ticker}` for
//! `OrderBookSnapshot`, and `close:{ticker}` for the prior close. Reads
//! never block on a feed; a miss is normal. Multiple writers (feed
//! ingestors) may race; last write wins per key, which is why this is built
//! on `dashmap` rather than behind a single mutex.

use super::types::{OrderBookSnapshot, PriceSnapshot};
use chrono::Duration;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

const TRADE_TTL: StdDuration = StdDuration::from_secs(60);
const BOOK_TTL: StdDuration = StdDuration::from_secs(60);
const CLOSE_TTL: StdDuration = StdDuration::from_secs(7 * 24 * 60 * 60);

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Entry<T> {
    fn fresh(value: T, ttl: StdDuration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Realtime price cache. `Clone` is cheap: it's an `Arc` handle shared
/// across admission, matching, and the reservation opener.
#[derive(Clone)]
pub struct PriceCache {
    trades: Arc<DashMap<String, Entry<PriceSnapshot>>>,
    books: Arc<DashMap<String, Entry<OrderBookSnapshot>>>,
    closes: Arc<DashMap<String, Entry<i64>>>,
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceCache {
    pub fn new() -> Self {
        Self {
            trades: Arc::new(DashMap::new()),
            books: Arc::new(DashMap::new()),
            closes: Arc::new(DashMap::new()),
        }
    }

    pub fn put_price(&self, ticker: &str, snapshot: PriceSnapshot) {
        self.trades
            .insert(ticker.to_string(), Entry::fresh(snapshot, TRADE_TTL));
    }

    /// Returns the cached snapshot even if expired by TTL — freshness
    /// against the 5-minute window is the Oracle's job (C3), not the
    /// cache's. A TTL-expired entry is simply evicted and treated as a
    /// miss, since the Oracle has no use for data older than the cache's
    /// own retention window.
    pub fn get_price(&self, ticker: &str) -> Option<PriceSnapshot> {
        let entry = self.trades.get(ticker)?;
        if entry.is_expired() {
            drop(entry);
            self.trades.remove(ticker);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn put_book(&self, ticker: &str, snapshot: OrderBookSnapshot) {
        self.books
            .insert(ticker.to_string(), Entry::fresh(snapshot, BOOK_TTL));
    }

    pub fn get_book(&self, ticker: &str) -> Option<OrderBookSnapshot> {
        let entry = self.books.get(ticker)?;
        if entry.is_expired() {
            drop(entry);
            self.books.remove(ticker);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn put_close(&self, ticker: &str, price: i64) {
        self.closes
            .insert(ticker.to_string(), Entry::fresh(price, CLOSE_TTL));
    }

    pub fn get_close(&self, ticker: &str) -> Option<i64> {
        let entry = self.closes.get(ticker)?;
        if entry.is_expired() {
            drop(entry);
            self.closes.remove(ticker);
            return None;
        }
        Some(entry.value)
    }

    /// Scan of `realtime:stock:*` — tickers with a non-expired last trade.
    pub fn list_active_tickers(&self) -> Vec<String> {
        self.trades
            .iter()
            .filter(|entry| !entry.value().is_expired())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Purges all TTL-expired entries across all three stores. Wired to the
    /// `0 0 0 * * *` cache-cleanup job in spec §6.
    pub fn evict_expired(&self) {
        self.trades.retain(|_, entry| !entry.is_expired());
        self.books.retain(|_, entry| !entry.is_expired());
        self.closes.retain(|_, entry| !entry.is_expired());
    }
}

/// Whether a snapshot counts as "live" under the freshness window (spec
/// §4.3): `now - receivedAt < freshness_window`.
pub fn is_fresh(snapshot: &PriceSnapshot, now: chrono::DateTime<chrono::Utc>, window: Duration) -> bool {
    now - snapshot.received_at < window
}

/// Trait hook for the `PriceFeed` external contract (spec §6): the feed may
/// call `put_price`/`put_book` at any rate. `PriceCache` satisfies this
/// directly; the trait exists so a test double or a future networked feed
/// can be swapped in without changing callers.
pub trait PriceFeed: Send + Sync {
    fn put_price(&self, ticker: &str, snapshot: PriceSnapshot);
    fn put_book(&self, ticker: &str, snapshot: OrderBookSnapshot);
}

impl PriceFeed for PriceCache {
    fn put_price(&self, ticker: &str, snapshot: PriceSnapshot) {
        PriceCache::put_price(self, ticker, snapshot)
    }

    fn put_book(&self, ticker: &str, snapshot: OrderBookSnapshot) {
        PriceCache::put_book(self, ticker, snapshot)
    }
}
