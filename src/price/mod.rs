//! Realtime price store: cache (C2) and oracle (C3).

pub mod cache;
pub mod oracle;
pub mod types;

pub use cache::{PriceCache, PriceFeed};
pub use oracle::PriceOracle;
pub use types::{BookLevel, ChangeSign, OrderBookSnapshot, PriceSnapshot};
