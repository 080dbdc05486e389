//! Cash accounts and per-account holdings with average cost (C4).

pub mod store;
pub mod types;

pub use store::Ledger;
pub use types::{Account, AccountHistory, AccountStatus, Holding, HistoryType};
