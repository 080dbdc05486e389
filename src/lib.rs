//! Simulated equity-trading backend
//!
//! Order admission, a cash/holdings ledger, and a probabilistic
//! order-execution pipeline sitting behind an in-process execution bus.
//! See each module for the component it implements.

pub mod admission;
pub mod bus;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod matching;
pub mod opener;
pub mod orders;
pub mod price;
pub mod retry;
pub mod stock;

pub use admission::AdmissionService;
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{AppError, AppResult};
pub use ledger::Ledger;
pub use orders::{Order, OrderStatus, OrderStore, Side};
