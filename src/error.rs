//! Crate-wide error taxonomy
//!
//! Mirrors the error classes a client of the admission/execution pipeline
//! can observe: the first four variants are client-visible at admission,
//! `Conflict`/`Unavailable` are retried internally at most once by the
//! admission path, and `Internal` is always logged with the order id by the
//! caller before being returned.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient funds: account {account_id} needs {needed}, has {available}")]
    InsufficientFunds {
        account_id: String,
        needed: i64,
        available: i64,
    },

    #[error("insufficient holding: account {account_id} ticker {ticker} needs {needed}, has {available}")]
    InsufficientHolding {
        account_id: String,
        ticker: String,
        needed: i64,
        available: i64,
    },

    #[error("unknown ticker: {0}")]
    UnknownTicker(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Conflict(_) | AppError::Unavailable(_))
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(sqlite_err, _)
                if matches!(
                    sqlite_err.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                AppError::Unavailable(format!("database busy: {err}"))
            }
            rusqlite::Error::QueryReturnedNoRows => {
                AppError::NotFound("row not found".to_string())
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
