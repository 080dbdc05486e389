//! Ledger (C4): SQLite-backed cash accounts and per-account holdings.
//!
//! The ledger is the sole writer of `cash_balance` and `Holding.quantity`;
//! every mutation here is one atomic transaction that also appends an
//! `AccountHistory` row, matching spec §4.4's invariant. Modeled on the
//! teacher's `SqliteStateManager` (`Arc<Mutex<Connection>>`, WAL mode,
//! `CREATE TABLE IF NOT EXISTS`).

use super::types::{Account, AccountHistory, AccountStatus, Holding, HistoryType};
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub struct Ledger {
    conn: Arc<Mutex<Connection>>,
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl Ledger {
    pub fn open(db_path: impl AsRef<Path>) -> AppResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AppError::Internal(format!("failed to create db dir: {e}")))?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let ledger = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        ledger.create_tables()?;
        info!("ledger store initialized at {}", db_path.display());
        Ok(ledger)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        ledger.create_tables()?;
        Ok(ledger)
    }

    fn create_tables(&self) -> AppResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS account (
                account_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'ACTIVE',
                cash_balance INTEGER NOT NULL,
                withdrawable_balance INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS account_history (
                history_id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id TEXT NOT NULL,
                history_type TEXT NOT NULL,
                related_order_id TEXT,
                amount INTEGER NOT NULL,
                balance_before INTEGER NOT NULL,
                balance_after INTEGER NOT NULL,
                at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS holding (
                account_id TEXT NOT NULL,
                ticker TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                avg_cost INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (account_id, ticker)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_history_account ON account_history(account_id, at)",
            [],
        )?;
        debug!("ledger schema created/verified");
        Ok(())
    }

    fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<Account> {
        let status: String = row.get(2)?;
        let created_at: String = row.get(5)?;
        let updated_at: String = row.get(6)?;
        Ok(Account {
            account_id: row.get(0)?,
            user_id: row.get(1)?,
            status: AccountStatus::from_str(&status),
            cash_balance: row.get(3)?,
            withdrawable_balance: row.get(4)?,
            created_at: parse_dt(&created_at),
            updated_at: parse_dt(&updated_at),
        })
    }

    /// Creates an account for `user_id` if none exists (initial cash per
    /// spec §3: 1,000,000 minor units). Returns the existing account
    /// (DUPLICATE semantics) if one is already present — §4.4 reports this
    /// as a non-error "returns existing" outcome, not a client error.
    pub fn create_account(&self, user_id: &str, initial_cash: i64) -> AppResult<Account> {
        let conn = self.conn.lock().unwrap();
        if let Some(existing) = conn
            .query_row(
                "SELECT account_id, user_id, status, cash_balance, withdrawable_balance, created_at, updated_at
                 FROM account WHERE user_id = ?1",
                params![user_id],
                Self::row_to_account,
            )
            .optional()?
        {
            return Ok(existing);
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO account (account_id, user_id, status, cash_balance, withdrawable_balance, created_at, updated_at)
             VALUES ('', ?1, 'ACTIVE', ?2, ?2, ?3, ?3)",
            params![user_id, initial_cash, now],
        )?;
        let rowid = conn.last_insert_rowid();
        let account_id = format!("acc_{rowid:012x}");
        conn.execute(
            "UPDATE account SET account_id = ?1 WHERE rowid = ?2",
            params![account_id, rowid],
        )?;

        Ok(Account {
            account_id,
            user_id: user_id.to_string(),
            status: AccountStatus::Active,
            cash_balance: initial_cash,
            withdrawable_balance: initial_cash,
            created_at: parse_dt(&now),
            updated_at: parse_dt(&now),
        })
    }

    pub fn get_account(&self, account_id: &str) -> AppResult<Account> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT account_id, user_id, status, cash_balance, withdrawable_balance, created_at, updated_at
             FROM account WHERE account_id = ?1",
            params![account_id],
            Self::row_to_account,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                AppError::NotFound(format!("account {account_id}"))
            }
            other => AppError::from(other),
        })
    }

    pub fn get_account_by_user(&self, user_id: &str) -> AppResult<Option<Account>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT account_id, user_id, status, cash_balance, withdrawable_balance, created_at, updated_at
             FROM account WHERE user_id = ?1",
            params![user_id],
            Self::row_to_account,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn balance(&self, account_id: &str) -> AppResult<i64> {
        Ok(self.get_account(account_id)?.cash_balance)
    }

    pub fn can_reserve(&self, account_id: &str, amount: i64) -> AppResult<bool> {
        Ok(self.balance(account_id)? >= amount)
    }

    fn append_history_tx(
        tx: &rusqlite::Transaction,
        account_id: &str,
        history_type: HistoryType,
        related_order_id: Option<&str>,
        amount: i64,
        balance_before: i64,
        balance_after: i64,
    ) -> AppResult<()> {
        tx.execute(
            "INSERT INTO account_history
             (account_id, history_type, related_order_id, amount, balance_before, balance_after, at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                account_id,
                history_type.as_str(),
                related_order_id,
                amount,
                balance_before,
                balance_after,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn mutate_balance(
        &self,
        account_id: &str,
        delta: i64,
        history_type: HistoryType,
        order_id: Option<&str>,
        require_non_negative: bool,
    ) -> AppResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let balance_before: i64 = tx
            .query_row(
                "SELECT cash_balance FROM account WHERE account_id = ?1",
                params![account_id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    AppError::NotFound(format!("account {account_id}"))
                }
                other => AppError::from(other),
            })?;

        let balance_after = balance_before + delta;
        if require_non_negative && balance_after < 0 {
            return Err(AppError::InsufficientFunds {
                account_id: account_id.to_string(),
                needed: -delta,
                available: balance_before,
            });
        }

        tx.execute(
            "UPDATE account SET cash_balance = ?1, withdrawable_balance = ?1, updated_at = ?2 WHERE account_id = ?3",
            params![balance_after, Utc::now().to_rfc3339(), account_id],
        )?;
        Self::append_history_tx(
            &tx,
            account_id,
            history_type,
            order_id,
            delta,
            balance_before,
            balance_after,
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Debits cash at admission time (spec §4.4 note: a buy order debits
    /// cash at admission, not at fill).
    pub fn reserve_cash(&self, account_id: &str, amount: i64, order_id: &str) -> AppResult<()> {
        self.mutate_balance(
            account_id,
            -amount,
            HistoryType::BuyStock,
            Some(order_id),
            true,
        )
    }

    /// Refunds a reservation (cancellation, re-anchor shortfall, miss
    /// reversal after a ledger exception).
    pub fn release_cash(&self, account_id: &str, amount: i64, order_id: &str) -> AppResult<()> {
        self.mutate_balance(
            account_id,
            amount,
            HistoryType::Refund,
            Some(order_id),
            false,
        )
    }

    /// Credits cash on a sell fill.
    pub fn credit_cash(&self, account_id: &str, amount: i64, order_id: &str) -> AppResult<()> {
        self.mutate_balance(
            account_id,
            amount,
            HistoryType::SellStock,
            Some(order_id),
            false,
        )
    }

    pub fn get_holding(&self, account_id: &str, ticker: &str) -> AppResult<Option<Holding>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT account_id, ticker, quantity, avg_cost, created_at, updated_at
             FROM holding WHERE account_id = ?1 AND ticker = ?2",
            params![account_id, ticker],
            |row| {
                let created_at: String = row.get(4)?;
                let updated_at: String = row.get(5)?;
                Ok(Holding {
                    account_id: row.get(0)?,
                    ticker: row.get(1)?,
                    quantity: row.get(2)?,
                    avg_cost: row.get(3)?,
                    created_at: parse_dt(&created_at),
                    updated_at: parse_dt(&updated_at),
                })
            },
        )
        .optional()
        .map_err(AppError::from)
    }

    /// Upserts the holding and recomputes `avg_cost` as a quantity-weighted
    /// average with integer truncation (spec §4.4/§8).
    pub fn apply_buy_fill(
        &self,
        account_id: &str,
        ticker: &str,
        qty: i64,
        price: i64,
    ) -> AppResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let existing: Option<(i64, i64)> = tx
            .query_row(
                "SELECT quantity, avg_cost FROM holding WHERE account_id = ?1 AND ticker = ?2",
                params![account_id, ticker],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let now = Utc::now().to_rfc3339();
        match existing {
            Some((old_qty, old_avg)) => {
                let new_qty = old_qty + qty;
                let new_avg = (old_qty * old_avg + qty * price) / new_qty;
                tx.execute(
                    "UPDATE holding SET quantity = ?1, avg_cost = ?2, updated_at = ?3
                     WHERE account_id = ?4 AND ticker = ?5",
                    params![new_qty, new_avg, now, account_id, ticker],
                )?;
            }
            None => {
                tx.execute(
                    "INSERT INTO holding (account_id, ticker, quantity, avg_cost, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![account_id, ticker, qty, price, now],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Reduces the holding; deletes the row once quantity reaches 0.
    /// Returns `AppError::InsufficientHolding` (OVERSOLD) if `qty` exceeds
    /// the current holding.
    pub fn apply_sell_fill(&self, account_id: &str, ticker: &str, qty: i64) -> AppResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let current: i64 = tx
            .query_row(
                "SELECT quantity FROM holding WHERE account_id = ?1 AND ticker = ?2",
                params![account_id, ticker],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);

        if current < qty {
            return Err(AppError::InsufficientHolding {
                account_id: account_id.to_string(),
                ticker: ticker.to_string(),
                needed: qty,
                available: current,
            });
        }

        let remaining = current - qty;
        if remaining == 0 {
            tx.execute(
                "DELETE FROM holding WHERE account_id = ?1 AND ticker = ?2",
                params![account_id, ticker],
            )?;
        } else {
            tx.execute(
                "UPDATE holding SET quantity = ?1, updated_at = ?2 WHERE account_id = ?3 AND ticker = ?4",
                params![remaining, Utc::now().to_rfc3339(), account_id, ticker],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn history(&self, account_id: &str) -> AppResult<Vec<AccountHistory>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT history_id, account_id, history_type, related_order_id, amount, balance_before, balance_after, at
             FROM account_history WHERE account_id = ?1 ORDER BY at ASC, history_id ASC",
        )?;
        let rows = stmt.query_map(params![account_id], |row| {
            let history_type: String = row.get(2)?;
            let at: String = row.get(7)?;
            Ok(AccountHistory {
                history_id: row.get(0)?,
                account_id: row.get(1)?,
                history_type: HistoryType::from_str(&history_type),
                related_order_id: row.get(3)?,
                amount: row.get(4)?,
                balance_before: row.get(5)?,
                balance_after: row.get(6)?,
                at: parse_dt(&at),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_account_is_idempotent_per_user() {
        let ledger = Ledger::open_in_memory().unwrap();
        let a1 = ledger.create_account("u1", 1_000_000).unwrap();
        let a2 = ledger.create_account("u1", 1_000_000).unwrap();
        assert_eq!(a1.account_id, a2.account_id);
    }

    #[test]
    fn reserve_cash_debits_and_appends_history() {
        let ledger = Ledger::open_in_memory().unwrap();
        let acct = ledger.create_account("u1", 1_000_000).unwrap();
        ledger.reserve_cash(&acct.account_id, 70_000, "ord1").unwrap();
        assert_eq!(ledger.balance(&acct.account_id).unwrap(), 930_000);
        let history = ledger.history(&acct.account_id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].amount, -70_000);
        assert_eq!(history[0].balance_before, 1_000_000);
        assert_eq!(history[0].balance_after, 930_000);
    }

    #[test]
    fn reserve_cash_rejects_insufficient_funds() {
        let ledger = Ledger::open_in_memory().unwrap();
        let acct = ledger.create_account("u1", 50_000).unwrap();
        let err = ledger.reserve_cash(&acct.account_id, 70_000, "ord1").unwrap_err();
        assert!(matches!(err, AppError::InsufficientFunds { .. }));
        assert_eq!(ledger.balance(&acct.account_id).unwrap(), 50_000);
    }

    #[test]
    fn release_cash_refunds_reservation() {
        let ledger = Ledger::open_in_memory().unwrap();
        let acct = ledger.create_account("u1", 1_000_000).unwrap();
        ledger.reserve_cash(&acct.account_id, 200_000, "ord1").unwrap();
        ledger.release_cash(&acct.account_id, 200_000, "ord1").unwrap();
        assert_eq!(ledger.balance(&acct.account_id).unwrap(), 1_000_000);
    }

    #[test]
    fn apply_buy_fill_computes_weighted_average_with_truncation() {
        let ledger = Ledger::open_in_memory().unwrap();
        let acct = ledger.create_account("u1", 10_000_000).unwrap();
        ledger.apply_buy_fill(&acct.account_id, "005930", 3, 100).unwrap();
        ledger.apply_buy_fill(&acct.account_id, "005930", 2, 103).unwrap();
        let holding = ledger.get_holding(&acct.account_id, "005930").unwrap().unwrap();
        assert_eq!(holding.quantity, 5);
        // (3*100 + 2*103) / 5 = 101.2 -> 101 (integer truncation)
        assert_eq!(holding.avg_cost, 101);
    }

    #[test]
    fn apply_sell_fill_reduces_and_deletes_holding() {
        let ledger = Ledger::open_in_memory().unwrap();
        let acct = ledger.create_account("u1", 10_000_000).unwrap();
        ledger.apply_buy_fill(&acct.account_id, "035420", 3, 180_000).unwrap();
        ledger.apply_sell_fill(&acct.account_id, "035420", 2).unwrap();
        let holding = ledger.get_holding(&acct.account_id, "035420").unwrap().unwrap();
        assert_eq!(holding.quantity, 1);
        assert_eq!(holding.avg_cost, 180_000);

        ledger.apply_sell_fill(&acct.account_id, "035420", 1).unwrap();
        assert!(ledger.get_holding(&acct.account_id, "035420").unwrap().is_none());
    }

    #[test]
    fn apply_sell_fill_rejects_oversell() {
        let ledger = Ledger::open_in_memory().unwrap();
        let acct = ledger.create_account("u1", 10_000_000).unwrap();
        ledger.apply_buy_fill(&acct.account_id, "035420", 1, 180_000).unwrap();
        let err = ledger.apply_sell_fill(&acct.account_id, "035420", 2).unwrap_err();
        assert!(matches!(err, AppError::InsufficientHolding { .. }));
    }
}
