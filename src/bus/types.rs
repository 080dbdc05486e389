//! Execution bus message (spec §3).

use crate::orders::Side;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct Message {
    pub order_id: String,
    pub side: Side,
    pub retry_count: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Set for messages republished to `orders.retry`; the retry dispatcher
    /// won't forward to `orders.active` before this instant (spec §4.9).
    pub not_before: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(order_id: impl Into<String>, side: Side, retry_count: u32, now: DateTime<Utc>) -> Self {
        Self {
            order_id: order_id.into(),
            side,
            retry_count,
            enqueued_at: now,
            not_before: None,
        }
    }

    pub fn with_not_before(mut self, not_before: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self
    }
}
