//! Retry Scheduler (C9)
//!
//! Stores a per-order retry counter and next-eligible-time (spec §3:
//! RetryRecord, TTL >= 24h) and gates delayed redelivery onto the execution
//! bus's `orders.retry` queue.

use crate::bus::{ExecutionBus, Message};
use crate::clock::Clock;
use crate::orders::Side;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

const RETRY_RECORD_TTL: Duration = Duration::hours(24);

#[derive(Debug, Clone)]
pub struct RetryRecord {
    pub order_id: String,
    pub retry_count: u32,
    pub next_eligible_at: DateTime<Utc>,
    recorded_at: DateTime<Utc>,
}

/// In-memory store for `RetryRecord`s, keyed as `retry:count:{orderId}` /
/// `retry:delay:{orderId}` in spec §6 — both fields live on one record here
/// since they're always read and written together.
#[derive(Clone, Default)]
pub struct RetryStore {
    records: Arc<DashMap<String, RetryRecord>>,
}

impl RetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, order_id: &str, now: DateTime<Utc>) -> Option<RetryRecord> {
        let record = self.records.get(order_id)?;
        if now - record.recorded_at >= RETRY_RECORD_TTL {
            drop(record);
            self.records.remove(order_id);
            return None;
        }
        Some(record.clone())
    }

    pub fn put(&self, record: RetryRecord) {
        self.records.insert(record.order_id.clone(), record);
    }

    pub fn evict_expired(&self, now: DateTime<Utc>) {
        self.records
            .retain(|_, record| now - record.recorded_at < RETRY_RECORD_TTL);
    }
}

pub struct RetryScheduler {
    bus: Arc<ExecutionBus>,
    store: RetryStore,
    clock: Arc<dyn Clock>,
    retry_delay: Duration,
    retry_max: u32,
}

impl RetryScheduler {
    pub fn new(
        bus: Arc<ExecutionBus>,
        store: RetryStore,
        clock: Arc<dyn Clock>,
        retry_delay: Duration,
        retry_max: u32,
    ) -> Self {
        Self {
            bus,
            store,
            clock,
            retry_delay,
            retry_max,
        }
    }

    /// Schedules a retry for `order_id` after a missed fill. `retry_count`
    /// is the attempt number that just missed (0-indexed from the worker's
    /// perspective). Per spec §4.9, a call where the incremented count
    /// would exceed `retry_max` is a defensive no-op: the worker should
    /// already have forced a fill on the attempt that reached the cap.
    pub fn schedule(&self, order_id: &str, side: Side, retry_count: u32) {
        let new_count = retry_count + 1;
        if new_count > self.retry_max {
            debug!(order_id, new_count, "retry scheduler no-op: already past retry_max");
            return;
        }

        let now = self.clock.now();
        let next_eligible_at = now + self.retry_delay;
        self.store.put(RetryRecord {
            order_id: order_id.to_string(),
            retry_count: new_count,
            next_eligible_at,
            recorded_at: now,
        });

        let message = Message::new(order_id, side, new_count, now).with_not_before(next_eligible_at);
        self.bus.publish_retry(message);
    }
}
