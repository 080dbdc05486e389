//! Execution Bus (C7)
//!
//! At-least-once delivery, partitioned by `orderId` so messages for a given
//! order are always processed in enqueue order (spec §4.7). Two logical
//! queues: `orders.active` (consumed by the Matching Worker pool) and
//! `orders.retry` (a delay queue consumed by the Retry Scheduler's
//! dispatcher). This is an in-process stand-in for whatever durable broker
//! a deployment would use — the observable contract (serial per-order
//! delivery, not-before gating) is what the design notes in spec §9 call
//! out as the only thing that matters.

pub mod types;

pub use types::Message;

use crate::error::{AppError, AppResult};
use chrono::Utc;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

fn lane_for(order_id: &str, lane_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    order_id.hash(&mut hasher);
    (hasher.finish() as usize) % lane_count
}

/// Durable-in-spirit FIFO queue partitioned into `lane_count` lanes. Each
/// lane has exactly one consumer, so per-`orderId` ordering holds as long
/// as a given order always hashes to the same lane (it does: the hash is a
/// pure function of `order_id`).
pub struct ExecutionBus {
    lane_count: usize,
    senders: Vec<mpsc::UnboundedSender<Message>>,
    receivers: Mutex<Vec<Option<mpsc::UnboundedReceiver<Message>>>>,
    retry_queue: Mutex<Vec<Message>>,
}

impl ExecutionBus {
    pub fn new(lane_count: usize) -> Self {
        assert!(lane_count > 0, "execution bus needs at least one lane");
        let mut senders = Vec::with_capacity(lane_count);
        let mut receivers = Vec::with_capacity(lane_count);
        for _ in 0..lane_count {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            receivers.push(Some(rx));
        }
        Self {
            lane_count,
            senders,
            receivers: Mutex::new(receivers),
            retry_queue: Mutex::new(Vec::new()),
        }
    }

    /// Publishes to `orders.active`. A message for a non-existent or
    /// already-terminal order is handled by the consumer (it acks and
    /// returns, per spec §4.7) — publish itself never inspects order state.
    pub fn publish_active(&self, message: Message) -> AppResult<()> {
        let lane = lane_for(&message.order_id, self.lane_count);
        self.senders[lane]
            .send(message)
            .map_err(|e| AppError::Unavailable(format!("execution bus closed: {e}")))
    }

    /// Publishes to `orders.retry`. The message MUST carry `not_before`;
    /// the retry dispatcher gates redelivery on it.
    pub fn publish_retry(&self, message: Message) {
        debug_assert!(message.not_before.is_some(), "retry message missing not_before");
        self.retry_queue.lock().unwrap().push(message);
    }

    /// Takes ownership of one lane's receiver; each matching worker takes
    /// exactly one. Returns `None` if the lane was already taken.
    pub fn take_active_receiver(&self, lane: usize) -> Option<mpsc::UnboundedReceiver<Message>> {
        self.receivers.lock().unwrap()[lane].take()
    }

    pub fn lane_count(&self) -> usize {
        self.lane_count
    }

    /// Moves any retry messages whose `not_before` has elapsed back onto
    /// `orders.active`, with the incremented `retry_count` already applied
    /// by the scheduler before the message was queued. Returns the number
    /// forwarded.
    pub fn dispatch_due_retries(&self) -> AppResult<usize> {
        let now = Utc::now();
        let due: Vec<Message> = {
            let mut queue = self.retry_queue.lock().unwrap();
            let (due, still_pending): (Vec<_>, Vec<_>) = queue
                .drain(..)
                .partition(|m| m.not_before.map(|nb| now >= nb).unwrap_or(true));
            *queue = still_pending;
            due
        };
        let forwarded = due.len();
        for message in due {
            debug!(order_id = %message.order_id, retry_count = message.retry_count, "forwarding due retry to orders.active");
            self.publish_active(message)?;
        }
        Ok(forwarded)
    }

    pub fn pending_retry_count(&self) -> usize {
        self.retry_queue.lock().unwrap().len()
    }
}

/// Spawns a background task that periodically calls `dispatch_due_retries`.
/// This is the "dispatcher loop" variant of the abstract DelayQueue
/// primitive described in spec §9.
pub fn spawn_retry_dispatcher(
    bus: std::sync::Arc<ExecutionBus>,
    poll_interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = bus.dispatch_due_retries() {
                warn!(error = %e, "retry dispatcher failed to forward due messages");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::Side;

    #[test]
    fn same_order_id_always_maps_to_same_lane() {
        let lane_count = 3;
        let a = lane_for("ord_1", lane_count);
        let b = lane_for("ord_1", lane_count);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn publish_and_receive_on_correct_lane() {
        let bus = ExecutionBus::new(3);
        let msg = Message::new("ord_42", Side::Buy, 0, Utc::now());
        let lane = lane_for("ord_42", 3);
        bus.publish_active(msg).unwrap();
        let mut rx = bus.take_active_receiver(lane).unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.order_id, "ord_42");
    }

    #[test]
    fn retry_dispatch_respects_not_before() {
        let bus = ExecutionBus::new(1);
        let future = Utc::now() + chrono::Duration::minutes(3);
        bus.publish_retry(Message::new("ord_1", Side::Buy, 1, Utc::now()).with_not_before(future));
        assert_eq!(bus.dispatch_due_retries().unwrap(), 0);
        assert_eq!(bus.pending_retry_count(), 1);
    }

    #[test]
    fn retry_dispatch_forwards_when_due() {
        let bus = ExecutionBus::new(1);
        let past = Utc::now() - chrono::Duration::seconds(1);
        bus.publish_retry(Message::new("ord_1", Side::Buy, 1, Utc::now()).with_not_before(past));
        assert_eq!(bus.dispatch_due_retries().unwrap(), 1);
        assert_eq!(bus.pending_retry_count(), 0);
    }
}
