//! Dispatch counters kept by the broker and logged on shutdown.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct BrokerMetrics {
    tasks_published: AtomicU64,
    publish_failures: AtomicU64,
    bytes_published: AtomicU64,
    inbound_received: AtomicU64,
    inbound_acked: AtomicU64,
    queue_resets: AtomicU64,
    queue_reset_failures: AtomicU64,
    per_topic: Mutex<BTreeMap<String, u64>>,
}

impl BrokerMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A task reached the stream and was confirmed.
    pub fn task_published(&self, topic: &str, bytes: u64) {
        self.tasks_published.fetch_add(1, Ordering::Relaxed);
        self.bytes_published.fetch_add(bytes, Ordering::Relaxed);
        let mut per_topic = self.per_topic.lock().unwrap_or_else(|e| e.into_inner());
        *per_topic.entry(topic.to_string()).or_default() += 1;
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inbound_received(&self) {
        self.inbound_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inbound_acked(&self) {
        self.inbound_acked.fetch_add(1, Ordering::Relaxed);
    }

    /// Outcome of one delete-and-recreate of a queue.
    pub fn queue_reset(&self, ok: bool) {
        if ok {
            self.queue_resets.fetch_add(1, Ordering::Relaxed);
        } else {
            self.queue_reset_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_published: self.tasks_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
            inbound_received: self.inbound_received.load(Ordering::Relaxed),
            inbound_acked: self.inbound_acked.load(Ordering::Relaxed),
            queue_resets: self.queue_resets.load(Ordering::Relaxed),
            queue_reset_failures: self.queue_reset_failures.load(Ordering::Relaxed),
            published_by_topic: self
                .per_topic
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}

/// Point-in-time copy of [`BrokerMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tasks_published: u64,
    pub publish_failures: u64,
    pub bytes_published: u64,
    pub inbound_received: u64,
    pub inbound_acked: u64,
    pub queue_resets: u64,
    pub queue_reset_failures: u64,
    pub published_by_topic: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    /// Messages received but never acknowledged.
    pub fn unacked(&self) -> u64 {
        self.inbound_received.saturating_sub(self.inbound_acked)
    }
}
