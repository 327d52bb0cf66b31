//! NATS JetStream task broker for tripwire.
//!
//! Each topic maps to the subject `<prefix>.<topic>` on one work-queue
//! stream and to a durable pull consumer that workers share. Recreating a
//! queue deletes and re-adds that consumer.

mod broker;
pub mod config;
pub mod metrics;

pub use broker::NatsTaskBroker;
pub use config::NatsConfig;
pub use metrics::{BrokerMetrics, MetricsSnapshot};
