//! Configuration for the NATS task broker.

use std::time::Duration;

/// Configuration for the NATS task broker.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URLs (comma-separated for cluster).
    pub urls: Vec<String>,
    pub username: String,
    pub password: String,
    /// JetStream stream holding every task topic.
    pub stream_name: String,
    /// Subject prefix; a topic lives at `<prefix>.<topic>`.
    pub subject_prefix: String,
    /// Connection timeout.
    pub connection_timeout: Duration,
    /// Request timeout for JetStream operations.
    pub request_timeout: Duration,
    /// How long a worker may hold a message before redelivery.
    pub ack_wait: Duration,
    /// Maximum delivery attempts per message.
    pub max_deliver: i64,
    /// Message retention period.
    pub max_age: Duration,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            urls: vec!["nats://localhost:4222".to_string()],
            username: String::new(),
            password: String::new(),
            stream_name: "TRIPWIRE_TASKS".to_string(),
            subject_prefix: "tasks".to_string(),
            connection_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            ack_wait: Duration::from_secs(300),
            max_deliver: 3,
            max_age: Duration::from_secs(86400 * 7), // 7 days
        }
    }
}

impl NatsConfig {
    /// Create a new config with a single URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }

    /// Set the broker account.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the stream name.
    pub fn with_stream_name(mut self, name: impl Into<String>) -> Self {
        self.stream_name = name.into();
        self
    }

    /// Set max delivery attempts.
    pub fn with_max_deliver(mut self, max: i64) -> Self {
        self.max_deliver = max;
        self
    }

    /// Subject a topic is published on.
    pub fn subject_for(&self, topic: &str) -> String {
        format!("{}.{}", self.subject_prefix, topic)
    }

    /// Durable consumer name backing a topic's queue.
    pub fn queue_name_for(&self, topic: &str) -> String {
        let sanitized: String = topic
            .chars()
            .map(|c| match c {
                '.' | '*' | '>' | ' ' | '\t' | '/' | '\\' => '_',
                _ => c,
            })
            .collect();
        format!("queue-{}", sanitized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = NatsConfig::new("nats://localhost:4222")
            .with_credentials("user", "pass")
            .with_stream_name("TEST_STREAM")
            .with_max_deliver(5);

        assert_eq!(config.stream_name, "TEST_STREAM");
        assert_eq!(config.username, "user");
        assert_eq!(config.max_deliver, 5);
    }

    #[test]
    fn test_topic_naming() {
        let config = NatsConfig::default();
        assert_eq!(config.subject_for("win7"), "tasks.win7");
        assert_eq!(config.queue_name_for("win7"), "queue-win7");
        assert_eq!(config.queue_name_for("win.7 x64"), "queue-win_7_x64");
    }
}
