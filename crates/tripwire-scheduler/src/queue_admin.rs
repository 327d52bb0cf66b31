//! Startup reconciliation of the work queues enabled jobs publish to.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info};
use tripwire_core::JobDefinition;
use tripwire_core::ports::TaskBroker;

/// Which topics were recreated and which failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueReport {
    pub recreated: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl QueueReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct QueueAdmin {
    broker: Arc<dyn TaskBroker>,
}

impl QueueAdmin {
    pub fn new(broker: Arc<dyn TaskBroker>) -> Self {
        Self { broker }
    }

    /// Delete and recreate the queue of every topic an enabled job uses,
    /// clearing consumers a crashed worker left unacknowledged.
    ///
    /// A failing topic is logged and the remaining topics still run.
    pub async fn reconcile_queues(&self, jobs: &[JobDefinition]) -> QueueReport {
        let mut report = QueueReport::default();

        for topic in enabled_topics(jobs) {
            match self.broker.recreate_queue(&topic).await {
                Ok(()) => {
                    info!(topic = %topic, "Queue reset");
                    report.recreated.push(topic);
                }
                Err(e) => {
                    error!(topic = %topic, error = %e, "Queue reset failed");
                    report.failed.push((topic, e.to_string()));
                }
            }
        }

        report
    }
}

/// Distinct topics of enabled jobs, sorted.
pub fn enabled_topics(jobs: &[JobDefinition]) -> BTreeSet<String> {
    jobs.iter()
        .filter(|job| job.enabled)
        .map(|job| job.topic.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tripwire_core::ports::InboundStream;
    use tripwire_core::{DetectionMode, Error, Result, TaskMessage};

    #[derive(Default)]
    struct Recorder {
        recreated: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TaskBroker for Recorder {
        async fn queue_exists(&self, _topic: &str) -> Result<bool> {
            Ok(true)
        }

        async fn recreate_queue(&self, topic: &str) -> Result<()> {
            if topic == "broken" {
                return Err(Error::QueueAdmin {
                    topic: topic.to_string(),
                    reason: "consumer busy".to_string(),
                });
            }
            self.recreated.lock().unwrap().push(topic.to_string());
            Ok(())
        }

        async fn publish(&self, _message: &TaskMessage) -> Result<()> {
            Ok(())
        }

        async fn listen(&self, _topic: &str) -> Result<InboundStream> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    fn job(name: &str, topic: &str, enabled: bool) -> JobDefinition {
        JobDefinition {
            name: name.to_string(),
            enabled,
            topic: topic.to_string(),
            platform_build: "win64".to_string(),
            interval_minutes: 10,
            command: "download-latest-nightly".to_string(),
            amount: 1,
            overwrite_config: Default::default(),
            detection: DetectionMode::Hash,
        }
    }

    #[test]
    fn test_enabled_topics_are_distinct() {
        let jobs = vec![
            job("a", "win7", true),
            job("b", "win7", true),
            job("c", "win10", false),
            job("d", "mac", true),
        ];
        let topics: Vec<_> = enabled_topics(&jobs).into_iter().collect();
        assert_eq!(topics, vec!["mac".to_string(), "win7".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_topics() {
        let broker = Arc::new(Recorder::default());
        let admin = QueueAdmin::new(broker.clone());

        let jobs = vec![
            job("a", "alpha", true),
            job("b", "broken", true),
            job("c", "gamma", true),
        ];
        let report = admin.reconcile_queues(&jobs).await;

        assert!(!report.is_clean());
        assert_eq!(report.recreated, vec!["alpha".to_string(), "gamma".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "broken");
        assert_eq!(*broker.recreated.lock().unwrap(), report.recreated);
    }
}
