//! The scheduled jobs the engine registers.

use crate::dispatcher::Dispatcher;
use crate::rotating::DailyRotatingLog;
use crate::scheduler::ScheduledJob;
use crate::signature::SignatureStore;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tripwire_core::ports::{BuildHistory, ChangeDetector, InboundMessage, TaskBroker};
use tripwire_core::{Error, JobDefinition, Result};

/// Id of the operational-message listener.
pub const MGT_LISTENER_ID: &str = "trigger_mgt_listener";

/// Payload key holding the human-readable part of an operational message.
pub const MGT_MESSAGE_KEY: &str = "message";

/// Id of the history refresh job for `platform`.
pub fn refresh_job_id(platform: &str) -> String {
    format!("query_backfill_table_{}", platform)
}

/// Checks one job's feed and dispatches on change.
pub struct TriggerJob {
    job: JobDefinition,
    store: Arc<SignatureStore>,
    detector: Arc<dyn ChangeDetector>,
    dispatcher: Arc<Dispatcher>,
}

impl TriggerJob {
    pub fn new(
        job: JobDefinition,
        store: Arc<SignatureStore>,
        detector: Arc<dyn ChangeDetector>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            job,
            store,
            detector,
            dispatcher,
        }
    }

    pub fn definition(&self) -> &JobDefinition {
        &self.job
    }
}

#[async_trait]
impl ScheduledJob for TriggerJob {
    fn id(&self) -> &str {
        &self.job.name
    }

    async fn run(&self) -> Result<()> {
        let change = self
            .store
            .check_and_update(&self.job.name, &self.job.platform_build, self.detector.as_ref())
            .await;

        if !change.changed {
            debug!(job = %self.job.name, mode = %self.detector.mode(), "No new build");
            return Ok(());
        }

        self.dispatcher.dispatch(&self.job, &change).await?;
        Ok(())
    }
}

/// Periodically rebuilds a platform's build history.
pub struct HistoryRefreshJob {
    id: String,
    platform: String,
    history: Arc<dyn BuildHistory>,
    days: u32,
    suite_white_list: Vec<String>,
}

impl HistoryRefreshJob {
    pub fn new(
        platform: impl Into<String>,
        history: Arc<dyn BuildHistory>,
        days: u32,
        suite_white_list: Vec<String>,
    ) -> Self {
        let platform = platform.into();
        Self {
            id: refresh_job_id(&platform),
            platform,
            history,
            days,
            suite_white_list,
        }
    }
}

#[async_trait]
impl ScheduledJob for HistoryRefreshJob {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self) -> Result<()> {
        info!(platform = %self.platform, days = self.days, "Refreshing build history");
        self.history
            .refresh(&self.platform, self.days, &self.suite_white_list)
            .await
    }
}

/// Copies operational messages from worker agents into a rotating log.
///
/// One invocation consumes the topic until the stream ends or shutdown
/// starts; while it is consuming, later ticks are skipped by the scheduler.
pub struct MgtListenerJob {
    broker: Arc<dyn TaskBroker>,
    topic: String,
    log: Arc<DailyRotatingLog>,
    label: String,
}

impl MgtListenerJob {
    pub fn new(broker: Arc<dyn TaskBroker>, topic: impl Into<String>, log: Arc<DailyRotatingLog>) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            broker,
            topic: topic.into(),
            log,
            label: format!("TRIGGER-{}", host),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    async fn handle(&self, message: InboundMessage) {
        let text = extract_message(&message.payload);
        let log = self.log.clone();
        let written = tokio::task::spawn_blocking(move || log.write_line(&text))
            .await
            .map_err(|e| Error::Internal(e.to_string()))
            .and_then(|result| result);
        if let Err(e) = written {
            warn!(topic = %self.topic, error = %e, "Cannot write operational message");
        }
        if let Err(e) = message.ack().await {
            warn!(topic = %self.topic, error = %e, "Cannot acknowledge operational message");
        }
    }
}

#[async_trait]
impl ScheduledJob for MgtListenerJob {
    fn id(&self) -> &str {
        MGT_LISTENER_ID
    }

    async fn run(&self) -> Result<()> {
        let mut inbound = self.broker.listen(&self.topic).await?;
        info!(topic = %self.topic, consumer = %self.label, "Listening for operational messages");

        while let Some(next) = inbound.next().await {
            self.handle(next?).await;
        }

        debug!(topic = %self.topic, "Operational message stream ended");
        Ok(())
    }

    fn stops_on_shutdown(&self) -> bool {
        true
    }
}

/// The `message` field of a JSON payload, or the whole payload.
pub fn extract_message(payload: &[u8]) -> String {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => match map.get(MGT_MESSAGE_KEY) {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => Value::Object(map).to_string(),
        },
        _ => String::from_utf8_lossy(payload).to_string(),
    }
}
