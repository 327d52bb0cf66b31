//! Fan-out of task messages for a detected build change.

use crate::signature::ChangeResult;
use chrono::Local;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};
use tripwire_core::job::ConfigMap;
use tripwire_core::masking::mask_config;
use tripwire_core::ports::{StatusSink, TaskBroker};
use tripwire_core::{
    BuildInfo, JobDefinition, Phase, Result, RunId, StatusContent, StatusRecord, TaskMessage, Uid,
    UidPrefix,
};

/// Commands that need to know which build they run against.
pub const PROVENANCE_COMMANDS: &[&str] = &["run-hasal-on-specify-nightly", "download-specify-nightly"];

/// Config key carrying the build's archive folder URL.
pub const ARCHIVE_URL_KEY: &str = "DOWNLOAD_PKG_DIR_URL";

/// Config key carrying the build's source revision.
pub const REVISION_KEY: &str = "DOWNLOAD_REVISION";

/// Publishes `amount` uniquely identified messages per detected change and
/// records the run's lifecycle.
pub struct Dispatcher {
    broker: Arc<dyn TaskBroker>,
    status: Arc<dyn StatusSink>,
}

impl Dispatcher {
    pub fn new(broker: Arc<dyn TaskBroker>, status: Arc<dyn StatusSink>) -> Self {
        Self { broker, status }
    }

    /// Publish the job's fan-out and return the uids in publish order.
    ///
    /// A publish failure stops the fan-out, appends an `ABORTED` record with
    /// the uids already out, and is returned to the caller.
    pub async fn dispatch(&self, job: &JobDefinition, change: &ChangeResult) -> Result<Vec<Uid>> {
        let run_id = match self.status.start_run(&job.name).await {
            Ok(run_id) => run_id,
            Err(e) => {
                warn!(job = %job.name, error = %e, "Cannot allocate status run, using a local id");
                RunId::new(&job.name, &Local::now())
            }
        };
        self.record(StatusRecord::new(run_id.clone(), Phase::Started, None))
            .await;

        match self.broker.queue_exists(&job.topic).await {
            Ok(true) => {}
            Ok(false) => error!(
                job = %job.name,
                topic = %job.topic,
                "Queue does not exist, the message may be dropped"
            ),
            Err(e) => error!(job = %job.name, topic = %job.topic, error = %e, "Queue lookup failed"),
        }

        let config = enrich_config(job, change.build.as_ref());
        let masked = mask_config(&config);
        let prefix = UidPrefix::new(&Local::now(), &job.name);
        let shown = Value::Object(masked.clone());

        info!(
            uid_prefix = %prefix,
            job = %job.name,
            platform = %job.platform_build,
            topic = %job.topic,
            amount = job.amount,
            cmd = %job.command,
            config = %shown,
            "Dispatching tasks"
        );

        let mut uids = Vec::with_capacity(job.amount as usize);
        for index in 1..=job.amount {
            let message = TaskMessage {
                uid: prefix.uid(index),
                topic: job.topic.clone(),
                command: job.command.clone(),
                config: config.clone(),
                amount_index: index,
            };

            if let Err(e) = self.broker.publish(&message).await {
                error!(
                    job = %job.name,
                    uid = %message.uid,
                    published = uids.len(),
                    error = %e,
                    "Publish failed, aborting fan-out"
                );
                let mut content = status_content(job, masked, uids);
                content.failed_uid = Some(message.uid);
                self.record(StatusRecord::new(run_id, Phase::Aborted, Some(content)))
                    .await;
                return Err(e);
            }
            uids.push(message.uid);
        }

        let content = status_content(job, masked, uids.clone());
        self.record(StatusRecord::new(run_id, Phase::Completed, Some(content)))
            .await;

        info!(job = %job.name, count = uids.len(), "Dispatch complete");
        Ok(uids)
    }

    async fn record(&self, record: StatusRecord) {
        if let Err(e) = self.status.append(&record).await {
            error!(run = %record.job_run_id, phase = ?record.phase, error = %e, "Cannot write status");
        }
    }
}

/// The config sent with every message of a fan-out.
pub fn enrich_config(job: &JobDefinition, build: Option<&BuildInfo>) -> ConfigMap {
    let mut config = job.overwrite_config.clone();
    if !PROVENANCE_COMMANDS.contains(&job.command.as_str()) {
        return config;
    }

    match build {
        Some(build) => {
            config.insert(
                ARCHIVE_URL_KEY.to_string(),
                Value::String(build.archive_url.clone()),
            );
            config.insert(REVISION_KEY.to_string(), Value::String(build.revision.clone()));
        }
        None => warn!(
            job = %job.name,
            cmd = %job.command,
            "Command expects build provenance but none was detected"
        ),
    }
    config
}

fn status_content(job: &JobDefinition, masked: ConfigMap, uids: Vec<Uid>) -> StatusContent {
    StatusContent {
        job_name: job.name.clone(),
        platform: job.platform_build.clone(),
        topic: job.topic.clone(),
        amount: job.amount,
        cmd: job.command.clone(),
        cmd_config: masked,
        task_uid_list: uids,
        failed_uid: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tripwire_core::DetectionMode;

    fn job(command: &str) -> JobDefinition {
        JobDefinition {
            name: "B".to_string(),
            enabled: true,
            topic: "win64".to_string(),
            platform_build: "win64".to_string(),
            interval_minutes: 10,
            command: command.to_string(),
            amount: 1,
            overwrite_config: json!({"MAX_RUN": 30}).as_object().cloned().unwrap_or_default(),
            detection: DetectionMode::Timestamp,
        }
    }

    fn build() -> BuildInfo {
        BuildInfo {
            archive_url: "https://archive.example/2020-02-02-02-00-00/".to_string(),
            revision: "abc123".to_string(),
            timestamp: "2020-02-02T02:00:00".to_string(),
        }
    }

    #[test]
    fn test_provenance_command_is_enriched() {
        let config = enrich_config(&job("download-specify-nightly"), Some(&build()));
        assert_eq!(config[REVISION_KEY], json!("abc123"));
        assert_eq!(
            config[ARCHIVE_URL_KEY],
            json!("https://archive.example/2020-02-02-02-00-00/")
        );
        assert_eq!(config["MAX_RUN"], json!(30));
    }

    #[test]
    fn test_other_commands_pass_through() {
        let job = job("download-latest-nightly");
        assert_eq!(enrich_config(&job, Some(&build())), job.overwrite_config);
    }

    #[test]
    fn test_provenance_without_build_keeps_config() {
        let job = job("run-hasal-on-specify-nightly");
        let config = enrich_config(&job, None);
        assert!(!config.contains_key(REVISION_KEY));
        assert_eq!(config, job.overwrite_config);
    }
}
