//! Wiring of trigger jobs and housekeeping timers onto one [`Scheduler`].

use crate::dispatcher::Dispatcher;
use crate::jobs::{HistoryRefreshJob, MgtListenerJob, TriggerJob};
use crate::rotating::DailyRotatingLog;
use crate::scheduler::Scheduler;
use crate::signature::SignatureStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{error, info};
use tripwire_core::ports::{BuildHistory, ChangeDetector, TaskBroker};
use tripwire_core::{DetectionMode, JobDefinition};

/// Knobs for the housekeeping side of the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// History window passed to each refresh.
    pub backfill_days: u32,
    pub suite_white_list: Vec<String>,
    /// Platforms refreshed even when no job watches them.
    pub default_platforms: Vec<String>,
    pub mgt_topic: String,
    /// Skip the synchronous history refresh before the first tick.
    pub skip_first_query: bool,
    pub listener_period: Duration,
    pub refresh_period: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            backfill_days: 14,
            suite_white_list: vec![],
            default_platforms: vec!["win64".to_string()],
            mgt_topic: "mgt".to_string(),
            skip_first_query: false,
            listener_period: Duration::from_secs(10),
            refresh_period: Duration::from_secs(10 * 60),
        }
    }
}

/// Owns the scheduler and every collaborator its jobs need.
pub struct TriggerEngine {
    settings: EngineSettings,
    scheduler: Scheduler,
    broker: Arc<dyn TaskBroker>,
    history: Arc<dyn BuildHistory>,
    store: Arc<SignatureStore>,
    dispatcher: Arc<Dispatcher>,
    hash_detector: Arc<dyn ChangeDetector>,
    timestamp_detector: Arc<dyn ChangeDetector>,
    mgt_log: Arc<DailyRotatingLog>,
}

impl TriggerEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: EngineSettings,
        broker: Arc<dyn TaskBroker>,
        history: Arc<dyn BuildHistory>,
        store: Arc<SignatureStore>,
        dispatcher: Arc<Dispatcher>,
        hash_detector: Arc<dyn ChangeDetector>,
        timestamp_detector: Arc<dyn ChangeDetector>,
        mgt_log: Arc<DailyRotatingLog>,
    ) -> Self {
        Self {
            settings,
            scheduler: Scheduler::new(),
            broker,
            history,
            store,
            dispatcher,
            hash_detector,
            timestamp_detector,
            mgt_log,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Default platforms plus every enabled job's platform, sorted.
    pub fn enabled_platforms(&self, jobs: &[JobDefinition]) -> Vec<String> {
        enabled_platforms(&self.settings.default_platforms, jobs)
    }

    fn detector_for(&self, mode: DetectionMode) -> Arc<dyn ChangeDetector> {
        match mode {
            DetectionMode::Hash => self.hash_detector.clone(),
            DetectionMode::Timestamp => self.timestamp_detector.clone(),
        }
    }

    /// Register the listener, the history refreshers and one timer per
    /// enabled job. Returns the ids of the trigger jobs scheduled.
    pub async fn schedule(&self, jobs: &[JobDefinition]) -> Vec<String> {
        let settings = &self.settings;

        info!(log = %self.mgt_log.base().display(), "Adding operational message listener");
        self.scheduler.add_job(
            Arc::new(MgtListenerJob::new(
                self.broker.clone(),
                settings.mgt_topic.clone(),
                self.mgt_log.clone(),
            )),
            settings.listener_period,
        );

        let platforms = self.enabled_platforms(jobs);
        if !settings.skip_first_query {
            for platform in &platforms {
                info!(platform = %platform, "Generating initial build history");
                if let Err(e) = self
                    .history
                    .refresh(platform, settings.backfill_days, &settings.suite_white_list)
                    .await
                {
                    error!(platform = %platform, error = %e, "Initial history refresh failed");
                }
            }
        }

        for platform in &platforms {
            self.scheduler.add_job(
                Arc::new(HistoryRefreshJob::new(
                    platform.clone(),
                    self.history.clone(),
                    settings.backfill_days,
                    settings.suite_white_list.clone(),
                )),
                settings.refresh_period,
            );
        }

        let mut scheduled = Vec::new();
        for job in jobs {
            if !job.enabled {
                info!(job = %job.name, "Job disabled");
                continue;
            }

            let period = Duration::from_secs(job.interval_minutes * 60);
            let trigger = TriggerJob::new(
                job.clone(),
                self.store.clone(),
                self.detector_for(job.detection),
                self.dispatcher.clone(),
            );
            self.scheduler.add_job(Arc::new(trigger), period);
            info!(
                job = %job.name,
                topic = %job.topic,
                platform = %job.platform_build,
                interval_minutes = job.interval_minutes,
                mode = %job.detection,
                "Trigger job added"
            );
            scheduled.push(job.name.clone());
        }

        scheduled
    }

    /// Stop all timers, waiting up to `grace` for running jobs.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.scheduler.shutdown(grace).await
    }
}

pub fn enabled_platforms(defaults: &[String], jobs: &[JobDefinition]) -> Vec<String> {
    defaults
        .iter()
        .cloned()
        .chain(
            jobs.iter()
                .filter(|job| job.enabled)
                .map(|job| job.platform_build.clone()),
        )
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(name: &str, platform: &str, enabled: bool) -> JobDefinition {
        JobDefinition {
            name: name.to_string(),
            enabled,
            topic: "win7".to_string(),
            platform_build: platform.to_string(),
            interval_minutes: 10,
            command: "download-latest-nightly".to_string(),
            amount: 1,
            overwrite_config: Default::default(),
            detection: DetectionMode::Hash,
        }
    }

    #[test]
    fn test_enabled_platforms() {
        let jobs = vec![
            job("a", "win32", true),
            job("b", "win64", true),
            job("c", "mac", false),
            job("d", "linux64", true),
        ];
        let platforms = enabled_platforms(&["win64".to_string()], &jobs);
        assert_eq!(platforms, vec!["linux64", "win32", "win64"]);
    }

    #[test]
    fn test_default_settings() {
        let settings = EngineSettings::default();
        assert_eq!(settings.backfill_days, 14);
        assert_eq!(settings.refresh_period, Duration::from_secs(600));
        assert_eq!(settings.listener_period, Duration::from_secs(10));
        assert_eq!(settings.mgt_topic, "mgt");
    }
}
