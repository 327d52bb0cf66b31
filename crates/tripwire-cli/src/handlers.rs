//! Command handlers.

use crate::commands::ResetMode;
use crate::config::TriggerConfig;
use anyhow::{Context, bail};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tripwire_core::RunId;
use tripwire_feed::{BuildFeedClient, HashDetector, HttpBuildHistory, TimestampDetector};
use tripwire_nats::NatsTaskBroker;
use tripwire_scheduler::{
    DailyRotatingLog, Dispatcher, FileStatusRecorder, QueueAdmin, SignatureStore, TriggerEngine,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn load(path: &Path) -> anyhow::Result<TriggerConfig> {
    let mut config = TriggerConfig::from_file(path)
        .with_context(|| format!("loading trigger config {}", path.display()))?;
    config.apply_env();
    Ok(config)
}

/// Run the engine until Ctrl-C.
pub async fn run(path: &Path, skip_first_query: bool, skip_queue_reset: bool) -> anyhow::Result<()> {
    let config = load(path)?;
    config.validate_credentials()?;

    let (jobs, invalid) = config.job_definitions();
    if !invalid.is_empty() {
        warn!(skipped = invalid.len(), "Some jobs are invalid and will not be scheduled");
    }

    let broker = Arc::new(NatsTaskBroker::connect(config.nats_config()).await?);
    let history = Arc::new(HttpBuildHistory::new(
        config.history.url.clone(),
        config.history_timeout(),
    )?);
    let feed = Arc::new(BuildFeedClient::new(config.archive.clone(), history.clone())?);

    let recorder = Arc::new(FileStatusRecorder::new(config.status_dir.clone()));
    let dispatcher = Arc::new(Dispatcher::new(broker.clone(), recorder));

    if skip_queue_reset {
        info!("Skipping queue reset");
    } else {
        let report = QueueAdmin::new(broker.clone()).reconcile_queues(&jobs).await;
        info!(
            recreated = report.recreated.len(),
            failed = report.failed.len(),
            "Queue reset done"
        );
    }

    let engine = TriggerEngine::new(
        config.engine_settings(skip_first_query),
        broker.clone(),
        history,
        Arc::new(SignatureStore::new(config.signature_dir.clone())),
        dispatcher,
        Arc::new(HashDetector::new(feed.clone())),
        Arc::new(TimestampDetector::new(feed)),
        Arc::new(DailyRotatingLog::new(config.mgt_log_path.clone())),
    );

    let scheduled = engine.schedule(&jobs).await;
    info!(jobs = scheduled.len(), "Trigger running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    if !engine.shutdown(SHUTDOWN_GRACE).await {
        error!("Jobs still running after the grace period");
    }
    broker.shutdown().await?;
    Ok(())
}

/// Delete stored signatures for a job.
pub async fn reset(path: &Path, job: &str, mode: ResetMode) -> anyhow::Result<()> {
    let config = load(path)?;
    let store = SignatureStore::new(config.signature_dir.clone());

    for mode in mode.modes() {
        if store.reset(mode, job).await? {
            println!("Removed {} signature of {}", mode, job);
        } else {
            println!("No {} signature stored for {}", mode, job);
        }
    }
    Ok(())
}

/// Report valid and invalid jobs.
pub fn validate(path: &Path) -> anyhow::Result<()> {
    let config = load(path)?;
    let (jobs, invalid) = config.job_definitions();

    println!("Config {} parsed", path.display());
    if let Err(e) = config.validate_credentials() {
        println!("  ! {}", e);
    }

    println!("  Jobs: {}", jobs.len());
    for job in &jobs {
        println!(
            "    - {} [{}] topic={} platform={} every {}m x{} ({}){}",
            job.name,
            job.command,
            job.topic,
            job.platform_build,
            job.interval_minutes,
            job.amount,
            job.detection,
            if job.enabled { "" } else { " disabled" }
        );
    }

    if !invalid.is_empty() {
        println!("  Invalid: {}", invalid.len());
        for e in &invalid {
            println!("    - {}", e);
        }
        bail!("{} invalid job(s)", invalid.len());
    }
    Ok(())
}

/// Print a run's status records, or list runs when no id is given.
pub async fn status(path: &Path, run_id: Option<String>) -> anyhow::Result<()> {
    let config = load(path)?;
    let recorder = FileStatusRecorder::new(config.status_dir.clone());

    let Some(run_id) = run_id else {
        for run in recorder.list_runs().await? {
            println!("{}", run);
        }
        return Ok(());
    };

    for record in recorder.read_run(&RunId::from_raw(run_id)).await? {
        println!("{}", serde_json::to_string_pretty(&record)?);
    }
    Ok(())
}
