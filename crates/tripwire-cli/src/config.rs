//! Trigger configuration file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;
use tripwire_core::{Error, JobDefinition, RawJobConfig, Result};
use tripwire_feed::ArchiveConfig;
use tripwire_nats::NatsConfig;
use tripwire_scheduler::EngineSettings;

/// Environment variable overriding `broker.username`.
pub const ENV_BROKER_USERNAME: &str = "TRIGGER_BROKER_USERNAME";
/// Environment variable overriding `broker.password`.
pub const ENV_BROKER_PASSWORD: &str = "TRIGGER_BROKER_PASSWORD";
/// Environment variable overriding `broker.url`.
pub const ENV_BROKER_URL: &str = "TRIGGER_BROKER_URL";

/// Everything `tripwire run` needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub history: HistorySection,
    /// Suites kept when the build history is rebuilt.
    #[serde(default)]
    pub suite_white_list_for_signature: Vec<String>,
    #[serde(default = "default_platforms")]
    pub default_platforms: Vec<String>,
    #[serde(default = "default_signature_dir")]
    pub signature_dir: PathBuf,
    #[serde(default = "default_status_dir")]
    pub status_dir: PathBuf,
    #[serde(default = "default_mgt_log_path")]
    pub mgt_log_path: PathBuf,
    #[serde(default = "default_mgt_topic")]
    pub mgt_topic: String,
    #[serde(default)]
    pub jobs: BTreeMap<String, RawJobConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSection {
    #[serde(default = "default_broker_url")]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            username: String::new(),
            password: String::new(),
            stream_name: default_stream_name(),
        }
    }
}

/// Where the build history service lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySection {
    #[serde(default = "default_history_url")]
    pub url: String,
    #[serde(default = "default_backfill_days")]
    pub backfill_days: u32,
    #[serde(default = "default_history_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            url: default_history_url(),
            backfill_days: default_backfill_days(),
            timeout_secs: default_history_timeout_secs(),
        }
    }
}

fn default_broker_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_stream_name() -> String {
    "TRIPWIRE_TASKS".to_string()
}

fn default_history_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_backfill_days() -> u32 {
    14
}

fn default_history_timeout_secs() -> u64 {
    30
}

fn default_platforms() -> Vec<String> {
    vec!["win64".to_string()]
}

fn default_signature_dir() -> PathBuf {
    PathBuf::from(".signatures")
}

fn default_status_dir() -> PathBuf {
    PathBuf::from(".status")
}

fn default_mgt_log_path() -> PathBuf {
    PathBuf::from("rotating_mgt.log")
}

fn default_mgt_topic() -> String {
    "mgt".to_string()
}

impl TriggerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| Error::Config(format!("Invalid trigger config: {}", e)))
    }

    /// Apply `TRIGGER_BROKER_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_BROKER_URL) {
            self.broker.url = url;
        }
        if let Some(username) = lookup(ENV_BROKER_USERNAME) {
            self.broker.username = username;
        }
        if let Some(password) = lookup(ENV_BROKER_PASSWORD) {
            self.broker.password = password;
        }
    }

    /// The process must not start without a broker account.
    pub fn validate_credentials(&self) -> Result<()> {
        if self.broker.username.trim().is_empty() || self.broker.password.trim().is_empty() {
            return Err(Error::Config(
                "Cannot access the broker: no account information".to_string(),
            ));
        }
        Ok(())
    }

    /// Valid job definitions, plus an error for every job that was skipped.
    pub fn job_definitions(&self) -> (Vec<JobDefinition>, Vec<Error>) {
        let mut valid = Vec::new();
        let mut invalid = Vec::new();

        for (name, raw) in &self.jobs {
            match JobDefinition::from_raw(name, raw) {
                Ok(job) => valid.push(job),
                Err(e) => {
                    warn!(job = %name, error = %e, "Invalid job skipped");
                    invalid.push(e);
                }
            }
        }

        (valid, invalid)
    }

    pub fn nats_config(&self) -> NatsConfig {
        let mut config = NatsConfig::default()
            .with_credentials(self.broker.username.clone(), self.broker.password.clone())
            .with_stream_name(self.broker.stream_name.clone());
        config.urls = self
            .broker
            .url
            .split(',')
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        config
    }

    pub fn history_timeout(&self) -> Duration {
        Duration::from_secs(self.history.timeout_secs)
    }

    pub fn engine_settings(&self, skip_first_query: bool) -> EngineSettings {
        EngineSettings {
            backfill_days: self.history.backfill_days,
            suite_white_list: self.suite_white_list_for_signature.clone(),
            default_platforms: self.default_platforms.clone(),
            mgt_topic: self.mgt_topic.clone(),
            skip_first_query,
            ..Default::default()
        }
    }
}
