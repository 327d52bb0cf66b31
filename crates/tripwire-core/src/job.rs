//! Job definitions and the messages they fan out.

use crate::ids::Uid;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Free-form command configuration merged into each task payload.
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

pub const DEFAULT_INTERVAL_MINUTES: u64 = 10;
pub const DEFAULT_AMOUNT: u32 = 1;

/// How a job decides that its feed changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    /// Digest of the newest metadata file in the archive listing.
    Hash,
    /// Newest timestamp reported by the build history service.
    #[default]
    Timestamp,
}

impl DetectionMode {
    pub const ALL: [DetectionMode; 2] = [DetectionMode::Hash, DetectionMode::Timestamp];

    /// Directory name under the signature root; keeps the modes apart.
    pub fn namespace(&self) -> &'static str {
        match self {
            DetectionMode::Hash => "hash",
            DetectionMode::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

impl FromStr for DetectionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hash" | "md5" => Ok(DetectionMode::Hash),
            "timestamp" => Ok(DetectionMode::Timestamp),
            other => Err(Error::Config(format!("Unknown detection mode: {}", other))),
        }
    }
}

/// A job record exactly as it appears in the trigger configuration.
///
/// Every key is optional so that validation can report which one is missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawJobConfig {
    #[serde(default)]
    pub enable: bool,
    pub topic: Option<String>,
    pub platform_build: Option<String>,
    pub interval_minutes: Option<u64>,
    pub cmd: Option<String>,
    pub amount: Option<u32>,
    #[serde(default)]
    pub configs: ConfigMap,
    pub detect: Option<DetectionMode>,
}

/// A validated trigger job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    pub enabled: bool,
    pub topic: String,
    pub platform_build: String,
    pub interval_minutes: u64,
    pub command: String,
    pub amount: u32,
    pub overwrite_config: ConfigMap,
    pub detection: DetectionMode,
}

impl JobDefinition {
    /// Validate a raw record. `topic`, `platform_build` and `cmd` are required.
    pub fn from_raw(name: &str, raw: &RawJobConfig) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidJob {
            job: name.to_string(),
            reason,
        };
        let required = |key: &str, value: &Option<String>| -> Result<String> {
            match value.as_deref().map(str::trim) {
                Some(v) if !v.is_empty() => Ok(v.to_string()),
                _ => Err(invalid(format!("missing required key [{}]", key))),
            }
        };

        let topic = required("topic", &raw.topic)?;
        let platform_build = required("platform_build", &raw.platform_build)?;
        let command = required("cmd", &raw.cmd)?;

        let amount = raw.amount.unwrap_or(DEFAULT_AMOUNT);
        if amount == 0 {
            return Err(invalid("amount must be at least 1".to_string()));
        }
        let interval_minutes = raw.interval_minutes.unwrap_or(DEFAULT_INTERVAL_MINUTES);
        if interval_minutes == 0 {
            return Err(invalid("interval_minutes must be at least 1".to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            enabled: raw.enable,
            topic,
            platform_build,
            interval_minutes,
            command,
            amount,
            overwrite_config: raw.configs.clone(),
            detection: raw.detect.unwrap_or_default(),
        })
    }
}

/// Provenance of the build that triggered a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub archive_url: String,
    pub revision: String,
    /// History key this build was indexed under.
    #[serde(default)]
    pub timestamp: String,
}

/// One unit of work published to a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub uid: Uid,
    pub topic: String,
    pub command: String,
    pub config: ConfigMap,
    /// 1-based position within the fan-out.
    pub amount_index: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(yaml: &str) -> RawJobConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_from_raw_applies_defaults() {
        let job = JobDefinition::from_raw(
            "win7_x64",
            &raw("enable: true\ntopic: win7\nplatform_build: win64\ncmd: download-latest-nightly\n"),
        )
        .unwrap();

        assert!(job.enabled);
        assert_eq!(job.interval_minutes, DEFAULT_INTERVAL_MINUTES);
        assert_eq!(job.amount, DEFAULT_AMOUNT);
        assert_eq!(job.detection, DetectionMode::Timestamp);
        assert!(job.overwrite_config.is_empty());
    }

    #[test]
    fn test_from_raw_reports_missing_key() {
        let err = JobDefinition::from_raw("broken", &raw("enable: true\ntopic: win7\ncmd: x\n"))
            .unwrap_err();
        match err {
            Error::InvalidJob { job, reason } => {
                assert_eq!(job, "broken");
                assert!(reason.contains("platform_build"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_from_raw_rejects_zero_amount() {
        let result = JobDefinition::from_raw(
            "zero",
            &raw("topic: t\nplatform_build: win64\ncmd: c\namount: 0\n"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_detection_mode_parse() {
        assert_eq!("hash".parse::<DetectionMode>().unwrap(), DetectionMode::Hash);
        assert_eq!(
            "timestamp".parse::<DetectionMode>().unwrap(),
            DetectionMode::Timestamp
        );
        assert!("sha".parse::<DetectionMode>().is_err());
    }
}
