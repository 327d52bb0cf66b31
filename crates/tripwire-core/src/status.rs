//! Dispatch lifecycle records.

use crate::ids::{RunId, Uid};
use crate::job::ConfigMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle phase of one dispatch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Started,
    /// Fan-out stopped on a publish failure.
    Aborted,
    Completed,
}

impl Phase {
    /// Ordering marker written next to the phase. Not a real percentage.
    pub fn percentage(&self) -> u32 {
        match self {
            Phase::Started => 100,
            Phase::Aborted => 500,
            Phase::Completed => 900,
        }
    }
}

/// Snapshot of what a dispatch published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusContent {
    pub job_name: String,
    pub platform: String,
    pub topic: String,
    pub amount: u32,
    pub cmd: String,
    /// Always masked before it gets here.
    pub cmd_config: ConfigMap,
    pub task_uid_list: Vec<Uid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_uid: Option<Uid>,
}

/// One append-only entry in a run's status artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub job_run_id: RunId,
    pub phase: Phase,
    pub percentage: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<StatusContent>,
    pub recorded_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn new(job_run_id: RunId, phase: Phase, content: Option<StatusContent>) -> Self {
        Self {
            job_run_id,
            phase,
            percentage: phase.percentage(),
            content,
            recorded_at: Utc::now(),
        }
    }
}
