//! File-backed status artifacts, one JSON-lines file per dispatch run.

use async_trait::async_trait;
use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use tripwire_core::ports::StatusSink;
use tripwire_core::{Error, Result, RunId, StatusRecord};

/// Appends status records to `<root>/<run_id>.jsonl`.
#[derive(Debug, Clone)]
pub struct FileStatusRecorder {
    root: PathBuf,
}

impl FileStatusRecorder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_path(&self, run_id: &RunId) -> PathBuf {
        self.root.join(format!("{}.jsonl", run_id))
    }

    /// All records of a run, in append order.
    pub async fn read_run(&self, run_id: &RunId) -> Result<Vec<StatusRecord>> {
        let path = self.run_path(run_id);
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| Error::Storage(format!("{}: {}", path.display(), e)))?;

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Error::from))
            .collect()
    }

    /// Run ids with a status artifact, oldest first.
    pub async fn list_runs(&self) -> Result<Vec<RunId>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(Error::Storage(format!("{}: {}", self.root.display(), e))),
        };

        let mut runs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(run) = name.strip_suffix(".jsonl") {
                runs.push(RunId::from_raw(run));
            }
        }
        runs.sort_by_key(|run| {
            let raw = run.as_str();
            raw.rsplit('_').next().unwrap_or(raw).to_string()
        });
        Ok(runs)
    }
}

#[async_trait]
impl StatusSink for FileStatusRecorder {
    async fn start_run(&self, job_name: &str) -> Result<RunId> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::Storage(format!("{}: {}", self.root.display(), e)))?;
        Ok(RunId::new(job_name, &Local::now()))
    }

    async fn append(&self, record: &StatusRecord) -> Result<()> {
        let path = self.run_path(&record.job_run_id);
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Error::Storage(format!("{}: {}", path.display(), e)))?;
        file.write_all(&line)
            .await
            .map_err(|e| Error::Storage(format!("{}: {}", path.display(), e)))?;
        file.flush().await?;

        debug!(run = %record.job_run_id, phase = ?record.phase, "Status recorded");
        Ok(())
    }
}
