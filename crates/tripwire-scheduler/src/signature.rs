//! Durable per-job feed signatures.
//!
//! One record per (detection mode, job name) under
//! `<root>/<mode>/<job key>`, holding a single string. Records are replaced by
//! write-then-rename so a crash mid-write never leaves a truncated value.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, warn};
use tripwire_core::ports::ChangeDetector;
use tripwire_core::{BuildInfo, DetectionMode, Error, Result, job_key};

/// Outcome of one change check.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeResult {
    pub changed: bool,
    /// Provenance of the new build, for detectors that know it.
    pub build: Option<BuildInfo>,
}

impl ChangeResult {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn changed(build: Option<BuildInfo>) -> Self {
        Self {
            changed: true,
            build,
        }
    }
}

/// File-backed signature records.
#[derive(Debug, Clone)]
pub struct SignatureStore {
    root: PathBuf,
}

impl SignatureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace(&self, mode: DetectionMode) -> PathBuf {
        self.root.join(mode.namespace())
    }

    /// Path of the record for `job_name` in `mode`.
    pub fn record_path(&self, mode: DetectionMode, job_name: &str) -> PathBuf {
        self.namespace(mode).join(job_key(job_name))
    }

    /// Make sure the namespace directory exists, replacing a stray file.
    async fn ensure_namespace(&self, mode: DetectionMode) -> Result<PathBuf> {
        let dir = self.namespace(mode);
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => return Ok(dir),
            Ok(_) => {
                warn!(path = %dir.display(), "Signature folder is a file, re-creating");
                fs::remove_file(&dir).await.map_err(|e| storage_error(&dir, e))?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(storage_error(&dir, e)),
        }
        fs::create_dir_all(&dir).await.map_err(|e| storage_error(&dir, e))?;
        Ok(dir)
    }

    /// Stored signature, or `None` when the job has never been checked.
    pub async fn read(&self, mode: DetectionMode, job_name: &str) -> Result<Option<String>> {
        let path = self.record_path(mode, job_name);
        match fs::read_to_string(&path).await {
            Ok(content) => {
                let value = content.lines().next().unwrap_or_default().trim().to_string();
                if value.is_empty() {
                    warn!(path = %path.display(), "Empty signature record ignored");
                    Ok(None)
                } else {
                    Ok(Some(value))
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(&path, e)),
        }
    }

    /// Replace the stored signature.
    pub async fn write(&self, mode: DetectionMode, job_name: &str, signature: &str) -> Result<()> {
        if signature.trim().is_empty() {
            return Err(Error::Storage(format!(
                "Refusing to store an empty signature for job {}",
                job_name
            )));
        }

        self.ensure_namespace(mode).await?;
        let path = self.record_path(mode, job_name);
        let tmp = path.with_file_name(format!(".{}.tmp", job_key(job_name)));

        fs::write(&tmp, signature)
            .await
            .map_err(|e| storage_error(&tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_error(&path, e))?;
        Ok(())
    }

    /// Delete a job's record. Deleting an absent record succeeds.
    ///
    /// Returns whether a record was removed.
    pub async fn reset(&self, mode: DetectionMode, job_name: &str) -> Result<bool> {
        let path = self.record_path(mode, job_name);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {
                fs::remove_file(&path)
                    .await
                    .map_err(|e| storage_error(&path, e))?;
                info!(job = %job_name, mode = %mode, "Signature record removed");
                Ok(true)
            }
            Ok(_) => Err(Error::Storage(format!(
                "The {} is not a file",
                path.display()
            ))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No signature record to remove");
                Ok(false)
            }
            Err(e) => Err(storage_error(&path, e)),
        }
    }

    /// Compare the feed's current signature with the stored one and record
    /// the new value on change.
    ///
    /// Never fails: fetch and storage problems are logged and reported as
    /// "unchanged", leaving any existing record untouched.
    pub async fn check_and_update(
        &self,
        job_name: &str,
        platform: &str,
        detector: &dyn ChangeDetector,
    ) -> ChangeResult {
        let mode = detector.mode();

        if let Err(e) = self.ensure_namespace(mode).await {
            error!(job = %job_name, error = %e, "Signature folder unavailable");
            return ChangeResult::unchanged();
        }

        let observation = match detector.observe(platform).await {
            Ok(observation) => observation,
            Err(e) => {
                error!(job = %job_name, platform = %platform, mode = %mode, error = %e, "Feed check failed");
                return ChangeResult::unchanged();
            }
        };

        let latest = observation.signature.trim();
        if latest.is_empty() {
            error!(job = %job_name, platform = %platform, mode = %mode, "Feed returned an empty signature");
            return ChangeResult::unchanged();
        }

        let stored = match self.read(mode, job_name).await {
            Ok(stored) => stored,
            Err(e) => {
                error!(job = %job_name, error = %e, "Cannot read signature record");
                return ChangeResult::unchanged();
            }
        };

        match stored.as_deref() {
            Some(origin) if origin == latest => return ChangeResult::unchanged(),
            Some(origin) => info!(
                job = %job_name,
                platform = %platform,
                latest = %latest,
                origin = %origin,
                "Signature changed"
            ),
            None => info!(
                job = %job_name,
                platform = %platform,
                latest = %latest,
                "First signature, no origin"
            ),
        }

        if let Err(e) = self.write(mode, job_name, latest).await {
            error!(job = %job_name, error = %e, "Cannot persist signature, treating as unchanged");
            return ChangeResult::unchanged();
        }

        ChangeResult::changed(observation.build)
    }
}

fn storage_error(path: &Path, err: std::io::Error) -> Error {
    Error::Storage(format!("{}: {}", path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tripwire_core::ports::Observation;

    /// Detector returning a scripted sequence of observations.
    struct Scripted {
        mode: DetectionMode,
        results: Mutex<Vec<Result<Observation>>>,
    }

    impl Scripted {
        fn new(mode: DetectionMode, results: Vec<Result<Observation>>) -> Self {
            let mut results = results;
            results.reverse();
            Self {
                mode,
                results: Mutex::new(results),
            }
        }

        fn hashes(values: &[&str]) -> Self {
            Self::new(
                DetectionMode::Hash,
                values
                    .iter()
                    .map(|v| {
                        Ok(Observation {
                            signature: v.to_string(),
                            build: None,
                        })
                    })
                    .collect(),
            )
        }
    }

    #[async_trait]
    impl ChangeDetector for Scripted {
        fn mode(&self) -> DetectionMode {
            self.mode
        }

        async fn observe(&self, _platform: &str) -> Result<Observation> {
            self.results
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(Error::Fetch("script exhausted".to_string())))
        }
    }

    #[tokio::test]
    async fn test_first_check_always_changes() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(dir.path());
        let detector = Scripted::hashes(&["deadbeef"]);

        let result = store.check_and_update("A", "win64", &detector).await;

        assert!(result.changed);
        assert_eq!(
            store.read(DetectionMode::Hash, "A").await.unwrap().as_deref(),
            Some("deadbeef")
        );
    }

    #[tokio::test]
    async fn test_unchanged_on_same_signature() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(dir.path());
        let detector = Scripted::hashes(&["deadbeef", "deadbeef"]);

        assert!(store.check_and_update("A", "win64", &detector).await.changed);
        assert!(!store.check_and_update("A", "win64", &detector).await.changed);
    }

    #[tokio::test]
    async fn test_changed_signature_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(dir.path());
        let detector = Scripted::hashes(&["deadbeef", "cafebabe"]);

        store.check_and_update("A", "win64", &detector).await;
        let result = store.check_and_update("A", "win64", &detector).await;

        assert!(result.changed);
        assert_eq!(
            store.read(DetectionMode::Hash, "A").await.unwrap().as_deref(),
            Some("cafebabe")
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(dir.path());
        store.write(DetectionMode::Hash, "A", "deadbeef").await.unwrap();

        let detector = Scripted::new(
            DetectionMode::Hash,
            vec![Err(Error::Fetch("503".to_string()))],
        );
        let result = store.check_and_update("A", "win64", &detector).await;

        assert_eq!(result, ChangeResult::unchanged());
        assert_eq!(
            store.read(DetectionMode::Hash, "A").await.unwrap().as_deref(),
            Some("deadbeef")
        );
    }

    #[tokio::test]
    async fn test_empty_signature_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(dir.path());
        store.write(DetectionMode::Hash, "A", "deadbeef").await.unwrap();

        let detector = Scripted::hashes(&["  "]);
        assert!(!store.check_and_update("A", "win64", &detector).await.changed);
        assert_eq!(
            store.read(DetectionMode::Hash, "A").await.unwrap().as_deref(),
            Some("deadbeef")
        );
    }

    #[tokio::test]
    async fn test_modes_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(dir.path());
        store.write(DetectionMode::Hash, "A", "deadbeef").await.unwrap();

        assert_eq!(store.read(DetectionMode::Timestamp, "A").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_timestamp_change_carries_build() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(dir.path());
        let build = BuildInfo {
            archive_url: "https://archive/b/".to_string(),
            revision: "abc123".to_string(),
            timestamp: "2020-02-02T02:00:00".to_string(),
        };
        let detector = Scripted::new(
            DetectionMode::Timestamp,
            vec![Ok(Observation {
                signature: "2020-02-02T02:00:00".to_string(),
                build: Some(build.clone()),
            })],
        );

        let result = store.check_and_update("B", "win64", &detector).await;
        assert!(result.changed);
        assert_eq!(result.build, Some(build));
    }

    #[tokio::test]
    async fn test_unreadable_record_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(dir.path());
        // A directory where the record file should be cannot be read as one.
        tokio::fs::create_dir_all(store.record_path(DetectionMode::Hash, "A"))
            .await
            .unwrap();

        let detector = Scripted::hashes(&["deadbeef"]);
        assert!(!store.check_and_update("A", "win64", &detector).await.changed);
    }

    #[tokio::test]
    async fn test_stray_file_replaced_by_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(dir.path());
        tokio::fs::write(dir.path().join("hash"), "junk").await.unwrap();

        let detector = Scripted::hashes(&["deadbeef"]);
        assert!(store.check_and_update("A", "win64", &detector).await.changed);
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(dir.path());
        store.write(DetectionMode::Timestamp, "A", "2020").await.unwrap();

        assert!(store.reset(DetectionMode::Timestamp, "A").await.unwrap());
        assert!(!store.reset(DetectionMode::Timestamp, "A").await.unwrap());
        assert_eq!(store.read(DetectionMode::Timestamp, "A").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_similar_job_names_keep_separate_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(dir.path());
        let detector = Scripted::hashes(&["deadbeef", "deadbeef"]);

        assert!(store.check_and_update("win7/x64", "win64", &detector).await.changed);
        assert!(store.check_and_update("win7_x64", "win64", &detector).await.changed);
        assert_ne!(
            store.record_path(DetectionMode::Hash, "win7/x64"),
            store.record_path(DetectionMode::Hash, "win7_x64")
        );
    }

    #[tokio::test]
    async fn test_dot_job_names_stay_inside_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(dir.path());
        let namespace = dir.path().join(DetectionMode::Hash.namespace());

        for name in [".", "..", "../escape"] {
            assert_eq!(
                store.record_path(DetectionMode::Hash, name).parent(),
                Some(namespace.as_path())
            );
            store.write(DetectionMode::Hash, name, "cafebabe").await.unwrap();
            assert_eq!(
                store.read(DetectionMode::Hash, name).await.unwrap().as_deref(),
                Some("cafebabe")
            );
        }
    }
}
