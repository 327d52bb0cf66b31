//! The two change-detection strategies over [`BuildFeedClient`].

use crate::feed::BuildFeedClient;
use async_trait::async_trait;
use std::sync::Arc;
use tripwire_core::ports::{ChangeDetector, Observation};
use tripwire_core::{DetectionMode, Error, Result};

/// Signature = digest of the newest archive metadata file.
pub struct HashDetector {
    feed: Arc<BuildFeedClient>,
}

impl HashDetector {
    pub fn new(feed: Arc<BuildFeedClient>) -> Self {
        Self { feed }
    }
}

#[async_trait]
impl ChangeDetector for HashDetector {
    fn mode(&self) -> DetectionMode {
        DetectionMode::Hash
    }

    async fn observe(&self, platform: &str) -> Result<Observation> {
        let signature = self.feed.fetch_hash_signature(platform).await?;
        Ok(Observation {
            signature,
            build: None,
        })
    }
}

/// Signature = greatest timestamp in the build history.
pub struct TimestampDetector {
    feed: Arc<BuildFeedClient>,
}

impl TimestampDetector {
    pub fn new(feed: Arc<BuildFeedClient>) -> Self {
        Self { feed }
    }
}

#[async_trait]
impl ChangeDetector for TimestampDetector {
    fn mode(&self) -> DetectionMode {
        DetectionMode::Timestamp
    }

    async fn observe(&self, platform: &str) -> Result<Observation> {
        let table = self.feed.fetch_latest_build(platform).await?;
        let (latest, info) = table.into_iter().next_back().ok_or_else(|| {
            Error::History(format!(
                "Cannot retrieve the archive relational table of platform: {}",
                platform
            ))
        })?;

        let mut build = info;
        if build.timestamp.is_empty() {
            build.timestamp = latest.clone();
        }

        Ok(Observation {
            signature: latest,
            build: Some(build),
        })
    }
}
