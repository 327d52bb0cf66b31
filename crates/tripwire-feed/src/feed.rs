//! Archive listing and build history access.

use crate::platform::match_suffix;
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use tripwire_core::ports::BuildHistory;
use tripwire_core::{BuildInfo, Error, Result};
use url::Url;

/// Extension of the per-build metadata file hashed in hash mode.
const METADATA_EXT: &str = "json";

/// Where the nightly archive lives and how much of it to read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_root_url")]
    pub root_url: String,
    #[serde(default = "default_latest_folder")]
    pub latest_folder: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Read budget for hashing; larger resources are truncated.
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: usize,
}

fn default_root_url() -> String {
    "https://archive.mozilla.org".to_string()
}

fn default_latest_folder() -> String {
    "/pub/firefox/nightly/latest-mozilla-central/".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_max_download_bytes() -> usize {
    1024 * 1024
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root_url: default_root_url(),
            latest_folder: default_latest_folder(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_download_bytes: default_max_download_bytes(),
        }
    }
}

impl ArchiveConfig {
    pub fn new(root_url: impl Into<String>) -> Self {
        Self {
            root_url: root_url.into(),
            ..Default::default()
        }
    }

    pub fn with_latest_folder(mut self, folder: impl Into<String>) -> Self {
        self.latest_folder = folder.into();
        self
    }

    pub fn with_max_download_bytes(mut self, max: usize) -> Self {
        self.max_download_bytes = max;
        self
    }
}

/// Fetches feed signatures from the archive and the build history service.
pub struct BuildFeedClient {
    config: ArchiveConfig,
    root: Url,
    client: reqwest::Client,
    history: Arc<dyn BuildHistory>,
    link_re: Regex,
}

impl BuildFeedClient {
    pub fn new(config: ArchiveConfig, history: Arc<dyn BuildHistory>) -> Result<Self> {
        let root = Url::parse(&config.root_url)
            .map_err(|e| Error::Config(format!("Invalid archive root {}: {}", config.root_url, e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        let link_re = Regex::new(r#"href="([^"]*)""#)
            .map_err(|e| Error::Internal(format!("Invalid link pattern: {}", e)))?;

        Ok(Self {
            config,
            root,
            client,
            history,
            link_re,
        })
    }

    /// Digest of the newest metadata file for `platform`.
    pub async fn fetch_hash_signature(&self, platform: &str) -> Result<String> {
        let url = self.latest_metadata_url(platform).await?;
        self.capped_digest(&url).await
    }

    /// Timestamp -> build mapping from the history service, unmodified.
    pub async fn fetch_latest_build(&self, platform: &str) -> Result<BTreeMap<String, BuildInfo>> {
        self.history.history(platform).await
    }

    /// Entries of the latest-builds listing, file name -> href.
    pub async fn list_latest(&self) -> Result<BTreeMap<String, String>> {
        let url = self
            .root
            .join(&self.config.latest_folder)
            .map_err(|e| Error::Config(format!("Invalid latest folder: {}", e)))?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("Failed to list {}: {}", url, e)))?;

        if response.status() != StatusCode::OK {
            error!(code = %response.status(), link = %url, "Fetch builds failed");
            return Err(Error::Fetch(format!(
                "Listing {} returned {}",
                url,
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Fetch(format!("Failed to read listing {}: {}", url, e)))?;

        Ok(self.parse_listing(&body))
    }

    fn parse_listing(&self, body: &str) -> BTreeMap<String, String> {
        self.link_re
            .captures_iter(body)
            .filter_map(|caps| {
                let href = caps.get(1)?.as_str();
                let name = href.rsplit('/').next()?;
                if name.is_empty() {
                    None
                } else {
                    Some((name.to_string(), href.to_string()))
                }
            })
            .collect()
    }

    /// URL of the lexicographically greatest `*.{key}.json` entry.
    pub async fn latest_metadata_url(&self, platform: &str) -> Result<Url> {
        let suffix = match_suffix(platform, METADATA_EXT);
        let entries = self.list_latest().await?;

        let (name, href) = entries
            .iter()
            .filter(|(name, _)| name.ends_with(&suffix))
            .next_back()
            .ok_or_else(|| {
                Error::Fetch(format!("No listing entry ends with {}", suffix))
            })?;

        debug!(platform = %platform, file = %name, "Latest metadata file");
        self.root
            .join(href)
            .map_err(|e| Error::Fetch(format!("Invalid href {}: {}", href, e)))
    }

    /// SHA-256 of at most `max_download_bytes` of the resource, lowercase hex.
    pub async fn capped_digest(&self, url: &Url) -> Result<String> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("Failed to download {}: {}", url, e)))?;

        if response.status() != StatusCode::OK {
            return Err(Error::Fetch(format!(
                "Download {} returned {}",
                url,
                response.status()
            )));
        }

        let budget = self.config.max_download_bytes;
        let mut hasher = Sha256::new();
        let mut read = 0usize;

        while read < budget {
            let chunk = response
                .chunk()
                .await
                .map_err(|e| Error::Fetch(format!("Failed to read {}: {}", url, e)))?;
            match chunk {
                Some(bytes) => {
                    let take = bytes.len().min(budget - read);
                    hasher.update(&bytes[..take]);
                    read += take;
                }
                None => break,
            }
        }

        if read == 0 {
            return Err(Error::Fetch(format!("Downloaded nothing from {}", url)));
        }

        Ok(hex::encode(hasher.finalize()))
    }
}
