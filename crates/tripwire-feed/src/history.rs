//! HTTP adapter for the build history service.
//!
//! The service owns the archive/perfherder correlation; tripwire only asks
//! it to rebuild a platform's table and reads the result back. The last
//! table fetched per platform is memoized so change checks between
//! refreshes do not hit the service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use tripwire_core::ports::BuildHistory;
use tripwire_core::{BuildInfo, Error, Result};

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    days: u32,
    suite_white_list: &'a [String],
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    archive_url: String,
    revision: String,
}

/// Build history service reached over HTTP.
pub struct HttpBuildHistory {
    base_url: String,
    client: reqwest::Client,
    tables: RwLock<HashMap<String, BTreeMap<String, BuildInfo>>>,
}

impl HttpBuildHistory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            tables: RwLock::new(HashMap::new()),
        })
    }

    async fn fetch_table(&self, platform: &str) -> Result<BTreeMap<String, BuildInfo>> {
        let url = format!("{}/platforms/{}/history", self.base_url, platform);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::History(format!("GET {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::History(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }

        let entries: BTreeMap<String, HistoryEntry> = response
            .json()
            .await
            .map_err(|e| Error::History(format!("Invalid history from {}: {}", url, e)))?;

        Ok(entries
            .into_iter()
            .map(|(timestamp, entry)| {
                let info = BuildInfo {
                    archive_url: entry.archive_url,
                    revision: entry.revision,
                    timestamp: timestamp.clone(),
                };
                (timestamp, info)
            })
            .collect())
    }
}

#[async_trait]
impl BuildHistory for HttpBuildHistory {
    async fn history(&self, platform: &str) -> Result<BTreeMap<String, BuildInfo>> {
        if let Some(table) = self.tables.read().await.get(platform) {
            debug!(platform = %platform, entries = table.len(), "History cache hit");
            return Ok(table.clone());
        }

        let table = self.fetch_table(platform).await?;
        self.tables
            .write()
            .await
            .insert(platform.to_string(), table.clone());
        Ok(table)
    }

    async fn refresh(&self, platform: &str, days: u32, suite_white_list: &[String]) -> Result<()> {
        let url = format!("{}/platforms/{}/refresh", self.base_url, platform);
        info!(platform = %platform, days, "Generating latest backfill table");

        let response = self
            .client
            .post(&url)
            .json(&RefreshRequest {
                days,
                suite_white_list,
            })
            .send()
            .await
            .map_err(|e| Error::History(format!("POST {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::History(format!(
                "POST {} returned {}",
                url,
                response.status()
            )));
        }

        let table = self.fetch_table(platform).await?;
        info!(platform = %platform, entries = table.len(), "Backfill table refreshed");
        self.tables.write().await.insert(platform.to_string(), table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn history_body(revision: &str) -> serde_json::Value {
        serde_json::json!({
            "2020-02-01T02:00:00": {"archive_url": "https://archive/a/", "revision": "aaa111"},
            "2020-02-02T02:00:00": {"archive_url": "https://archive/b/", "revision": revision}
        })
    }

    #[tokio::test]
    async fn test_history_fills_timestamp() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/platforms/win64/history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(history_body("abc123")))
            .mount(&server)
            .await;

        let history = HttpBuildHistory::new(server.uri(), Duration::from_secs(5)).unwrap();
        let table = history.history("win64").await.unwrap();

        let (latest, info) = table.iter().next_back().unwrap();
        assert_eq!(latest, "2020-02-02T02:00:00");
        assert_eq!(info.revision, "abc123");
        assert_eq!(info.timestamp, "2020-02-02T02:00:00");
    }

    #[tokio::test]
    async fn test_history_is_memoized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/platforms/win64/history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(history_body("abc123")))
            .expect(1)
            .mount(&server)
            .await;

        let history = HttpBuildHistory::new(server.uri(), Duration::from_secs(5)).unwrap();
        history.history("win64").await.unwrap();
        history.history("win64").await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_posts_window_and_replaces_table() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/platforms/win64/refresh"))
            .and(body_json(serde_json::json!({"days": 14, "suite_white_list": ["tp5"]})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/platforms/win64/history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(history_body("def456")))
            .mount(&server)
            .await;

        let history = HttpBuildHistory::new(server.uri(), Duration::from_secs(5)).unwrap();
        history
            .refresh("win64", 14, &["tp5".to_string()])
            .await
            .unwrap();

        let table = history.history("win64").await.unwrap();
        assert_eq!(table.values().next_back().unwrap().revision, "def456");
    }

    #[tokio::test]
    async fn test_history_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let history = HttpBuildHistory::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = history.history("win64").await.unwrap_err();
        assert!(matches!(err, Error::History(_)));
    }
}
