//! Remote sync of the exported proxy list
//!
//! The remote copy is merged by union: local entries are added, nothing local
//! ever deletes a remote line.

use std::collections::BTreeSet;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Local;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::config::SyncConfig;
use crate::http::WebClient;
use crate::pool::PoolStore;

const COMMITTER_NAME: &str = "rota-harvest";
const COMMITTER_EMAIL: &str = "rota-harvest@users.noreply.github.com";

/// Read/write access to a remote text blob
#[async_trait]
pub trait SyncGateway: Send + Sync {
    /// Current content, or an empty string on any failure
    async fn get_content(&self, owner: &str, repo: &str, path: &str, token: &str) -> String;

    /// Replace the content; true on success
    async fn update_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        token: &str,
        text: &str,
        message: &str,
    ) -> bool;
}

/// [`SyncGateway`] backed by the GitHub contents API
pub struct GithubGateway {
    client: WebClient,
    api_url: String,
}

impl GithubGateway {
    pub fn new(client: WebClient, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn contents_url(&self, owner: &str, repo: &str, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents{}",
            self.api_url,
            owner,
            repo,
            normalize_path(path)
        )
    }

    fn headers(token: &str) -> Option<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("token {}", token)).ok()?,
        );
        Some(headers)
    }

    async fn fetch_document(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        token: &str,
    ) -> Option<serde_json::Value> {
        let Some(headers) = Self::headers(token) else {
            error!("Sync token contains invalid header characters");
            return None;
        };

        let url = self.contents_url(owner, repo, path);
        let response = self.client.get_with(&url, headers).await;
        if !response.is_success() {
            warn!(status = response.status, "Could not read {}", url);
            return None;
        }
        response.json()
    }
}

#[async_trait]
impl SyncGateway for GithubGateway {
    async fn get_content(&self, owner: &str, repo: &str, path: &str, token: &str) -> String {
        let Some(doc) = self.fetch_document(owner, repo, path, token).await else {
            return String::new();
        };

        let encoded: String = doc
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();

        match BASE64.decode(encoded) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!("Remote content is not valid base64: {}", e);
                String::new()
            }
        }
    }

    async fn update_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        token: &str,
        text: &str,
        message: &str,
    ) -> bool {
        let Some(headers) = Self::headers(token) else {
            error!("Sync token contains invalid header characters");
            return false;
        };

        let sha = self
            .fetch_document(owner, repo, path, token)
            .await
            .and_then(|doc| doc.get("sha").and_then(|s| s.as_str()).map(str::to_string));

        let mut body = json!({
            "message": message,
            "content": BASE64.encode(text.as_bytes()),
            "committer": {
                "name": COMMITTER_NAME,
                "email": COMMITTER_EMAIL,
            },
        });
        if let Some(sha) = sha {
            body["sha"] = json!(sha);
        }

        let url = self.contents_url(owner, repo, path);
        let response = self.client.put_json(&url, headers, &body).await;
        if response.status == 200 || response.status == 201 {
            true
        } else {
            warn!(
                status = response.status,
                "Remote update of {} failed: {}",
                url,
                response.error.as_deref().unwrap_or(&response.body)
            );
            false
        }
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// What a sync attempt did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub success: bool,
    /// Lines read from the remote
    pub remote: usize,
    /// Local proxies offered for the merge
    pub local: usize,
    /// Lines in the merged list
    pub merged: usize,
}

/// Merge the pool's best proxies into the remote list and write it back
///
/// An empty remote read is treated as a failed read: nothing is written and
/// the outcome is unsuccessful.
#[instrument(skip_all, fields(owner = %config.owner, repo = %config.repo))]
pub async fn sync_pool(
    pool: &PoolStore,
    gateway: &dyn SyncGateway,
    config: &SyncConfig,
    token: &str,
    export_limit: usize,
) -> SyncOutcome {
    let remote_text = gateway
        .get_content(&config.owner, &config.repo, &config.path, token)
        .await;

    let remote: BTreeSet<String> = remote_text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    if remote.is_empty() {
        warn!("Remote list is empty or unreadable, skipping sync");
        return SyncOutcome::default();
    }

    let local: Vec<String> = pool
        .best_proxies(export_limit)
        .iter()
        .map(|entry| entry.key())
        .collect();

    let remote_count = remote.len();
    let local_count = local.len();
    let mut merged = remote;
    merged.extend(local);

    let text = merged.iter().cloned().collect::<Vec<_>>().join("\n");
    let message = format!(
        "{} - {}",
        config.commit_message,
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    let success = gateway
        .update_content(&config.owner, &config.repo, &config.path, token, &text, &message)
        .await;

    let outcome = SyncOutcome {
        success,
        remote: remote_count,
        local: local_count,
        merged: merged.len(),
    };

    if success {
        info!(
            remote = outcome.remote,
            local = outcome.local,
            merged = outcome.merged,
            "Synced proxy list"
        );
    } else {
        warn!("Failed to write merged proxy list");
    }
    outcome
}
