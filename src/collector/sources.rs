//! Concrete source adapters
//!
//! Sites are described as data (URLs plus an extraction rule) instead of one
//! hand-written scraper each.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures::StreamExt;
use regex::Regex;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};

use super::SourceAdapter;
use crate::config::RequestConfig;
use crate::error::{HarvestError, Result};
use crate::http::WebClient;

const IP: &str = r"\d{1,3}(?:\.\d{1,3}){3}";

/// How candidates are pulled out of a fetched page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    /// Any `ip:port` token anywhere in the body
    PlainText,
    /// Adjacent `<td>`/`<span>` cells holding an IP and then a port
    TableCells,
    /// `Proxy('<base64>')` tokens decoding to `ip:port`
    Base64Tokens,
    /// `{"data": [{"ip": .., "port": ..}]}`
    JsonList,
}

impl Extraction {
    /// Extract raw candidates from `body`
    pub fn extract(&self, body: &str) -> Vec<String> {
        match self {
            Extraction::PlainText => plain_pattern()
                .captures_iter(body)
                .map(|c| format!("{}:{}", &c[1], &c[2]))
                .collect(),
            Extraction::TableCells => cell_pattern()
                .captures_iter(body)
                .map(|c| format!("{}:{}", &c[1], &c[2]))
                .collect(),
            Extraction::Base64Tokens => base64_pattern()
                .captures_iter(body)
                .filter_map(|c| {
                    let decoded = BASE64.decode(c[1].trim()).ok()?;
                    let decoded = String::from_utf8(decoded).ok()?;
                    let mut parts = decoded.split(':');
                    let ip = parts.next()?.trim();
                    let port = parts.next()?.trim();
                    (!ip.is_empty() && !port.is_empty()).then(|| format!("{}:{}", ip, port))
                })
                .collect(),
            Extraction::JsonList => {
                let Ok(json) = serde_json::from_str::<Value>(body) else {
                    return Vec::new();
                };
                json.get("data")
                    .and_then(Value::as_array)
                    .map(|items| items.iter().filter_map(json_endpoint).collect())
                    .unwrap_or_default()
            }
        }
    }
}

fn json_endpoint(item: &Value) -> Option<String> {
    let ip = item.get("ip")?.as_str()?.trim();
    let port = match item.get("port")? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!ip.is_empty() && !port.is_empty()).then(|| format!("{}:{}", ip, port))
}

fn plain_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(r"({}):(\d{{1,5}})", IP)).expect("static pattern")
    })
}

fn cell_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(
            r"(?s)<(?:td|span)[^>]*>\s*({})\s*</(?:td|span)>.*?<(?:td|span)[^>]*>\s*(\d{{1,5}})\s*</(?:td|span)>",
            IP
        ))
        .expect("static pattern")
    })
}

fn base64_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Proxy\('([^']*)'\)").expect("static pattern"))
}

/// A site fetched over HTTP
pub struct WebSource {
    name: String,
    urls: Vec<String>,
    extraction: Extraction,
    client: WebClient,
    concurrency: usize,
}

impl WebSource {
    pub fn new(
        name: impl Into<String>,
        urls: Vec<String>,
        extraction: Extraction,
        client: WebClient,
        concurrency: usize,
    ) -> Self {
        Self {
            name: name.into(),
            urls,
            extraction,
            client,
            concurrency: concurrency.max(1),
        }
    }
}

#[async_trait]
impl SourceAdapter for WebSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<String>> {
        let pages: Vec<Option<Vec<String>>> = futures::stream::iter(self.urls.clone())
            .map(|url: String| async move {
                let response = self.client.get(&url).await;
                if !response.is_success() {
                    warn!(
                        source = %self.name,
                        status = response.status,
                        "Page fetch failed for {}: {}",
                        url,
                        response.error.as_deref().unwrap_or("unexpected status")
                    );
                    return None;
                }
                let found = self.extraction.extract(&response.body);
                debug!(source = %self.name, count = found.len(), "Parsed {}", url);
                Some(found)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        if !self.urls.is_empty() && pages.iter().all(Option::is_none) {
            return Err(HarvestError::SourceFailed {
                source_name: self.name.clone(),
                message: format!("all {} pages failed", self.urls.len()),
            });
        }

        Ok(pages.into_iter().flatten().flatten().collect())
    }
}

/// A local newline-delimited list, such as a previous export
pub struct FileSource {
    name: String,
    path: PathBuf,
}

impl FileSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl SourceAdapter for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<String>> {
        let body = fs::read_to_string(&self.path).await?;
        Ok(body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

fn numbered(template: &str, pages: std::ops::RangeInclusive<u32>) -> Vec<String> {
    pages.map(|n| template.replace("{}", &n.to_string())).collect()
}

/// The built-in public proxy list sites, minus any disabled by name
pub fn default_sources(
    config: &RequestConfig,
    client: &WebClient,
) -> Vec<Arc<dyn SourceAdapter>> {
    let mut kuaidaili = numbered("https://www.kuaidaili.com/free/inha/{}/", 1..=5);
    kuaidaili.extend(numbered("https://www.kuaidaili.com/free/intr/{}/", 1..=5));

    let catalog: Vec<(&str, Vec<String>, Extraction)> = vec![
        ("kuaidaili", kuaidaili, Extraction::TableCells),
        (
            "kxdaili",
            vec![
                "http://www.kxdaili.com/dailiip.html".to_string(),
                "http://www.kxdaili.com/dailiip/1/2.html".to_string(),
                "http://www.kxdaili.com/dailiip/1/3.html".to_string(),
                "http://www.kxdaili.com/dailiip/1/4.html".to_string(),
            ],
            Extraction::TableCells,
        ),
        (
            "ip3366",
            vec![
                "http://www.ip3366.net/free/?stype=1".to_string(),
                "http://www.ip3366.net/free/?stype=1&page=2".to_string(),
                "http://www.ip3366.net/free/?stype=1&page=3".to_string(),
            ],
            Extraction::TableCells,
        ),
        (
            "proxy11",
            vec!["https://proxy11.com/api/demoweb/proxy.json".to_string()],
            Extraction::JsonList,
        ),
        (
            "proxy_list",
            numbered("https://proxy-list.org/english/index.php?p={}", 1..=4),
            Extraction::Base64Tokens,
        ),
        (
            "proxylistplus",
            numbered("https://list.proxylistplus.com/Fresh-HTTP-Proxy-List-{}", 1..=3),
            Extraction::TableCells,
        ),
        (
            "dieniao",
            vec![
                "https://www.dieniao.com/FreeProxy.html".to_string(),
                "https://www.dieniao.com/FreeProxy/2.html".to_string(),
            ],
            Extraction::TableCells,
        ),
        (
            "qiyun",
            numbered("https://proxy.ip3366.net/free/?action=china&page={}", 1..=5),
            Extraction::TableCells,
        ),
    ];

    catalog
        .into_iter()
        .filter(|(name, _, _)| !config.disabled_sources.iter().any(|d| d == name))
        .map(|(name, urls, extraction)| {
            Arc::new(WebSource::new(
                name,
                urls,
                extraction,
                client.clone(),
                config.fetch_concurrency,
            )) as Arc<dyn SourceAdapter>
        })
        .collect()
}
