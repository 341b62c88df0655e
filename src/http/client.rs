use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, instrument, warn};

use crate::config::RequestConfig;
use crate::error::{HarvestError, Result};

const BROWSER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Response from [`WebClient`]
///
/// A request that never produced a response carries `status == 0` and the
/// last transport error.
#[derive(Debug, Clone, Default)]
pub struct WebResponse {
    pub status: u16,
    pub body: String,
    pub headers: HeaderMap,
    pub error: Option<String>,
}

impl WebResponse {
    fn failed(error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body of a successful response, empty otherwise
    pub fn text(&self) -> &str {
        if self.is_success() {
            &self.body
        } else {
            ""
        }
    }

    /// Parse the body as JSON if the response succeeded
    pub fn json(&self) -> Option<serde_json::Value> {
        if self.is_success() {
            serde_json::from_str(&self.body).ok()
        } else {
            None
        }
    }
}

/// Retrying HTTP client
#[derive(Debug, Clone)]
pub struct WebClient {
    client: Client,
    retries: u32,
    retry_interval: Duration,
}

impl WebClient {
    pub fn new(config: &RequestConfig) -> Result<Self> {
        let client = Self::builder(config).build()?;
        Ok(Self {
            client,
            retries: config.retries.max(1),
            retry_interval: config.retry_interval,
        })
    }

    /// A client whose requests are relayed through `proxy` (`host:port`)
    pub fn via_proxy(config: &RequestConfig, proxy: &str) -> Result<Self> {
        let proxy = reqwest::Proxy::all(format!("http://{}", proxy))?;
        let client = Self::builder(config).proxy(proxy).build()?;
        Ok(Self {
            client,
            retries: config.retries.max(1),
            retry_interval: config.retry_interval,
        })
    }

    fn builder(config: &RequestConfig) -> reqwest::ClientBuilder {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.8,en;q=0.6"));

        Client::builder()
            .timeout(config.timeout)
            .user_agent(BROWSER_AGENT)
            .default_headers(headers)
            .danger_accept_invalid_certs(true)
    }

    pub async fn get(&self, url: &str) -> WebResponse {
        self.send(Method::GET, url, HeaderMap::new(), None).await
    }

    pub async fn get_with(&self, url: &str, headers: HeaderMap) -> WebResponse {
        self.send(Method::GET, url, headers, None).await
    }

    pub async fn post_json(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &serde_json::Value,
    ) -> WebResponse {
        self.send(Method::POST, url, headers, Some(body.to_string()))
            .await
    }

    pub async fn put_json(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &serde_json::Value,
    ) -> WebResponse {
        self.send(Method::PUT, url, headers, Some(body.to_string()))
            .await
    }

    /// Send with retries
    ///
    /// Transport errors, 429 and 5xx responses are retried with a linearly
    /// growing delay. Exhausting the attempts yields the last response, or a
    /// `status == 0` response if nothing ever came back.
    #[instrument(skip(self, headers, body), fields(method = %method))]
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<String>,
    ) -> WebResponse {
        let mut last = WebResponse::failed("no attempt made".to_string());

        for attempt in 1..=self.retries {
            match self.attempt(method.clone(), url, &headers, body.clone()).await {
                Ok(response) if !is_transient(response.status) => return response,
                Ok(response) => {
                    warn!(
                        "Request to {} returned {} (attempt {}/{})",
                        url, response.status, attempt, self.retries
                    );
                    last = response;
                }
                Err(e) => {
                    warn!(
                        "Request to {} failed: {} (attempt {}/{})",
                        url, e, attempt, self.retries
                    );
                    last = WebResponse::failed(e.to_string());
                }
            }

            if attempt < self.retries {
                tokio::time::sleep(self.retry_interval * attempt).await;
            }
        }

        last
    }

    async fn attempt(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<String>,
    ) -> Result<WebResponse> {
        let mut request = self.client.request(method, url).headers(headers.clone());
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.bytes().await.map_err(HarvestError::from)?;
        let body = String::from_utf8_lossy(&bytes).into_owned();

        debug!(status = status.as_u16(), bytes = bytes.len(), "Received response from {}", url);

        Ok(WebResponse {
            status: status.as_u16(),
            body,
            headers,
            error: None,
        })
    }
}

fn is_transient(status: u16) -> bool {
    StatusCode::from_u16(status)
        .map(|s| s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error())
        .unwrap_or(false)
}
