use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Score assigned to an entry on first ingestion
pub const INITIAL_SCORE: f64 = 1.0;

/// Score thresholds an entry must meet to be handed out
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidityPolicy {
    /// Minimum score (inclusive)
    pub min_score: f64,
    /// Minimum success rate (inclusive)
    pub min_success_rate: f64,
}

impl Default for ValidityPolicy {
    fn default() -> Self {
        Self {
            min_score: 0.3,
            min_success_rate: 0.5,
        }
    }
}

/// One tracked proxy endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyEntry {
    pub host: String,
    pub port: u16,
    pub score: f64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub fail_count: u64,
    #[serde(default)]
    pub last_success_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_fail_time: Option<DateTime<Utc>>,
    /// Latency of the last successful probe, in seconds
    #[serde(default)]
    pub response_time: f64,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub anonymity: String,
    #[serde(default = "default_proxy_type")]
    pub proxy_type: String,
}

fn default_proxy_type() -> String {
    "http".to_string()
}

impl ProxyEntry {
    /// Create a fresh entry with the initial score and zeroed counters
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            score: INITIAL_SCORE,
            success_count: 0,
            fail_count: 0,
            last_success_time: None,
            last_fail_time: None,
            response_time: 0.0,
            country: String::new(),
            anonymity: String::new(),
            proxy_type: default_proxy_type(),
        }
    }

    /// Parse a `host:port` endpoint string
    ///
    /// The port must be a non-zero `u16`. The host is taken verbatim.
    pub fn parse(endpoint: &str) -> Result<Self> {
        let endpoint = endpoint.trim();
        let (host, port) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| HarvestError::InvalidProxyAddress(endpoint.to_string()))?;

        if host.is_empty() {
            return Err(HarvestError::InvalidProxyAddress(endpoint.to_string()));
        }

        let port: u16 = port
            .parse()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| HarvestError::InvalidProxyAddress(endpoint.to_string()))?;

        Ok(Self::new(host, port))
    }

    /// Lookup key (`host:port`), compared as an exact string
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Fraction of successful outcomes; 0.0 when nothing has been recorded
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.fail_count;
        if total == 0 {
            0.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    /// Check whether this entry clears both validity floors
    pub fn is_valid(&self, policy: &ValidityPolicy) -> bool {
        self.score >= policy.min_score && self.success_rate() >= policy.min_success_rate
    }

    /// Proxy URL used when dialing through this entry
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Overwrite counters and timestamps from a re-ingested copy of the same endpoint
    pub(crate) fn merge_from(&mut self, incoming: &ProxyEntry) {
        self.success_count = incoming.success_count;
        self.fail_count = incoming.fail_count;
        self.response_time = incoming.response_time;
        self.last_success_time = incoming.last_success_time;
        self.last_fail_time = incoming.last_fail_time;
    }
}
