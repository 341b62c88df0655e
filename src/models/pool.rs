use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ProxyEntry;

/// Aggregate pool statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatistics {
    pub total: usize,
    pub valid: usize,
    pub banned: usize,
    pub avg_success_rate: f64,
    pub avg_score: f64,
}

/// Persisted form of the pool
///
/// Keys are ordered so repeated saves of the same pool produce the same file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSnapshot {
    pub proxies: BTreeMap<String, ProxyEntry>,
    #[serde(default)]
    pub banned_proxies: Vec<String>,
    pub timestamp: DateTime<Utc>,
}
