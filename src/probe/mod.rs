//! Health checking for harvested proxies
//!
//! Probes are stateless with respect to the pool: they return outcomes and
//! the caller decides how to score them.

pub mod transport;

pub use transport::ProbeTransport;

use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::time::timeout;
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::CheckerConfig;
use crate::models::ProxyEntry;
use crate::pool::PoolStore;

/// Result of probing one entry
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    /// Pool key of the probed entry
    pub key: String,
    pub success: bool,
    /// Seconds taken by the successful attempt, 0 on failure
    pub response_time: f64,
    /// Target that answered
    pub target: Option<String>,
    /// Status code returned by the proxy
    pub status: Option<u16>,
    /// Last error seen when every target failed
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Counts from one pool-wide check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckSummary {
    pub probed: usize,
    pub healthy: usize,
    pub unhealthy: usize,
}

/// Health checker for pool entries
#[derive(Debug, Clone)]
pub struct HealthChecker {
    config: CheckerConfig,
}

impl HealthChecker {
    pub fn new(config: CheckerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Probe `entry` against each target in order; the first answer wins
    ///
    /// Every attempt carries the configured timeout. Failures of any kind are
    /// folded into the returned outcome.
    #[instrument(skip(self, entry, targets), fields(proxy = %entry.key()))]
    pub async fn probe(&self, entry: &ProxyEntry, targets: &[Url]) -> ProbeOutcome {
        let key = entry.key();
        let mut last_error = None;

        for target in targets {
            let started = Instant::now();
            let attempt = timeout(self.config.timeout, ProbeTransport::request(&key, target)).await;

            match attempt {
                Ok(Ok(status)) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    debug!(target = %target, status, elapsed, "Proxy is alive");
                    return ProbeOutcome {
                        key,
                        success: true,
                        response_time: elapsed,
                        target: Some(target.to_string()),
                        status: Some(status),
                        error: None,
                        checked_at: Utc::now(),
                    };
                }
                Ok(Err(e)) => {
                    debug!(target = %target, "Probe failed: {}", e);
                    last_error = Some(e.to_string());
                }
                Err(_) => {
                    debug!(target = %target, "Probe timed out");
                    last_error = Some(format!(
                        "timed out after {}ms",
                        self.config.timeout.as_millis()
                    ));
                }
            }
        }

        ProbeOutcome {
            key,
            success: false,
            response_time: 0.0,
            target: None,
            status: None,
            error: last_error.or_else(|| Some("no probe targets".to_string())),
            checked_at: Utc::now(),
        }
    }

    /// Probe `entry` against the configured targets
    pub async fn check(&self, entry: &ProxyEntry) -> ProbeOutcome {
        self.probe(entry, &self.config.test_urls).await
    }

    /// Probe every entry with at most `max_concurrent` probes in flight
    ///
    /// Outcomes arrive in completion order.
    pub async fn batch_probe(
        &self,
        entries: Vec<ProxyEntry>,
        max_concurrent: usize,
    ) -> Vec<ProbeOutcome> {
        let limit = max_concurrent.max(1);

        futures::stream::iter(entries)
            .map(|entry| async move { self.check(&entry).await })
            .buffer_unordered(limit)
            .collect()
            .await
    }

    /// Probe every active entry in `pool` and feed the outcomes back as scores
    #[instrument(skip(self, pool))]
    pub async fn check_pool(&self, pool: &PoolStore) -> CheckSummary {
        let entries = pool.entries();
        if entries.is_empty() {
            return CheckSummary::default();
        }

        info!("Checking health of {} proxies", entries.len());

        let outcomes = self.batch_probe(entries, self.config.max_concurrent).await;
        let summary = apply_outcomes(pool, &outcomes);

        info!(
            "Health check complete: {} healthy, {} unhealthy",
            summary.healthy, summary.unhealthy
        );
        summary
    }
}

/// Record each outcome against the pool
pub fn apply_outcomes(pool: &PoolStore, outcomes: &[ProbeOutcome]) -> CheckSummary {
    let mut summary = CheckSummary {
        probed: outcomes.len(),
        ..CheckSummary::default()
    };

    for outcome in outcomes {
        pool.update_score(&outcome.key, outcome.success, outcome.response_time);
        if outcome.success {
            summary.healthy += 1;
        } else {
            summary.unhealthy += 1;
        }
    }

    summary
}
