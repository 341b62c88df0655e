//! Candidate collection from proxy list sources
//!
//! Every source is a [`SourceAdapter`]; the [`Collector`] runs them all,
//! isolates their failures, and merges what they produce.

pub mod sources;

pub use sources::{default_sources, Extraction, FileSource, WebSource};

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

use crate::error::Result;

/// A producer of raw `host:port` candidate strings
///
/// Output is not expected to be clean; the collector filters it.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Short, stable name used in logs and for disabling the source
    fn name(&self) -> &str;

    /// Produce this source's candidates
    async fn fetch(&self) -> Result<Vec<String>>;
}

fn endpoint_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}:\d{1,5}$").expect("static pattern")
    })
}

/// Check that `candidate` is exactly a dotted-quad `ip:port`
pub fn is_well_formed(candidate: &str) -> bool {
    endpoint_pattern().is_match(candidate)
}

/// Runs source adapters and merges their output
pub struct Collector {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    adapter_timeout: Duration,
}

impl Collector {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, adapter_timeout: Duration) -> Self {
        Self {
            adapters,
            adapter_timeout,
        }
    }

    pub fn adapter_names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    /// Run every adapter and return the union of their raw output
    ///
    /// A failing or timed-out adapter contributes nothing and never aborts the
    /// others.
    #[instrument(skip(self))]
    pub async fn collect(&self) -> HashSet<String> {
        let runs = self.adapters.iter().map(|adapter| async move {
            let name = adapter.name().to_string();
            match timeout(self.adapter_timeout, adapter.fetch()).await {
                Ok(Ok(found)) => {
                    info!(source = %name, count = found.len(), "Source fetched");
                    found
                }
                Ok(Err(e)) => {
                    error!(source = %name, "Source failed: {}", e);
                    Vec::new()
                }
                Err(_) => {
                    warn!(
                        source = %name,
                        "Source timed out after {}s",
                        self.adapter_timeout.as_secs()
                    );
                    Vec::new()
                }
            }
        });

        let merged: HashSet<String> = join_all(runs).await.into_iter().flatten().collect();

        info!(total = merged.len(), "Collected unique raw candidates");
        merged
    }

    /// Well-formed candidates not present in `known`, sorted
    pub async fn collect_new(&self, known: &HashSet<String>) -> Vec<String> {
        let raw = self.collect().await;
        let raw_count = raw.len();

        let mut fresh: Vec<String> = raw
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| is_well_formed(c))
            .filter(|c| !known.contains(c))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        fresh.sort();

        info!(
            raw = raw_count,
            fresh = fresh.len(),
            "Filtered candidates against known proxies"
        );
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarvestError;

    struct StaticSource {
        name: &'static str,
        items: Vec<&'static str>,
    }

    #[async_trait]
    impl SourceAdapter for StaticSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self) -> Result<Vec<String>> {
            Ok(self.items.iter().map(|s| s.to_string()).collect())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl SourceAdapter for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        async fn fetch(&self) -> Result<Vec<String>> {
            Err(HarvestError::SourceFailed {
                source_name: "failing".to_string(),
                message: "site down".to_string(),
            })
        }
    }

    struct SlowSource;

    #[async_trait]
    impl SourceAdapter for SlowSource {
        fn name(&self) -> &str {
            "slow"
        }

        async fn fetch(&self) -> Result<Vec<String>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec!["9.9.9.9:9999".to_string()])
        }
    }

    fn collector(adapters: Vec<Arc<dyn SourceAdapter>>) -> Collector {
        Collector::new(adapters, Duration::from_millis(200))
    }

    #[test]
    fn test_is_well_formed() {
        assert!(is_well_formed("1.2.3.4:80"));
        assert!(is_well_formed("123.123.123.123:65535"));
        assert!(!is_well_formed("1.2.3.4"));
        assert!(!is_well_formed("1.2.3:80"));
        assert!(!is_well_formed("example.com:80"));
        assert!(!is_well_formed("1.2.3.4:123456"));
        assert!(!is_well_formed(" 1.2.3.4:80"));
        assert!(!is_well_formed("1.2.3.4:80 extra"));
    }

    #[tokio::test]
    async fn test_collect_merges_and_dedups() {
        let c = collector(vec![
            Arc::new(StaticSource {
                name: "a",
                items: vec!["1.1.1.1:80", "2.2.2.2:80"],
            }),
            Arc::new(StaticSource {
                name: "b",
                items: vec!["2.2.2.2:80", "3.3.3.3:80"],
            }),
        ]);

        let merged = c.collect().await;
        assert_eq!(merged.len(), 3);
        assert!(merged.contains("3.3.3.3:80"));
    }

    #[tokio::test]
    async fn test_failing_and_slow_sources_do_not_abort_batch() {
        let c = collector(vec![
            Arc::new(FailingSource),
            Arc::new(SlowSource),
            Arc::new(StaticSource {
                name: "ok",
                items: vec!["1.1.1.1:80"],
            }),
        ]);

        let merged = c.collect().await;
        assert_eq!(merged.len(), 1);
        assert!(merged.contains("1.1.1.1:80"));
    }

    #[tokio::test]
    async fn test_collect_new_filters_garbage_and_known() {
        let c = collector(vec![Arc::new(StaticSource {
            name: "mixed",
            items: vec![
                "1.1.1.1:80",
                " 2.2.2.2:8080 ",
                "<td>junk</td>",
                "",
                "host.example:3128",
                "4.4.4.4:80",
                "5.5.5.5:1080",
            ],
        })]);

        let known: HashSet<String> = ["4.4.4.4:80".to_string(), "5.5.5.5:1080".to_string()]
            .into_iter()
            .collect();

        let fresh = c.collect_new(&known).await;
        assert_eq!(fresh, vec!["1.1.1.1:80".to_string(), "2.2.2.2:8080".to_string()]);
    }

    #[tokio::test]
    async fn test_collect_with_no_adapters() {
        let c = collector(Vec::new());
        assert!(c.collect().await.is_empty());
        assert!(c.adapter_names().is_empty());
    }
}
