//! Harvest cycle service
//!
//! One cycle collects fresh candidates, probes the whole pool, persists it and
//! optionally syncs the export to the remote list.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, instrument, warn};

use crate::collector::{default_sources, Collector};
use crate::config::{Config, StorageConfig, SyncConfig};
use crate::error::Result;
use crate::http::WebClient;
use crate::models::ProxyEntry;
use crate::pool::PoolStore;
use crate::probe::HealthChecker;
use crate::sync::{sync_pool, GithubGateway, SyncGateway};

/// Number of best proxies logged after each cycle
const TOP_LOGGED: usize = 20;
/// Wait after a failed cycle before trying again
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Counts from one harvest cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Fresh, well-formed candidates from the sources
    pub candidates: usize,
    /// Candidates that made it into the pool
    pub added: usize,
    pub probed: usize,
    pub healthy: usize,
    /// Lines written to the flat export
    pub exported: usize,
    pub synced: bool,
}

/// Fetch → validate → persist → sync
pub struct HarvestService {
    pool: Arc<PoolStore>,
    collector: Collector,
    checker: HealthChecker,
    gateway: Option<Arc<dyn SyncGateway>>,
    storage: StorageConfig,
    sync: SyncConfig,
    run_interval: Duration,
    recheck_interval: Duration,
    retry_delay: Duration,
    /// Held for the length of every pool check
    check_lock: Mutex<()>,
}

impl HarvestService {
    pub fn new(
        config: &Config,
        pool: Arc<PoolStore>,
        collector: Collector,
        checker: HealthChecker,
        gateway: Option<Arc<dyn SyncGateway>>,
    ) -> Self {
        Self {
            pool,
            collector,
            checker,
            gateway,
            storage: config.storage.clone(),
            sync: config.sync.clone(),
            run_interval: config.run_interval(),
            recheck_interval: Duration::from_secs(config.pool.health_check_interval.max(1)),
            retry_delay: DEFAULT_RETRY_DELAY,
            check_lock: Mutex::new(()),
        }
    }

    /// Wire the built-in sources, the checker and the GitHub gateway from `config`
    pub fn from_config(config: &Config, pool: Arc<PoolStore>) -> Result<Self> {
        let client = WebClient::new(&config.request)?;
        let collector = Collector::new(
            default_sources(&config.request, &client),
            config.request.source_timeout,
        );
        let checker = HealthChecker::new(config.checker.clone());
        let gateway: Arc<dyn SyncGateway> =
            Arc::new(GithubGateway::new(client, config.sync.api_url.clone()));

        Ok(Self::new(config, pool, collector, checker, Some(gateway)))
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn pool(&self) -> &Arc<PoolStore> {
        &self.pool
    }

    /// Restore the pool from the structured file, if there is one
    pub async fn load(&self) -> bool {
        let loaded = self.pool.load_structured(&self.storage.pool_file).await;
        if loaded {
            info!(
                count = self.pool.len(),
                "Loaded proxy pool from {}", self.storage.pool_file
            );
        } else {
            warn!(
                "No usable pool file at {}, starting empty",
                self.storage.pool_file
            );
        }
        loaded
    }

    /// Run a single cycle
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        let fresh = self.collector.collect_new(&self.pool.known_keys()).await;
        report.candidates = fresh.len();

        for candidate in &fresh {
            match ProxyEntry::parse(candidate) {
                Ok(entry) => {
                    if self.pool.add(entry) {
                        report.added += 1;
                    }
                }
                Err(e) => warn!(candidate = %candidate, "Skipping candidate: {}", e),
            }
        }
        info!(
            candidates = report.candidates,
            added = report.added,
            "Ingested new candidates"
        );

        let summary = {
            let _check = self.check_lock.lock().await;
            self.checker.check_pool(&self.pool).await
        };
        report.probed = summary.probed;
        report.healthy = summary.healthy;

        self.pool.save_structured(&self.storage.pool_file).await?;
        report.exported = self
            .pool
            .export_text(&self.storage.export_file, self.storage.export_limit)
            .await?;
        info!(
            exported = report.exported,
            "Saved pool to {} and {}", self.storage.pool_file, self.storage.export_file
        );

        report.synced = self.sync().await;

        self.log_summary();
        Ok(report)
    }

    async fn sync(&self) -> bool {
        let Some(token) = self.sync.token.as_deref().filter(|t| !t.is_empty()) else {
            warn!("No sync token configured, skipping remote sync");
            return false;
        };
        let Some(gateway) = &self.gateway else {
            return false;
        };

        sync_pool(
            &self.pool,
            gateway.as_ref(),
            &self.sync,
            token,
            self.storage.export_limit,
        )
        .await
        .success
    }

    fn log_summary(&self) {
        let stats = self.pool.statistics();
        info!(
            total = stats.total,
            valid = stats.valid,
            banned = stats.banned,
            avg_success_rate = format!("{:.2}", stats.avg_success_rate),
            avg_score = format!("{:.2}", stats.avg_score),
            "Pool statistics"
        );

        for (rank, entry) in self.pool.best_proxies(TOP_LOGGED).iter().enumerate() {
            info!(
                "#{:<2} {} score={:.2} success_rate={:.2} response_time={:.2}s",
                rank + 1,
                entry.key(),
                entry.score,
                entry.success_rate(),
                entry.response_time
            );
        }
    }

    /// Repeat cycles until shutdown
    ///
    /// Scores decay before every cycle after the first. A failed cycle is
    /// retried after the retry delay instead of the full interval.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting continuous harvest (interval: {}h)",
            self.run_interval.as_secs() / 3600
        );

        let mut first = true;
        loop {
            if !first {
                self.pool.decay_scores();
            }
            first = false;

            let wait = tokio::select! {
                result = self.run_once() => match result {
                    Ok(report) => {
                        info!(?report, "Harvest cycle finished");
                        self.run_interval
                    }
                    Err(e) => {
                        error!("Harvest cycle failed: {}", e);
                        self.retry_delay
                    }
                },
                _ = shutdown.changed() => break,
            };

            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = sleep(wait) => {}
                _ = shutdown.changed() => break,
            }

            if *shutdown.borrow() {
                break;
            }
        }

        info!("Harvest service shutting down");
    }

    /// Re-probe the pool on the health-check interval between full cycles
    #[instrument(skip(self, shutdown))]
    pub async fn monitor(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.recheck_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.recheck().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Pool monitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One monitor pass: check the pool and refresh the export
    ///
    /// Skipped when a check is already running, so an entry never gets two
    /// outcomes recorded for the same round. Returns whether the pass ran.
    async fn recheck(&self) -> bool {
        let Ok(_check) = self.check_lock.try_lock() else {
            debug!("Pool check already in progress, skipping recheck");
            return false;
        };

        self.checker.check_pool(&self.pool).await;
        if let Err(e) = self
            .pool
            .export_text(&self.storage.export_file, self.storage.export_limit)
            .await
        {
            error!("Failed to refresh export: {}", e);
        }
        true
    }

    pub fn storage_paths(&self) -> (PathBuf, PathBuf) {
        (
            PathBuf::from(&self.storage.pool_file),
            PathBuf::from(&self.storage.export_file),
        )
    }
}

/// Handle for stopping the harvest service
pub struct HarvestHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl HarvestHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
