//! Pool persistence: flat text export and JSON snapshots

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use chrono::Utc;
use tokio::fs;
use tracing::{error, info, instrument, warn};

use super::PoolStore;
use crate::error::Result;
use crate::models::{PoolSnapshot, ProxyEntry};

/// Default number of entries written by [`PoolStore::export_text`]
pub const DEFAULT_EXPORT_LIMIT: usize = 1000;

impl PoolStore {
    /// Build a snapshot of the current pool
    pub fn snapshot(&self) -> PoolSnapshot {
        let (entries, banned_proxies) = self.export_state();
        let proxies: BTreeMap<String, ProxyEntry> =
            entries.into_iter().map(|e| (e.key(), e)).collect();

        PoolSnapshot {
            proxies,
            banned_proxies,
            timestamp: Utc::now(),
        }
    }

    /// Replace the pool contents with a snapshot
    ///
    /// Entries are re-keyed by `host:port`, scores clamped, banned keys
    /// dropped from the active set, and the lowest scores trimmed if the
    /// snapshot holds more than the configured capacity.
    pub fn restore(&self, snapshot: PoolSnapshot) {
        let banned: HashSet<String> = snapshot.banned_proxies.into_iter().collect();

        let mut entries: Vec<ProxyEntry> = snapshot
            .proxies
            .into_values()
            .filter(|e| !banned.contains(&e.key()))
            .map(|mut e| {
                e.score = if e.score.is_finite() {
                    e.score.clamp(0.0, 1.0)
                } else {
                    0.0
                };
                e
            })
            .collect();

        let max_size = self.config().max_size;
        if entries.len() > max_size {
            warn!(
                loaded = entries.len(),
                max_size, "Snapshot exceeds pool capacity, dropping lowest scores"
            );
            entries.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key().cmp(&b.key())));
            entries.truncate(max_size);
        }

        let entries: HashMap<String, ProxyEntry> =
            entries.into_iter().map(|e| (e.key(), e)).collect();
        self.replace(entries, banned);
    }

    /// Write the best `limit` proxies as `host:port` lines, overwriting `path`
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn export_text(&self, path: impl AsRef<Path>, limit: usize) -> Result<usize> {
        let best = self.best_proxies(limit);

        let mut body = String::with_capacity(best.len() * 22);
        for entry in &best {
            body.push_str(&entry.key());
            body.push('\n');
        }

        fs::write(path.as_ref(), body).await?;
        info!(count = best.len(), "Exported valid proxies");
        Ok(best.len())
    }

    /// Serialize every entry, the ban-set and a timestamp to `path`
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn save_structured(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let snapshot = self.snapshot();
        let json = serde_json::to_vec_pretty(&snapshot)?;

        // Write beside the target first so a crash never leaves a torn file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, path).await?;

        info!(
            proxies = snapshot.proxies.len(),
            banned = snapshot.banned_proxies.len(),
            "Saved proxy pool"
        );
        Ok(())
    }

    /// Load a snapshot written by [`PoolStore::save_structured`]
    ///
    /// Returns `false` and leaves the pool untouched if the file is missing
    /// or cannot be parsed.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn load_structured(&self, path: impl AsRef<Path>) -> bool {
        let raw = match fs::read(path.as_ref()).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Proxy pool file unavailable: {}", e);
                return false;
            }
        };

        let snapshot: PoolSnapshot = match serde_json::from_slice(&raw) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to parse proxy pool file: {}", e);
                return false;
            }
        };

        let saved_at = snapshot.timestamp;
        self.restore(snapshot);

        info!(
            proxies = self.len(),
            saved_at = %saved_at.to_rfc3339(),
            "Loaded proxy pool"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    fn seeded_pool() -> PoolStore {
        let pool = PoolStore::default();

        let mut a = ProxyEntry::new("10.0.0.1", 8080);
        a.success_count = 5;
        a.fail_count = 1;
        a.response_time = 0.321;
        a.country = "DE".to_string();
        pool.add(a);
        pool.update_score("10.0.0.1:8080", true, 0.25);
        pool.update_score("10.0.0.1:8080", false, 0.0);

        let mut b = ProxyEntry::new("10.0.0.2", 3128);
        b.success_count = 1;
        b.score = 0.7;
        pool.add(b);

        pool.add(ProxyEntry::new("10.0.0.3", 80));
        pool.ban("10.0.0.9:1080");
        pool
    }

    #[tokio::test]
    async fn test_structured_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy_pool.json");

        let pool = seeded_pool();
        for _ in 0..7 {
            pool.decay_scores();
        }
        for i in 0..400u16 {
            let mut entry = ProxyEntry::new(format!("10.1.{}.{}", i / 256, i % 256), 8000 + i);
            entry.score = (0.95f64.powi(i32::from(i % 40)) - f64::from(i % 7) * 0.013).max(0.0);
            entry.response_time = f64::from(i) * 0.000123456789;
            entry.success_count = u64::from(i);
            pool.add(entry);
        }
        pool.decay_scores();
        pool.save_structured(&path).await.unwrap();

        let restored = PoolStore::default();
        assert!(restored.load_structured(&path).await);

        assert_eq!(restored.entries(), pool.entries());
        let drifted: Vec<String> = pool
            .entries()
            .iter()
            .zip(restored.entries().iter())
            .filter(|(a, b)| {
                a.score.to_bits() != b.score.to_bits()
                    || a.response_time.to_bits() != b.response_time.to_bits()
            })
            .map(|(a, _)| a.key())
            .collect();
        assert!(drifted.is_empty(), "float drift for {:?}", drifted);
        assert!(restored.is_banned("10.0.0.9:1080"));
        let (a, b) = (restored.statistics(), pool.statistics());
        assert_eq!((a.total, a.valid, a.banned), (b.total, b.valid, b.banned));
        assert!((a.avg_score - b.avg_score).abs() < 1e-9);

        let original = pool.get("10.0.0.1:8080").unwrap();
        let loaded = restored.get("10.0.0.1:8080").unwrap();
        assert_eq!(loaded.last_success_time, original.last_success_time);
        assert_eq!(loaded.last_fail_time, original.last_fail_time);
    }

    #[tokio::test]
    async fn test_snapshot_document_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy_pool.json");
        seeded_pool().save_structured(&path).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert!(value["proxies"]["10.0.0.2:3128"].is_object());
        assert_eq!(value["bannedProxies"][0], "10.0.0.9:1080");
        let ts = value["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[tokio::test]
    async fn test_load_missing_file_keeps_pool() {
        let dir = tempfile::tempdir().unwrap();
        let pool = seeded_pool();
        let before = pool.entries();

        assert!(!pool.load_structured(dir.path().join("absent.json")).await);
        assert_eq!(pool.entries(), before);
    }

    #[tokio::test]
    async fn test_load_malformed_file_keeps_pool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{\"proxies\": {\"x\": 12").unwrap();

        let pool = seeded_pool();
        let before = pool.entries();

        assert!(!pool.load_structured(&path).await);
        assert_eq!(pool.entries(), before);
        assert!(pool.is_banned("10.0.0.9:1080"));
    }

    #[tokio::test]
    async fn test_load_enforces_invariants() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.json");
        let doc = serde_json::json!({
            "proxies": {
                "10.0.0.1:80": {"host": "10.0.0.1", "port": 80, "score": 3.5},
                "10.0.0.2:80": {"host": "10.0.0.2", "port": 80, "score": 0.1},
                "10.0.0.3:80": {"host": "10.0.0.3", "port": 80, "score": 0.6},
                "10.0.0.4:80": {"host": "10.0.0.4", "port": 80, "score": 0.9}
            },
            "bannedProxies": ["10.0.0.4:80"],
            "timestamp": "2024-05-01T12:00:00Z"
        });
        std::fs::write(&path, doc.to_string()).unwrap();

        let pool = PoolStore::new(PoolConfig {
            max_size: 2,
            ..PoolConfig::default()
        });
        assert!(pool.load_structured(&path).await);

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get("10.0.0.1:80").unwrap().score, 1.0);
        assert!(pool.contains("10.0.0.3:80"));
        assert!(!pool.contains("10.0.0.2:80"));
        assert!(!pool.contains("10.0.0.4:80"));
        assert!(pool.is_banned("10.0.0.4:80"));
    }

    #[tokio::test]
    async fn test_export_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("valid_proxies.txt");
        std::fs::write(&path, "stale:1\n").unwrap();

        let pool = seeded_pool();
        let count = pool.export_text(&path, DEFAULT_EXPORT_LIMIT).await.unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(count, lines.len());
        assert_eq!(lines, vec!["10.0.0.1:8080", "10.0.0.2:3128"]);
        assert!(!body.contains("stale"));
    }

    #[tokio::test]
    async fn test_export_text_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("valid_proxies.txt");

        let count = seeded_pool().export_text(&path, 1).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "10.0.0.1:8080\n");
    }

    #[tokio::test]
    async fn test_save_into_missing_directory_fails_and_keeps_pool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("pool.json");
        let pool = seeded_pool();
        let before = pool.len();

        tokio_test::assert_err!(pool.save_structured(&path).await);
        assert_eq!(pool.len(), before);

        let ok_path = dir.path().join("pool.json");
        tokio_test::assert_ok!(pool.save_structured(&ok_path).await);
        assert!(!dir.path().join("pool.json.tmp").exists());
    }
}
