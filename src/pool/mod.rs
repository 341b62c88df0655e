//! Bounded, scored proxy pool
//!
//! The store is the single owner of every tracked [`ProxyEntry`] and of the
//! ban-set. All mutation goes through its methods, serialized by one
//! store-wide lock; nothing here awaits while the lock is held.

pub mod persistence;

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::Utc;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::models::{PoolStatistics, ProxyEntry, ValidityPolicy};

/// Score gained per successful outcome
pub const SUCCESS_REWARD: f64 = 0.1;
/// Score lost per failed outcome
pub const FAILURE_PENALTY: f64 = 0.2;

#[derive(Debug, Default)]
struct PoolState {
    entries: HashMap<String, ProxyEntry>,
    banned: HashSet<String>,
}

impl PoolState {
    /// Key of the lowest-scoring entry; ties resolve to the smallest key
    fn weakest_key(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by(|(ka, a), (kb, b)| a.score.total_cmp(&b.score).then_with(|| ka.cmp(kb)))
            .map(|(k, _)| k.clone())
    }
}

/// The proxy pool store
#[derive(Debug)]
pub struct PoolStore {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

impl PoolStore {
    /// Create an empty pool
    pub fn new(mut config: PoolConfig) -> Self {
        config.max_size = config.max_size.max(1);
        Self {
            config,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn validity(&self) -> ValidityPolicy {
        self.config.validity()
    }

    /// Add an entry, or merge it into the existing entry with the same key
    ///
    /// Returns `false` only when the key is banned. A new key arriving at a
    /// full pool evicts the current lowest-scoring entry first.
    pub fn add(&self, entry: ProxyEntry) -> bool {
        let key = entry.key();
        let mut state = self.state.lock();

        if state.banned.contains(&key) {
            debug!(key = %key, "Rejected banned proxy");
            return false;
        }

        if let Some(existing) = state.entries.get_mut(&key) {
            existing.merge_from(&entry);
            return true;
        }

        if state.entries.len() >= self.config.max_size {
            if let Some(evicted) = state.weakest_key() {
                state.entries.remove(&evicted);
                debug!(evicted = %evicted, incoming = %key, "Evicted lowest-scoring proxy");
            }
        }

        let mut entry = entry;
        entry.score = entry.score.clamp(0.0, 1.0);
        state.entries.insert(key, entry);

        assert!(
            state.entries.len() <= self.config.max_size,
            "pool grew past its capacity"
        );
        true
    }

    /// Remove an entry; returns whether it was present
    pub fn remove(&self, key: &str) -> bool {
        self.state.lock().entries.remove(key).is_some()
    }

    /// Record one outcome for `key`
    ///
    /// No-op for unknown keys. Bans the entry once its failure count reaches
    /// the configured threshold.
    pub fn update_score(&self, key: &str, success: bool, response_time: f64) {
        let mut state = self.state.lock();

        let Some(entry) = state.entries.get_mut(key) else {
            return;
        };

        let now = Utc::now();
        if success {
            entry.success_count += 1;
            entry.last_success_time = Some(now);
            entry.response_time = response_time;
            entry.score = (entry.score + SUCCESS_REWARD).min(1.0);
        } else {
            entry.fail_count += 1;
            entry.last_fail_time = Some(now);
            entry.score = (entry.score - FAILURE_PENALTY).max(0.0);
        }

        if entry.fail_count >= self.config.ban_threshold {
            let fail_count = entry.fail_count;
            Self::ban_locked(&mut state, key);
            warn!(key = %key, fail_count, "Proxy banned after repeated failures");
        }
    }

    /// Permanently ban `key` and drop its entry
    pub fn ban(&self, key: &str) {
        let mut state = self.state.lock();
        Self::ban_locked(&mut state, key);
        warn!(key = %key, "Proxy banned");
    }

    fn ban_locked(state: &mut PoolState, key: &str) {
        state.banned.insert(key.to_string());
        state.entries.remove(key);
    }

    /// Multiply every active score by the configured decay factor
    pub fn decay_scores(&self) {
        let factor = self.config.score_decay;
        let mut state = self.state.lock();
        for entry in state.entries.values_mut() {
            entry.score = (entry.score * factor).clamp(0.0, 1.0);
        }
        debug!(factor, count = state.entries.len(), "Decayed proxy scores");
    }

    /// Up to `n` valid entries, best first
    ///
    /// Ordered by score, then success rate, both descending.
    pub fn best_proxies(&self, n: usize) -> Vec<ProxyEntry> {
        let policy = self.validity();
        let mut valid: Vec<ProxyEntry> = {
            let state = self.state.lock();
            state
                .entries
                .values()
                .filter(|e| e.is_valid(&policy))
                .cloned()
                .collect()
        };

        valid.sort_by(rank_descending);
        valid.truncate(n);
        valid
    }

    /// A uniformly random valid entry
    pub fn random_proxy(&self) -> Option<ProxyEntry> {
        let policy = self.validity();
        let state = self.state.lock();
        let valid: Vec<&ProxyEntry> = state
            .entries
            .values()
            .filter(|e| e.is_valid(&policy))
            .collect();

        let mut rng = rand::thread_rng();
        valid.choose(&mut rng).map(|e| (*e).clone())
    }

    pub fn statistics(&self) -> PoolStatistics {
        let policy = self.validity();
        let state = self.state.lock();

        let total = state.entries.len();
        let valid = state
            .entries
            .values()
            .filter(|e| e.is_valid(&policy))
            .count();

        let (rate_sum, score_sum) = state
            .entries
            .values()
            .fold((0.0, 0.0), |(r, s), e| (r + e.success_rate(), s + e.score));

        let (avg_success_rate, avg_score) = if total == 0 {
            (0.0, 0.0)
        } else {
            (rate_sum / total as f64, score_sum / total as f64)
        };

        PoolStatistics {
            total,
            valid,
            banned: state.banned.len(),
            avg_success_rate,
            avg_score,
        }
    }

    pub fn get(&self, key: &str) -> Option<ProxyEntry> {
        self.state.lock().entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    pub fn is_banned(&self, key: &str) -> bool {
        self.state.lock().banned.contains(key)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Copies of every active entry, in key order
    pub fn entries(&self) -> Vec<ProxyEntry> {
        let mut entries: Vec<ProxyEntry> = self.state.lock().entries.values().cloned().collect();
        entries.sort_by(|a, b| a.key().cmp(&b.key()));
        entries
    }

    /// Every key the pool already knows about, active or banned
    pub fn known_keys(&self) -> HashSet<String> {
        let state = self.state.lock();
        state
            .entries
            .keys()
            .chain(state.banned.iter())
            .cloned()
            .collect()
    }

    /// Replace the whole state; used by snapshot loading
    fn replace(&self, entries: HashMap<String, ProxyEntry>, banned: HashSet<String>) {
        let mut state = self.state.lock();
        state.entries = entries;
        state.banned = banned;
    }

    /// Copies of the current entries and ban-set, taken under one lock
    fn export_state(&self) -> (Vec<ProxyEntry>, Vec<String>) {
        let state = self.state.lock();
        let entries = state.entries.values().cloned().collect();
        let mut banned: Vec<String> = state.banned.iter().cloned().collect();
        banned.sort();
        (entries, banned)
    }
}

impl Default for PoolStore {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

/// Ranking order: score, then success rate, descending; key as a stable tiebreak
fn rank_descending(a: &ProxyEntry, b: &ProxyEntry) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.success_rate().total_cmp(&a.success_rate()))
        .then_with(|| a.key().cmp(&b.key()))
}
