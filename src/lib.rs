//! Rota Harvest - public proxy harvester
//!
//! Collects candidate proxies from public lists, keeps them in a bounded,
//! scored pool and health-checks them under a concurrency ceiling.
//!
//! ## Features
//!
//! - Pluggable source adapters with per-source failure isolation
//! - Asymmetric scoring with decay, capacity eviction and permanent bans
//! - Concurrency-bounded liveness probes through each candidate
//! - JSON pool snapshots and flat `host:port` exports
//! - Merge-by-union sync of the export to a GitHub-hosted list
//! - Optional read-only HTTP API

pub mod api;
pub mod collector;
pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod pool;
pub mod probe;
pub mod services;
pub mod sync;

pub use config::Config;
pub use error::{HarvestError, Result};
pub use models::{PoolStatistics, ProxyEntry};
pub use pool::PoolStore;
