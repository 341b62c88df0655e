//! Proxy listing handlers

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::api::server::AppState;
use crate::error::HarvestError;

/// Entries returned when no limit is given
pub const DEFAULT_LIST_LIMIT: usize = 20;

/// Query parameters for listing proxies
#[derive(Debug, Deserialize, Default)]
pub struct ListProxiesQuery {
    pub limit: Option<usize>,
}

impl ListProxiesQuery {
    fn effective_limit(&self, cap: usize) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(cap)
    }
}

/// Best valid proxies, highest ranked first
pub async fn list_proxies(
    State(state): State<AppState>,
    Query(query): Query<ListProxiesQuery>,
) -> impl IntoResponse {
    let limit = query.effective_limit(state.config.storage.export_limit);
    Json(state.pool.best_proxies(limit))
}

/// One valid proxy chosen at random
pub async fn random_proxy(State(state): State<AppState>) -> Result<impl IntoResponse, HarvestError> {
    state
        .pool
        .random_proxy()
        .map(Json)
        .ok_or(HarvestError::NoProxiesAvailable)
}

/// A single tracked entry by `host:port`
pub async fn get_proxy(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, HarvestError> {
    state
        .pool
        .get(&key)
        .map(Json)
        .ok_or(HarvestError::ProxyNotFound { key })
}

/// Flat `host:port` list, same content as the export file
pub async fn export_text(
    State(state): State<AppState>,
    Query(query): Query<ListProxiesQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(state.config.storage.export_limit)
        .min(state.config.storage.export_limit);

    let body: String = state
        .pool
        .best_proxies(limit)
        .iter()
        .map(|entry| format!("{}\n", entry.key()))
        .collect();

    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body)
}
