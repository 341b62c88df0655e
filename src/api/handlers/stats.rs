use axum::extract::State;
use axum::Json;

use crate::api::server::AppState;
use crate::models::PoolStatistics;

/// Pool statistics
pub async fn get_stats(State(state): State<AppState>) -> Json<PoolStatistics> {
    Json(state.pool.statistics())
}
