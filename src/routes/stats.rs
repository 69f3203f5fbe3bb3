use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;

use crate::state::AppState;

/// Snapshot of admission, cache, monitor and log channel counters
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine.stats();
    let admission = state.engine.admission();
    let log_stats = state.log.stats();

    Json(StatsResponse {
        cache_enabled: state.engine.cache().is_some(),
        cache_entries: engine.cache_entries,
        tracked_videos: engine.tracked_videos,
        max_tickets: admission.max_tickets(),
        available_tickets: engine.available_tickets,
        worker_slots: admission.worker_slots(),
        available_slots: engine.available_slots,
        active_workers: engine.active_workers,
        pool_ceiling: state.pool_ceiling.get(),
        log_delivered: log_stats.delivered(),
        log_dropped: log_stats.dropped(),
    })
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub cache_enabled: bool,
    pub cache_entries: usize,
    pub tracked_videos: usize,
    pub max_tickets: usize,
    pub available_tickets: usize,
    pub worker_slots: usize,
    pub available_slots: usize,
    pub active_workers: i64,
    pub pool_ceiling: i64,
    pub log_delivered: u64,
    pub log_dropped: u64,
}
