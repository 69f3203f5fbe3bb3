use std::sync::Arc;

use crate::{balancer::RedirectEngine, monitor::PoolCeiling, telemetry::LogChannel};

/// Application state shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    /// Redirect decision engine, owns admission and the cache
    pub engine: Arc<RedirectEngine>,

    /// Ceiling observed by the pool monitor, exposed on `/stats`
    pub pool_ceiling: PoolCeiling,

    /// Async log channel, exposed on `/stats` for its drop counters
    pub log: LogChannel,
}

impl AppState {
    pub fn new(engine: Arc<RedirectEngine>, pool_ceiling: PoolCeiling, log: LogChannel) -> Self {
        Self {
            engine,
            pool_ceiling,
            log,
        }
    }
}
